use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::io::{AsyncWriteExt, ErrorKind};
use tokio::net::{TcpListener, TcpStream};

use crate::coordinator::Shared;
use crate::error::RtspStatus;
use crate::media;
use crate::session::{generate_session_id, Session, SessionState, SocketId};
use crate::wire::sdp::{self, SdpParams};
use crate::wire::{Method, RtspRequest, RtspResponse};

const READ_BUF_LEN: usize = 2048;
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn serve(listener: &TcpListener, shared: Arc<Shared>) -> Result<()> {
    let mut next_socket_id: SocketId = 1;

    loop {
        let (stream, peer) = listener.accept().await?;
        let socket_id = next_socket_id;
        next_socket_id += 1;

        let conn_shared = shared.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, conn_shared, socket_id).await;
        });
    }
}

fn peer_ipv4(peer: SocketAddr) -> Ipv4Addr {
    match peer.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(v6) => v6.to_ipv4().unwrap_or(Ipv4Addr::UNSPECIFIED),
    }
}

async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>, socket_id: SocketId) {
    let client_addr = peer_ipv4(peer);

    {
        let mut sessions = shared.sessions.lock().unwrap();
        if !sessions.insert(Session::new(socket_id, client_addr)) {
            debug!("rejecting {peer}: session table full");
            return;
        }
    }

    let mut buf = [0u8; READ_BUF_LEN];
    loop {
        match tokio::time::timeout(IDLE_TIMEOUT, stream.readable()).await {
            Err(_) => {
                debug!("{peer}: idle timeout");
                break;
            }
            Ok(Err(e)) => {
                debug!("{peer}: readable() error: {e}");
                break;
            }
            Ok(Ok(())) => {}
        }

        match stream.try_read(&mut buf) {
            Ok(0) => {
                debug!("{peer}: peer closed");
                break;
            }
            Ok(n) => {
                touch(&shared, socket_id);
                let request = RtspRequest::parse(&buf[..n]);
                if let Some(response) = dispatch(&shared, socket_id, client_addr, &request).await {
                    if let Err(e) = stream.write_all(&response.to_bytes()).await {
                        debug!("{peer}: write error: {e}");
                        break;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => {
                debug!("{peer}: read error: {e}");
                break;
            }
        }
    }

    teardown_session(&shared, socket_id).await;
}

fn touch(shared: &Shared, socket_id: SocketId) {
    let mut sessions = shared.sessions.lock().unwrap();
    if let Some(session) = sessions.find_by_socket_mut(socket_id) {
        session.touch();
    }
}

async fn dispatch(
    shared: &Arc<Shared>,
    socket_id: SocketId,
    client_addr: Ipv4Addr,
    request: &RtspRequest,
) -> Option<RtspResponse> {
    let cseq = request.cseq();

    if request.method != Method::Options {
        if let Some(status) = check_auth(shared, request) {
            return Some(status_response(status).cseq(cseq));
        }
    }

    match request.method {
        Method::Options => Some(
            RtspResponse::ok()
                .cseq(cseq)
                .header("Public", "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN"),
        ),
        Method::Describe => Some(handle_describe(shared, cseq).await),
        Method::Setup => Some(handle_setup(shared, socket_id, client_addr, cseq, request)),
        Method::Play => Some(handle_play(shared, socket_id, cseq).await),
        Method::Teardown => Some(handle_teardown(shared, socket_id, cseq).await),
        Method::Pause => Some(status_response(RtspStatus::NotImplemented).cseq(cseq)),
        Method::Unknown => None,
    }
}

fn status_response(status: RtspStatus) -> RtspResponse {
    let mut response = RtspResponse::new(status.code(), status.reason());
    if status == RtspStatus::Unauthorized {
        response = response.header("WWW-Authenticate", "Basic realm=\"RTSP Server\"");
    }
    response
}

fn check_auth(shared: &Shared, request: &RtspRequest) -> Option<RtspStatus> {
    if !shared.config.auth_enabled() {
        return None;
    }

    let credentials = request
        .header("Authorization")
        .and_then(|header| header.strip_prefix("Basic "))
        .map(crate::wire::base64::decode)
        .and_then(|decoded| {
            String::from_utf8_lossy(&decoded)
                .split_once(':')
                .map(|(u, p)| (u.to_string(), p.to_string()))
        });

    match credentials {
        Some((user, pass)) if user == shared.config.username && pass == shared.config.password => None,
        _ => Some(RtspStatus::Unauthorized),
    }
}

async fn handle_describe(shared: &Arc<Shared>, cseq: u32) -> RtspResponse {
    if let Err(e) = shared.ensure_encoder().await {
        warn!("DESCRIBE: encoder creation failed: {e}");
        return status_response(RtspStatus::ServerError).cseq(cseq);
    }

    shared.prime_parameter_sets().await;

    let encoder_guard = shared.encoder.lock().await;
    let encoder = encoder_guard.as_ref().expect("encoder just ensured present");
    let sdp = sdp::generate(&SdpParams {
        width: encoder.config().width,
        height: encoder.config().height,
        sps: encoder.sps(),
        pps: encoder.pps(),
    });

    RtspResponse::ok()
        .cseq(cseq)
        .header("Content-Type", "application/sdp")
        .body(sdp)
}

fn handle_setup(
    shared: &Arc<Shared>,
    socket_id: SocketId,
    client_addr: Ipv4Addr,
    cseq: u32,
    request: &RtspRequest,
) -> RtspResponse {
    let Some(transport) = request.header("Transport") else {
        return status_response(RtspStatus::UnsupportedTransport).cseq(cseq);
    };

    if transport.contains("interleaved") || transport.contains("RTP/AVP/TCP") {
        return status_response(RtspStatus::UnsupportedTransport).cseq(cseq);
    }

    let Some(client_ports) = parse_client_port(transport) else {
        return status_response(RtspStatus::UnsupportedTransport).cseq(cseq);
    };
    let (client_rtp_port, client_rtcp_port) = client_ports;

    let mut sessions = shared.sessions.lock().unwrap();
    let Some(session) = sessions.find_by_socket_mut(socket_id) else {
        return status_response(RtspStatus::ServerError).cseq(cseq);
    };

    // Only Init -> Ready or a re-SETUP while already Ready is allowed; a
    // Playing session would otherwise be demoted, a backward transition.
    if session.state == SessionState::Playing {
        return status_response(RtspStatus::InvalidState).cseq(cseq);
    }

    if session.session_id.is_empty() {
        session.session_id = generate_session_id();
    }
    session.client_addr = client_addr;
    session.client_rtp_port = client_rtp_port;
    session.client_rtcp_port = client_rtcp_port;
    session.state = SessionState::Ready;
    let session_id = session.session_id.clone();
    drop(sessions);

    RtspResponse::ok()
        .cseq(cseq)
        .header("Session", session_id)
        .header(
            "Transport",
            format!(
                "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};server_port={}-{}",
                shared.config.rtp_port, shared.config.rtcp_port
            ),
        )
}

fn parse_client_port(transport: &str) -> Option<(u16, u16)> {
    for field in transport.split(';') {
        if let Some(range) = field.trim().strip_prefix("client_port=") {
            let (rtp, rtcp) = range.split_once('-')?;
            return Some((rtp.parse().ok()?, rtcp.parse().ok()?));
        }
    }
    None
}

async fn handle_play(shared: &Arc<Shared>, socket_id: SocketId, cseq: u32) -> RtspResponse {
    if let Err(e) = shared.ensure_encoder().await {
        warn!("PLAY: encoder creation failed: {e}");
        return status_response(RtspStatus::ServerError).cseq(cseq);
    }

    let session_id = {
        let mut sessions = shared.sessions.lock().unwrap();
        let Some(session) = sessions.find_by_socket_mut(socket_id) else {
            return status_response(RtspStatus::ServerError).cseq(cseq);
        };
        // PLAY is only valid from Ready (or already Playing, idempotent
        // replay); Init has no transport to stream to yet.
        if session.state == SessionState::Init {
            return status_response(RtspStatus::InvalidState).cseq(cseq);
        }
        session.state = SessionState::Playing;
        session.session_id.clone()
    };

    ensure_media_task(shared).await;

    let seq = shared.rtp_counters.current_seq();

    RtspResponse::ok()
        .cseq(cseq)
        .header("Session", session_id)
        .header(
            "RTP-Info",
            format!("url={};seq={seq}", shared.config.stream_path),
        )
}

async fn handle_teardown(shared: &Arc<Shared>, socket_id: SocketId, cseq: u32) -> RtspResponse {
    let session_id = {
        let mut sessions = shared.sessions.lock().unwrap();
        let session_id = sessions
            .find_by_socket(socket_id)
            .map(|s| s.session_id.clone())
            .unwrap_or_default();
        sessions.remove(socket_id);
        session_id
    };

    maybe_stop_media_task(shared).await;

    RtspResponse::ok().cseq(cseq).header("Session", session_id)
}

async fn teardown_session(shared: &Arc<Shared>, socket_id: SocketId) {
    {
        let mut sessions = shared.sessions.lock().unwrap();
        sessions.remove(socket_id);
    }
    maybe_stop_media_task(shared).await;
}

async fn ensure_media_task(shared: &Arc<Shared>) {
    let mut guard = shared.media_task.lock().await;
    if guard.is_some() {
        return;
    }
    shared.streaming_active.store(true, Ordering::SeqCst);
    let media_shared = shared.clone();
    *guard = Some(tokio::spawn(async move {
        media::run(media_shared).await;
        info!("media task exited");
    }));
}

async fn maybe_stop_media_task(shared: &Arc<Shared>) {
    if shared.sessions.lock().unwrap().any_playing() {
        return;
    }

    shared.streaming_active.store(false, Ordering::SeqCst);
    let handle = shared.media_task.lock().await.take();
    if let Some(handle) = handle {
        let _ = tokio::time::timeout(Duration::from_millis(500), handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_client_port_range() {
        assert_eq!(
            parse_client_port("RTP/AVP;unicast;client_port=40000-40001"),
            Some((40000, 40001))
        );
    }

    #[test]
    fn missing_client_port_is_none() {
        assert_eq!(parse_client_port("RTP/AVP;unicast"), None);
    }

    #[test]
    fn malformed_client_port_is_none() {
        assert_eq!(parse_client_port("client_port=abc-def"), None);
    }

    #[test]
    fn auth_disabled_passes_without_header() {
        let config = crate::config::Config::default();
        let req = RtspRequest::parse(b"DESCRIBE rtsp://h/s RTSP/1.0\r\nCSeq: 1\r\n\r\n");
        // auth_enabled() is false on default config, so the gate must be
        // bypassed regardless of headers; exercised indirectly through
        // Config rather than constructing a full Shared here.
        assert!(!config.auth_enabled());
        let _ = req;
    }
}
