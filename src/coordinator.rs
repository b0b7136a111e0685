use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use rand::Rng;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::camera::Camera;
use crate::config::Config;
use crate::convert::{self, PixelFormat, YuvLut};
use crate::encoder::{EncoderAdapter, EncoderConfig, SyntheticEncoder};
use crate::rtp::RtpCounters;
use crate::server;
use crate::session::SessionStore;

pub struct Shared {
    pub config: Config,
    pub sessions: std::sync::Mutex<SessionStore>,
    pub encoder: AsyncMutex<Option<EncoderAdapter>>,
    pub camera: AsyncMutex<Box<dyn Camera>>,
    pub yuv_lut: YuvLut,
    pub rtp_counters: RtpCounters,
    pub rtp_socket: UdpSocket,
    pub streaming_active: AtomicBool,
    pub frame_count: AtomicU32,
    pub media_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Shared {
    pub async fn ensure_encoder(&self) -> Result<()> {
        let mut guard = self.encoder.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let mut camera = self.camera.lock().await;
        if !camera.is_streaming() {
            if !camera.start_streaming() {
                anyhow::bail!("camera failed to start streaming");
            }
        }

        let (width, height) = Config::aligned_dimensions(camera.get_image_width(), camera.get_image_height());
        if width == 0 || height == 0 {
            anyhow::bail!("invalid camera dimensions: {width}x{height}");
        }

        let encoder_config = EncoderConfig {
            pixel_layout: PixelFormat::Rgb565,
            gop: self.config.gop,
            fps: 30,
            width,
            height,
            bitrate_bps: self.config.bitrate_bps,
            qp_min: self.config.qp_min,
            qp_max: self.config.qp_max,
        };

        let adapter = EncoderAdapter::create(
            encoder_config,
            Box::new(SyntheticEncoder::new(self.config.gop)),
        )
        .context("failed to create H.264 encoder")?;

        *guard = Some(adapter);
        Ok(())
    }

    pub async fn prime_parameter_sets(&self) {
        let mut encoder_guard = self.encoder.lock().await;
        let Some(encoder) = encoder_guard.as_mut() else {
            return;
        };
        if encoder.sps().is_some() && encoder.pps().is_some() {
            return;
        }

        let mut camera = self.camera.lock().await;
        if !camera.capture_frame() {
            return;
        }

        let (width, height) = (camera.get_image_width(), camera.get_image_height());
        let format = camera.pixel_format();
        let image = camera.get_image_data().to_vec();
        drop(camera);

        let convert_result = match format {
            PixelFormat::Rgb565 => {
                convert::rgb565_to_yuv420(&self.yuv_lut, &image, encoder.yuv_buffer_mut(), width, height)
            }
            PixelFormat::Yuyv => convert::yuyv_to_yuv420(&image, encoder.yuv_buffer_mut(), width, height),
        };

        if convert_result.is_err() {
            return;
        }

        let _ = encoder.encode_frame(self.frame_count.load(Ordering::Relaxed));
    }
}

pub struct Coordinator {
    shared: Arc<Shared>,
    rtsp_listener: TcpListener,
    _rtcp_socket: UdpSocket,
    enabled: AtomicBool,
}

impl Coordinator {
    pub async fn new(config: Config, camera: Box<dyn Camera>) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let rtsp_listener = bind_tcp(config.rtsp_port)
            .await
            .context("failed to bind RTSP listener")?;
        let rtp_socket = bind_udp(config.rtp_port)
            .await
            .context("failed to bind RTP socket")?;
        let rtcp_socket = bind_udp(config.rtcp_port)
            .await
            .context("failed to bind RTCP socket")?;

        let ssrc: u32 = rand::thread_rng().gen();
        let max_clients = config.max_clients;

        let shared = Arc::new(Shared {
            config,
            sessions: std::sync::Mutex::new(SessionStore::new(max_clients)),
            encoder: AsyncMutex::new(None),
            camera: AsyncMutex::new(camera),
            yuv_lut: YuvLut::new(),
            rtp_counters: RtpCounters::new(ssrc),
            rtp_socket,
            streaming_active: AtomicBool::new(false),
            frame_count: AtomicU32::new(0),
            media_task: AsyncMutex::new(None),
        });

        Ok(Coordinator {
            shared,
            rtsp_listener,
            _rtcp_socket: rtcp_socket,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn log_startup_banner(&self) {
        let cfg = &self.shared.config;
        info!(
            "RTSP server listening on port {} (stream path {})",
            cfg.rtsp_port, cfg.stream_path
        );
        info!("RTP port {}, RTCP port {}", cfg.rtp_port, cfg.rtcp_port);
        info!(
            "Bitrate {} bps, GOP {}, QP {}-{}, max clients {}",
            cfg.bitrate_bps, cfg.gop, cfg.qp_min, cfg.qp_max, cfg.max_clients
        );
        if cfg.auth_enabled() {
            info!("Authentication: ENABLED (user='{}')", cfg.username);
        } else {
            info!("Authentication: DISABLED");
        }
    }

    pub async fn run(&self) -> Result<()> {
        server::serve(&self.rtsp_listener, self.shared.clone()).await
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub async fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        self.shared.streaming_active.store(false, Ordering::SeqCst);

        let handle = self.shared.media_task.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(std::time::Duration::from_millis(500), handle).await;
        }

        *self.shared.encoder.lock().await = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

async fn bind_tcp(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("bind TCP port {port}"))
}

async fn bind_udp(port: u16) -> Result<UdpSocket> {
    UdpSocket::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("bind UDP port {port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::TestPatternCamera;

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let mut config = Config::default();
        config.qp_min = 99;
        config.qp_max = 1;
        config.rtsp_port = 0; // also force a free ephemeral-port bind to fail fast on validate()
        let camera: Box<dyn Camera> = Box::new(TestPatternCamera::new(64, 64));
        assert!(Coordinator::new(config, camera).await.is_err());
    }

    #[tokio::test]
    async fn new_binds_ephemeral_ports_successfully() {
        let mut config = Config::default();
        config.rtsp_port = 0;
        config.rtp_port = 0;
        config.rtcp_port = 0;
        // validate() forbids port 0; use distinct high ports instead to
        // avoid colliding with anything else bound on the test host.
        config.rtsp_port = 18554;
        config.rtp_port = 18556;
        config.rtcp_port = 18557;
        let camera: Box<dyn Camera> = Box::new(TestPatternCamera::new(64, 64));
        let coordinator = Coordinator::new(config, camera).await.unwrap();
        assert!(coordinator.is_enabled());
    }
}
