use super::base64;

pub struct SdpParams<'a> {
    pub width: u16,
    pub height: u16,
    pub sps: Option<&'a [u8]>,
    pub pps: Option<&'a [u8]>,
}

pub fn generate(params: &SdpParams) -> String {
    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    sdp.push_str("o=- 0 0 IN IP4 0.0.0.0\r\n");
    sdp.push_str("s=RTSP Camera Stream\r\n");
    sdp.push_str("c=IN IP4 0.0.0.0\r\n");
    sdp.push_str("t=0 0\r\n");
    sdp.push_str("a=control:*\r\n");
    sdp.push_str("a=range:npt=0-\r\n");
    sdp.push_str("m=video 0 RTP/AVP 96\r\n");
    sdp.push_str("a=rtpmap:96 H264/90000\r\n");

    match (params.sps, params.pps) {
        (Some(sps), Some(pps)) if !sps.is_empty() && !pps.is_empty() => {
            sdp.push_str(&format!(
                "a=fmtp:96 packetization-mode=1;sprop-parameter-sets={},{}\r\n",
                base64::encode(sps),
                base64::encode(pps)
            ));
        }
        _ => sdp.push_str("a=fmtp:96 packetization-mode=1\r\n"),
    }

    sdp.push_str("a=control:track1\r\n");
    sdp.push_str("a=framerate:30\r\n");
    sdp.push_str(&format!("a=framesize:96 {}-{}\r\n", params.width, params.height));

    sdp
}
