#[derive(Debug, Clone)]
pub struct RtspResponse {
    code: u16,
    reason: &'static str,
    headers: Vec<(String, String)>,
    body: String,
}

impl RtspResponse {
    pub fn new(code: u16, reason: &'static str) -> Self {
        RtspResponse {
            code,
            reason,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn unauthorized() -> Self {
        Self::new(401, "Unauthorized")
    }

    pub fn unsupported_transport() -> Self {
        Self::new(461, "Unsupported Transport")
    }

    pub fn server_error() -> Self {
        Self::new(500, "Internal Server Error")
    }

    pub fn not_implemented() -> Self {
        Self::new(501, "Not Implemented")
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cseq(self, cseq: u32) -> Self {
        self.header("CSeq", cseq.to_string())
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("RTSP/1.0 {} {}\r\n", self.code, self.reason);

        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }

        if !self.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }

        out.push_str("\r\n");
        out.push_str(&self.body);

        out.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_status_line_and_headers_in_order() {
        let resp = RtspResponse::ok()
            .cseq(1)
            .header("Public", "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN");
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert_eq!(
            text,
            "RTSP/1.0 200 OK\r\nCSeq: 1\r\nPublic: OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN\r\n\r\n"
        );
    }

    #[test]
    fn body_gets_content_length_and_trailing_blank_line() {
        let resp = RtspResponse::ok()
            .cseq(2)
            .header("Content-Type", "application/sdp")
            .body("v=0\r\n");
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert_eq!(
            text,
            "RTSP/1.0 200 OK\r\nCSeq: 2\r\nContent-Type: application/sdp\r\nContent-Length: 5\r\n\r\nv=0\r\n"
        );
    }

    #[test]
    fn no_body_means_no_content_length() {
        let resp = RtspResponse::unauthorized()
            .cseq(2)
            .header("WWW-Authenticate", "Basic realm=\"RTSP Server\"");
        let text = String::from_utf8(resp.to_bytes()).unwrap();
        assert!(!text.contains("Content-Length"));
    }
}
