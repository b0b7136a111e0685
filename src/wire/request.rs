use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    Unknown,
}

impl Method {
    fn from_token(token: &str) -> Self {
        match token {
            "OPTIONS" => Method::Options,
            "DESCRIBE" => Method::Describe,
            "SETUP" => Method::Setup,
            "PLAY" => Method::Play,
            "PAUSE" => Method::Pause,
            "TEARDOWN" => Method::Teardown,
            _ => Method::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RtspRequest {
    pub method: Method,
    headers: HashMap<String, String>,
}

impl RtspRequest {
    pub fn parse(buf: &[u8]) -> Self {
        let text = String::from_utf8_lossy(buf);
        let head = text.split("\r\n\r\n").next().unwrap_or("");
        let mut lines = head.lines();

        let method = lines
            .next()
            .and_then(|line| line.split_whitespace().next())
            .map(Method::from_token)
            .unwrap_or(Method::Unknown);

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.to_string(), value.trim().to_string());
            }
        }

        RtspRequest { method, headers }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn cseq(&self) -> u32 {
        self.header("CSeq")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    }
}
