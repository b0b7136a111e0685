use anyhow::{bail, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub rtsp_port: u16,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub stream_path: String,
    pub bitrate_bps: u32,
    pub gop: u8,
    pub qp_min: u8,
    pub qp_max: u8,
    pub max_clients: usize,
    pub username: String,
    pub password: String,
    pub frame_interval: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            rtsp_port: 554,
            rtp_port: 5004,
            rtcp_port: 5005,
            stream_path: "/stream".to_string(),
            bitrate_bps: 2_000_000,
            gop: 30,
            qp_min: 10,
            qp_max: 40,
            max_clients: 3,
            username: String::new(),
            password: String::new(),
            frame_interval: std::time::Duration::from_millis(33),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            rtsp_port: env_u16("RTSP_PORT", defaults.rtsp_port),
            rtp_port: env_u16("RTP_PORT", defaults.rtp_port),
            rtcp_port: env_u16("RTCP_PORT", defaults.rtcp_port),
            stream_path: std::env::var("STREAM_PATH").unwrap_or(defaults.stream_path),
            bitrate_bps: env_u32("BITRATE_BPS", defaults.bitrate_bps),
            gop: env_u8("GOP", defaults.gop),
            qp_min: env_u8("QP_MIN", defaults.qp_min),
            qp_max: env_u8("QP_MAX", defaults.qp_max),
            max_clients: env_usize("MAX_CLIENTS", defaults.max_clients),
            username: std::env::var("RTSP_USERNAME").unwrap_or(defaults.username),
            password: std::env::var("RTSP_PASSWORD").unwrap_or(defaults.password),
            frame_interval: defaults.frame_interval,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.qp_min > self.qp_max {
            bail!("qp_min ({}) must be <= qp_max ({})", self.qp_min, self.qp_max);
        }
        if self.rtsp_port == 0 || self.rtp_port == 0 || self.rtcp_port == 0 {
            bail!("ports must be non-zero");
        }
        if self.rtsp_port == self.rtp_port
            || self.rtsp_port == self.rtcp_port
            || self.rtp_port == self.rtcp_port
        {
            bail!("rtsp_port, rtp_port, and rtcp_port must be mutually distinct");
        }
        if self.max_clients == 0 {
            bail!("max_clients must be at least 1");
        }
        Ok(())
    }

    pub fn auth_enabled(&self) -> bool {
        !(self.username.is_empty() && self.password.is_empty())
    }

    pub fn aligned_dimensions(width: u16, height: u16) -> (u16, u16) {
        let align = |v: u16| ((v + 15) >> 4) << 4;
        (align(width), align(height))
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u8(name: &str, default: u8) -> u8 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_qp_range() {
        let mut cfg = Config::default();
        cfg.qp_min = 50;
        cfg.qp_max = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_colliding_ports() {
        let mut cfg = Config::default();
        cfg.rtp_port = cfg.rtsp_port;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_port() {
        let mut cfg = Config::default();
        cfg.rtcp_port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auth_enabled_requires_both_credentials_absent_to_disable() {
        let mut cfg = Config::default();
        assert!(!cfg.auth_enabled());
        cfg.username = "admin".to_string();
        assert!(cfg.auth_enabled());
    }

    #[test]
    fn aligns_dimensions_to_16() {
        assert_eq!(Config::aligned_dimensions(800, 640), (800, 640));
        assert_eq!(Config::aligned_dimensions(801, 633), (816, 640));
    }
}
