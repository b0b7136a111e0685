pub use anyhow::{Context, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtspStatus {
    Unauthorized,
    UnsupportedTransport,
    ServerError,
    NotImplemented,
    InvalidState,
}

impl RtspStatus {
    pub fn code(self) -> u16 {
        match self {
            RtspStatus::Unauthorized => 401,
            RtspStatus::UnsupportedTransport => 461,
            RtspStatus::ServerError => 500,
            RtspStatus::NotImplemented => 501,
            RtspStatus::InvalidState => 455,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            RtspStatus::Unauthorized => "Unauthorized",
            RtspStatus::UnsupportedTransport => "Unsupported Transport",
            RtspStatus::ServerError => "Internal Server Error",
            RtspStatus::NotImplemented => "Not Implemented",
            RtspStatus::InvalidState => "Method Not Valid In This State",
        }
    }
}
