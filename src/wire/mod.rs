pub mod base64;
pub mod nal;
pub mod request;
pub mod response;
pub mod sdp;

pub use nal::Nal;
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
