use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Slot {index} out of range for a route table of size {size}")]
    IndexOutOfRange { index: u32, size: u32 },

    #[error("Unexpected state node {found}, expected {expected}")]
    UnexpectedNode {
        expected: &'static str,
        found: Arc<str>,
    },

    #[error("Malformed state node: {}", .0)]
    MalformedState(Arc<str>),

    #[error("Unsupported state version {found}, latest supported is {latest}")]
    UnsupportedVersion { found: u32, latest: u32 },

    #[error("State serialization failed")]
    Serialization(#[from] serde_json::Error),

    #[error("State file error")]
    Io(#[from] std::io::Error),

    #[error("Control Surface activation failed: {}", .0)]
    Activation(Arc<str>),

    #[error("Unknown Control Surface: {}", .0)]
    UnknownSurface(Arc<str>),

    #[error("Control Surface unavailable: {}", .0)]
    Unavailable(Arc<str>),

    #[error("Control Surface thread is gone")]
    ThreadGone,
}
