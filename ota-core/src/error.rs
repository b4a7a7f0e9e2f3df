//! Error types for the OTA server.
//!
//! Every error is local to one connection. The accept loop logs it, reports
//! its [`OtaError::code`] to the peer and carries on.

use std::fmt;
use std::io;

/// Numeric codes carried in failure responses. Values mirror ESP-IDF `esp_err_t`.
pub mod codes {
    pub const FAIL: i32 = -1;
    pub const NO_MEM: i32 = 0x101;
    pub const INVALID_ARG: i32 = 0x102;
    pub const INVALID_SIZE: i32 = 0x104;
    pub const OTA_VALIDATE_FAILED: i32 = 0x1503;
}

/// Storage call that produced a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Begin,
    Write,
    Finalize,
    Abort,
    SelectBoot,
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageOp::Begin => "begin write",
            StorageOp::Write => "write chunk",
            StorageOp::Finalize => "finalize write",
            StorageOp::Abort => "abort write",
            StorageOp::SelectBoot => "select boot region",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{op} failed: error code 0x{code:x}")]
pub struct StorageError {
    pub op: StorageOp,
    pub code: i32,
}

impl StorageError {
    pub fn new(op: StorageOp, code: i32) -> Self {
        Self { op, code }
    }
}

/// Problems with the request header block or the values it declares.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("no header terminator within {limit} bytes")]
    TooLarge { limit: usize },

    #[error("missing Content-Length")]
    MissingLength,

    #[error("invalid Content-Length value")]
    InvalidLength,

    #[error("missing Content-Type")]
    MissingContentType,

    #[error("unsupported Content-Type: {0}")]
    UnsupportedContentType(String),

    #[error("empty firmware image")]
    EmptyImage,

    #[error("image of {declared} bytes exceeds region size of {capacity} bytes")]
    ImageTooLarge { declared: usize, capacity: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("peer closed the connection after {received} body bytes")]
    PeerClosed { received: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum OtaError {
    #[error("malformed request: {0}")]
    MalformedRequest(#[from] HeaderError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("command buffer exhausted ({capacity} bytes)")]
    BufferExhausted { capacity: usize },
}

impl OtaError {
    /// Code reported to the peer in the failure response.
    pub fn code(&self) -> i32 {
        match self {
            OtaError::MalformedRequest(HeaderError::EmptyImage)
            | OtaError::MalformedRequest(HeaderError::ImageTooLarge { .. }) => codes::INVALID_SIZE,
            OtaError::MalformedRequest(_) => codes::INVALID_ARG,
            OtaError::Transport(TransportError::Receive(e)) => e.raw_os_error().unwrap_or(codes::FAIL),
            OtaError::Transport(TransportError::PeerClosed { .. }) => codes::INVALID_SIZE,
            OtaError::Storage(e) => e.code,
            OtaError::BufferExhausted { .. } => codes::NO_MEM,
        }
    }

    /// Read failures and early closes, as opposed to rejected requests.
    pub fn is_transport(&self) -> bool {
        matches!(self, OtaError::Transport(_))
    }
}

/// Failures while bringing the server up. These are fatal to startup.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("cannot find update partition")]
    NoUpdateRegion,

    #[error("cannot find factory partition")]
    NoFactoryRegion,

    #[error("failed to listen on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: io::Error,
    },
}
