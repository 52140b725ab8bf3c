//! Runtime error types.

use thiserror::Error;

/// Errors from the serial link and its lifecycle.
#[derive(Debug, Error)]
pub enum LinkError {
    /// No matching device was found during a scan.
    #[error("no M8 device found (vendor 16c0, product 048a/0489)")]
    DeviceNotFound,

    /// A write or control operation was attempted while disconnected.
    #[error("serial link is not connected")]
    NotConnected,

    /// Opening the port failed; retryable.
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    /// An I/O error on an established link; triggers the reconnect path.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Port enumeration failed.
    #[error("serial port enumeration failed: {0}")]
    Enumeration(#[from] serialport::Error),
}
