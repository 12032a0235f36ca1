//! Session-level error types.
//!
//! One taxonomy covers the whole connect/write/read/disconnect lifecycle.
//! Device backends report raw `std::io::Error`; the session maps those into
//! the variant matching the lifecycle step that failed.

use thiserror::Error;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The host environment exposes no serial capability at all.
    #[error("host environment does not expose a serial capability")]
    UnsupportedEnvironment,

    /// `connect` was called on a live session under the strict policy.
    #[error("session is already connected")]
    AlreadyConnected,

    /// Device acquisition failed (enumeration error, no matching device).
    #[error("device request failed: {0}")]
    DeviceRequestFailed(String),

    /// Device acquisition was dismissed by the chooser.
    #[error("device request was cancelled")]
    DeviceRequestCancelled,

    /// The acquired device rejected the transmission parameters or is busy.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),

    /// A write or signal operation was attempted without an open session.
    #[error("session is not connected")]
    NotConnected,

    /// Closing the device handle failed during disconnect. This is the only
    /// teardown step whose failure is reported to the caller; reader and
    /// writer release errors are logged and swallowed.
    #[error("device close failed during teardown: {0}")]
    Teardown(String),

    /// An I/O error from a device-level operation outside the lifecycle steps
    /// above (e.g. modem signal access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Create a `DeviceRequestFailed` error from a message.
    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::DeviceRequestFailed(message.into())
    }

    /// Create a `DeviceOpenFailed` error from a message.
    pub fn open_failed(message: impl Into<String>) -> Self {
        Self::DeviceOpenFailed(message.into())
    }

    /// Create a `Teardown` error from a message.
    pub fn teardown(message: impl Into<String>) -> Self {
        Self::Teardown(message.into())
    }
}
