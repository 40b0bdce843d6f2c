//! Error kinds for the capture/playout core (§7).

use thiserror::Error;

use crate::format::VideoFormat;

/// The error type for interactions with this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The device identifier resolved to no device, or the device is not ready.
    #[error("device {identifier:?} is unavailable")]
    DeviceUnavailable { identifier: String },

    /// A requested format is unknown to the device or to this core's capability table.
    #[error("unsupported mode: {format:?} is not usable on this device/channel")]
    UnsupportedMode { format: VideoFormat },

    /// Applying the cross-point routing transaction failed.
    #[error("routing transaction failed: {0}")]
    RoutingFailed(String),

    /// A DMA buffer pool failed to hand out a buffer.
    #[error("allocator exhausted: pool {pool} has no free buffers")]
    AllocatorExhausted { pool: &'static str },

    /// A single `AutoCirculateTransfer` call failed.
    ///
    /// Non-fatal unless it happens on initial ring fill, in which case the
    /// caller should promote it to [`Error::FatalConfig`].
    #[error("DMA transfer failed: {0}")]
    TransferFailed(String),

    /// Releasing a block the allocator has no record of.
    #[error("release of unknown allocator block (size {size})")]
    UnknownBlock { size: usize },

    /// Any failure during the configuration protocol (§4.5.2 / §4.6.1).
    #[error("configuration failed: {0}")]
    FatalConfig(String),

    /// An underlying OS/FFI error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<nix::Error> for Error {
    fn from(error: nix::Error) -> Self {
        Error::Io(std::io::Error::from_raw_os_error(error as i32))
    }
}

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
