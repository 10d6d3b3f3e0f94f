//! Error types
//!
//! Every fallible operation inside the bridge returns [`Result<T>`]. The public
//! object API (`Context`, `Recorder`, surfaces) and the C boundary collapse these
//! errors into `None` / `false` after logging them, so callers only ever see the
//! null-or-valid contract.

use thiserror::Error;

/// Failure categories of the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// Out of memory, or the backend refused to create an object.
    #[error("allocation failed: {0}")]
    AllocationFailure(String),

    /// A descriptor was invalid or did not match the backend it was used with.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// The device could not be created or is no longer usable.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The device reported an error while accepting or executing work.
    #[error("submission failed: {0}")]
    SubmissionFailure(String),

    /// Raw Vulkan error code.
    #[cfg(backend_vulkan)]
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidDescriptor(message.into())
    }

    pub(crate) fn allocation(message: impl Into<String>) -> Self {
        Self::AllocationFailure(message.into())
    }

    pub(crate) fn device_unavailable(message: impl Into<String>) -> Self {
        Self::DeviceUnavailable(message.into())
    }

    pub(crate) fn submission(message: impl Into<String>) -> Self {
        Self::SubmissionFailure(message.into())
    }
}

/// Alias for `std::result::Result<T, gpu_bridge::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
