//! Vulkan error types
//!
//! Every checked API return is converted into a [`VulkanError`] at the call site, carrying
//! the name of the failing call and the source location that issued it. All variants are
//! fatal for the current session; recoverable conditions never reach this type.

use ash::vk;
use std::panic::Location;
use std::path::PathBuf;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// A checked API call returned an error code
    #[error("{call} failed at {location}: {result:?}")]
    Call {
        /// Name of the failing API call
        call: &'static str,
        /// Source location that issued the call
        location: &'static Location<'static>,
        /// Result code returned by the driver
        result: vk::Result,
    },

    /// A bounded fence wait expired; treated as device loss
    #[error("Timed out after {timeout_ns} ns waiting for {what}")]
    FenceTimeout {
        /// What the fence was guarding
        what: &'static str,
        /// Timeout that expired, in nanoseconds
        timeout_ns: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// SPIR-V could not be reflected
    #[error("Shader reflection failed: {0}")]
    ShaderReflection(String),

    /// Reading a resource from disk failed
    #[error("Failed to read {path:?}: {source}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl VulkanError {
    /// Wrap a raw result code with the caller's location
    #[track_caller]
    pub fn call(call: &'static str, result: vk::Result) -> Self {
        Self::Call {
            call,
            location: Location::caller(),
            result,
        }
    }

    /// Raw result code, if this error came from an API call
    pub fn result_code(&self) -> Option<vk::Result> {
        match self {
            Self::Call { result, .. } => Some(*result),
            _ => None,
        }
    }
}

/// Attach call-site context to raw `ash` results
pub trait VkResultExt<T> {
    /// Convert into a [`VulkanResult`], naming the API call that produced it
    fn context(self, call: &'static str) -> VulkanResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    #[track_caller]
    fn context(self, call: &'static str) -> VulkanResult<T> {
        let location = Location::caller();
        self.map_err(|result| VulkanError::Call { call, location, result })
    }
}
