//! Error types for the Nebula3D render core
//!
//! This module defines the error types used throughout the render core,
//! covering device initialization, submission, and buffer mapping.

use std::fmt;

/// Result type for Nebula3D render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Nebula3D render errors
#[derive(Debug, Clone)]
pub enum Error {
    /// Backend-specific error (Vulkan, etc.)
    BackendError(String),

    /// Out of GPU memory
    OutOfMemory,

    /// Invalid resource or lifecycle misuse (buffer, queue, device state)
    InvalidResource(String),

    /// Initialization failed (instance, device, queues)
    InitializationFailed(String),

    /// The GPU device was lost; the device object is permanently unusable
    DeviceLost(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
            Error::InvalidResource(msg) => write!(f, "Invalid resource: {}", msg),
            Error::InitializationFailed(msg) => write!(f, "Initialization failed: {}", msg),
            Error::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
