/// Device configuration and the render-system collaborator trait
///
/// A backend device is created from a `DeviceConfig` and drives the frame
/// loop through `commit_and_next_command_buffer`. The types here are the
/// API-agnostic half of that contract; backend crates own the handles.

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for instance and device creation
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Application name reported to the driver
    pub app_name: String,
    /// Application version reported to the driver
    pub app_version: u32,
    /// Request the validation layer when available
    pub enable_validation: bool,
    /// Preferred physical device by reported name
    ///
    /// `None` or a name that matches nothing selects the default device.
    pub device_name: Option<String>,
    /// Upper bound of async compute queues to negotiate
    pub max_compute_queues: u32,
    /// Upper bound of async transfer queues to negotiate
    pub max_transfer_queues: u32,
    /// Ring depth for dynamic buffers and command recording
    pub frames_in_flight: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            app_name: "Nebula3D Application".to_string(),
            app_version: 1,
            enable_validation: cfg!(debug_assertions),
            device_name: None,
            max_compute_queues: 1,
            max_transfer_queues: 1,
            frames_in_flight: 2,
        }
    }
}

// ============================================================================
// Submission protocol
// ============================================================================

/// What a command-buffer submission means for the frame loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionType {
    /// Push pending work to the GPU, same frame continues recording
    FlushOnly,
    /// Submission closes the current frame index; dynamic buffers may
    /// advance their ring afterwards
    NewFrameIdx,
    /// Submission ends the frame and feeds the presentation path; frame
    /// boundary semaphores are consumed by this submit
    EndFrameAndSwap,
}

// ============================================================================
// Render-system collaborator
// ============================================================================

/// Owner of the backend device, as seen from the device itself
///
/// Implemented by the render system driving the frame loop. The device
/// only calls back for events the frame driver must react to.
pub trait RenderSystem: Send + Sync {
    /// The device completed a full pipeline drain (`stall`)
    ///
    /// Every fence and semaphore the device handed out before this call
    /// has been consumed; per-frame state can be rewound to a clean
    /// slate.
    fn notify_device_stalled(&self);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
