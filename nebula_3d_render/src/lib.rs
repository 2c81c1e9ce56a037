/*!
# Nebula3D Render Core

Platform-agnostic device and buffer protocol for the Nebula3D renderer.

This crate owns the API-agnostic half of the GPU contract: the
configuration a backend device is created from, the submission and
frame-ring protocol dynamic buffers follow, and the collaborator traits
the backend calls back into. Backend implementations (Vulkan today)
provide the concrete device, queue, and buffer-interface types.

## Architecture

- **DeviceConfig**: instance/device creation parameters
- **SubmissionType**: what a command-buffer submission means for the frame loop
- **RenderSystem**: frame-driver trait the device notifies on stalls
- **BufferPool**: resource-pool allocator trait backing buffer interfaces
- **BufferPacked / FrameRing**: per-buffer ring-slot arithmetic
- **MappingState / UnmapOptions / BufferType**: the map/unmap protocol

Backend crates depend on this one and implement the traits; application
code talks to both through the `nebula3d` namespace module.
*/

// Internal modules
mod buffer;
mod device;
mod error;
mod frame_ring;
pub mod log;
pub mod utils;

// Main nebula3d namespace module
pub mod nebula3d {
    // Error types
    pub use crate::error::{Error, Result};

    // Device configuration and collaborator traits
    pub use crate::device::{DeviceConfig, RenderSystem, SubmissionType};

    // Buffer protocol
    pub use crate::buffer::{
        BufferPacked, BufferPool, BufferType, MappingState, SharedBufferPool, UnmapOptions,
    };
    pub use crate::frame_ring::FrameRing;

    // Logging sub-module (types only, NOT macros)
    pub mod log {
        pub use crate::log::{DefaultLogger, LogEntry, LogManager, LogSeverity, Logger};
        // Note: gpu_* macros are NOT re-exported here - they live at the crate root
    }

    // Utility sub-module
    pub mod utils {
        pub use crate::utils::{HashedName, Ownership, SortedSet};
    }
}
