/*!
# Nebula3D Render - Vulkan Backend

Vulkan implementation of the Nebula3D device core.

This crate owns instance and device capability negotiation through the
Ash bindings, queue selection with async-compute/transfer fallback,
command-buffer submission with device-loss tracking, and the
persistent-mapped buffer protocol defined by nebula_3d_render. GPU
memory is managed with gpu-allocator.
*/

// Device core modules
mod vulkan_instance;
mod vulkan_device;
mod vulkan_queue;
mod vulkan_buffer_interface;
mod debug;

pub use vulkan_instance::{VulkanExternalInstance, VulkanInstance, VulkanPhysicalDevice};
pub use vulkan_device::{
    compute_supported_stages, fill_device_features, fill_queue_creation_info, find_compute_queues,
    find_graphics_queue, find_transfer_queues, resolve_extensions, DeviceExtraFeatures,
    DeviceLossState, DeviceState, QueueCreationRequest, RequestedExtension, SelectedQueue,
    VulkanDevice, VulkanExternalDevice, SRC_VALID_ACCESS_FLAGS,
};
pub use vulkan_queue::{QueueUsage, VulkanQueue};
pub use vulkan_buffer_interface::VulkanBufferInterface;

// Re-export debug utilities
pub use debug::{
    get_validation_stats, print_validation_stats_report, reset_validation_stats, ValidationStats,
};
