//! Integration tests for the Vulkan device core
//!
//! These tests walk the full instance -> physical device -> logical
//! device -> queues path on real hardware, headless (no window or
//! surface needed). All tests require a GPU and are marked with
//! #[ignore].
//!
//! Run with: cargo test --test device_integration_tests -- --ignored

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use nebula_3d_render::nebula3d::{
    BufferPacked, BufferPool, BufferType, DeviceConfig, MappingState, RenderSystem,
    SubmissionType, UnmapOptions,
};
use nebula_3d_render_vulkan::{
    DeviceState, RequestedExtension, VulkanBufferInterface, VulkanDevice, VulkanExternalInstance,
    VulkanInstance,
};
use serial_test::serial;

/// Render system stub counting stall notifications
struct CountingRenderSystem {
    stalls: AtomicU32,
}

impl CountingRenderSystem {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stalls: AtomicU32::new(0),
        })
    }
}

impl RenderSystem for CountingRenderSystem {
    fn notify_device_stalled(&self) {
        self.stalls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Buffer pool stub recording frame boundaries and region releases
struct CountingPool {
    multiplier: u32,
    frames: AtomicU32,
    releases: Mutex<Vec<(usize, usize)>>,
}

impl CountingPool {
    fn new(multiplier: u32) -> Arc<Self> {
        Arc::new(Self {
            multiplier,
            frames: AtomicU32::new(0),
            releases: Mutex::new(Vec::new()),
        })
    }
}

impl BufferPool for CountingPool {
    fn dynamic_buffer_multiplier(&self) -> u32 {
        self.multiplier
    }

    fn notify_region_released(&self, vbo_pool_idx: usize, internal_buffer_start: usize) {
        self.releases
            .lock()
            .unwrap()
            .push((vbo_pool_idx, internal_buffer_start));
    }

    fn notify_new_command_buffer(&self) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }
}

fn headless_config() -> DeviceConfig {
    DeviceConfig {
        app_name: "Nebula3D Device Tests".to_string(),
        enable_validation: false,
        ..Default::default()
    }
}

fn create_instance() -> Arc<VulkanInstance> {
    let config = headless_config();
    let mut instance = VulkanInstance::new(&config, None).unwrap();
    instance.init_debug_features(false);
    instance.init_physical_device_list().unwrap();
    Arc::new(instance)
}

fn create_device(instance: &Arc<VulkanInstance>) -> VulkanDevice {
    let config = headless_config();
    let physical = instance.find_by_name("").clone();
    let mut device = VulkanDevice::new(instance.clone(), &config);
    device.set_physical_device(&physical).unwrap();
    device.create_device(&[]).unwrap();
    device.init_queues().unwrap();
    device
}

/// One CPU-visible test buffer bound to its own allocation
struct TestBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl TestBuffer {
    fn new(device: &VulkanDevice, size_bytes: u64) -> Self {
        let logical = device.logical_device().unwrap();
        let buffer_info = vk::BufferCreateInfo::default().size(size_bytes).usage(
            vk::BufferUsageFlags::VERTEX_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
        );
        let buffer = unsafe { logical.create_buffer(&buffer_info, None) }.unwrap();
        let requirements = unsafe { logical.get_buffer_memory_requirements(buffer) };

        let allocator = device.allocator().unwrap();
        let allocation = allocator
            .lock()
            .unwrap()
            .allocate(&AllocationCreateDesc {
                name: "test buffer",
                requirements,
                location: MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .unwrap();
        unsafe {
            logical
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
                .unwrap();
        }

        Self {
            buffer,
            allocation: Some(allocation),
        }
    }

    fn release(&mut self, device: &VulkanDevice) {
        if let Some(allocation) = self.allocation.take() {
            let allocator = device.allocator().unwrap();
            allocator.lock().unwrap().free(allocation).unwrap();
        }
        let logical = device.logical_device().unwrap();
        unsafe { logical.destroy_buffer(self.buffer, None) };
        self.buffer = vk::Buffer::null();
    }
}

// ============================================================================
// INSTANCE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_instance_enumerates_physical_devices() {
    let instance = create_instance();

    let devices = instance.physical_devices();
    assert!(!devices.is_empty());
    for device in devices {
        assert!(!device.name.is_empty());
    }
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_find_by_name_unknown_falls_back_to_first() {
    let instance = create_instance();

    let fallback = instance.find_by_name("No Such GPU 9000");
    assert_eq!(fallback.handle, instance.physical_devices()[0].handle);

    // An empty preference also lands on the first device
    let default = instance.find_by_name("");
    assert_eq!(default.handle, instance.physical_devices()[0].handle);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_external_instance_claims_are_downgraded() {
    let owned = create_instance();

    // Wrap the owned instance's handle as if a host supplied it, with
    // an extension claim discovery cannot confirm
    let external = VulkanExternalInstance {
        instance: owned.raw().handle(),
        instance_layers: Vec::new(),
        instance_extensions: vec!["VK_EXT_imaginary_extension".to_string()],
    };
    let wrapped = VulkanInstance::from_external(external).unwrap();

    assert!(wrapped.is_external());
    assert!(!wrapped.has_extension("VK_EXT_imaginary_extension"));

    // Dropping the wrapper must not destroy the shared handle
    drop(wrapped);
    let still_alive = unsafe { owned.raw().enumerate_physical_devices() };
    assert!(still_alive.is_ok());
}

// ============================================================================
// DEVICE LIFECYCLE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_full_device_lifecycle() {
    let instance = create_instance();
    let mut device = create_device(&instance);

    assert_eq!(device.state(), DeviceState::QueuesReady);
    assert!(device.graphics_queue().is_some());
    assert!(!device.is_device_lost());

    device
        .commit_and_next_command_buffer(SubmissionType::FlushOnly)
        .unwrap();
    assert_eq!(device.state(), DeviceState::Active);

    device.stall().unwrap();
    assert!(!device.is_device_lost());

    device.destroy();
    assert_eq!(device.state(), DeviceState::Destroyed);

    // Idempotent: a second destroy is a no-op
    device.destroy();
    assert_eq!(device.state(), DeviceState::Destroyed);
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_missing_required_extension_fails_fast_with_name() {
    let instance = create_instance();
    let config = headless_config();
    let physical = instance.find_by_name("").clone();

    let mut device = VulkanDevice::new(instance.clone(), &config);
    device.set_physical_device(&physical).unwrap();

    let result = device.create_device(&[RequestedExtension::required(
        "VK_NEBULA_imaginary_extension",
    )]);

    let error = result.unwrap_err();
    assert!(error.to_string().contains("VK_NEBULA_imaginary_extension"));
    // Rejected before any handle was created
    assert_eq!(device.state(), DeviceState::PhysicalDeviceBound);

    device.destroy();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_optional_extension_request_is_resolved() {
    let instance = create_instance();
    let config = headless_config();
    let physical = instance.find_by_name("").clone();

    let mut device = VulkanDevice::new(instance.clone(), &config);
    device.set_physical_device(&physical).unwrap();
    device
        .create_device(&[
            RequestedExtension::optional("VK_KHR_swapchain"),
            RequestedExtension::optional("VK_NEBULA_imaginary_extension"),
        ])
        .unwrap();

    // Enabled iff available; the imaginary one was dropped
    assert_eq!(
        device.has_device_extension("VK_KHR_swapchain"),
        device.enabled_extensions().contains("VK_KHR_swapchain")
    );
    assert!(!device.has_device_extension("VK_NEBULA_imaginary_extension"));

    device.destroy();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_submission_notifies_pool_on_frame_boundaries() {
    let instance = create_instance();
    let mut device = create_device(&instance);
    let pool = CountingPool::new(3);
    device.set_buffer_pool(pool.clone());

    device
        .commit_and_next_command_buffer(SubmissionType::NewFrameIdx)
        .unwrap();
    device
        .commit_and_next_command_buffer(SubmissionType::NewFrameIdx)
        .unwrap();
    device
        .commit_and_next_command_buffer(SubmissionType::FlushOnly)
        .unwrap();

    // FlushOnly is not a frame boundary
    assert_eq!(pool.frames.load(Ordering::SeqCst), 2);

    device.destroy();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_stall_notifies_render_system() {
    let instance = create_instance();
    let mut device = create_device(&instance);
    let render_system = CountingRenderSystem::new();
    device.set_render_system(render_system.clone());

    device
        .commit_and_next_command_buffer(SubmissionType::FlushOnly)
        .unwrap();
    device.stall().unwrap();

    assert_eq!(render_system.stalls.load(Ordering::SeqCst), 1);

    device.destroy();
}

// ============================================================================
// BUFFER INTERFACE TESTS
// ============================================================================

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_persistent_mapped_write_and_ring_rotation() {
    let instance = create_instance();
    let mut device = create_device(&instance);
    let pool = CountingPool::new(3);

    // 256 elements of 4 bytes, tripled for the ring
    let packed = Arc::new(BufferPacked::new(
        BufferType::DynamicPersistentCoherent,
        256,
        4,
        0,
    ));
    let region_bytes = (packed.size_bytes() * 3) as u64;
    let mut backing = TestBuffer::new(&device, region_bytes);
    let allocation = backing.allocation.as_ref().unwrap();
    let data_ptr = allocation.mapped_ptr().unwrap().cast::<u8>();
    let memory = unsafe { allocation.memory() };
    let offset = allocation.offset();

    let mut interface = VulkanBufferInterface::new(
        &device,
        7,
        backing.buffer,
        memory,
        offset,
        packed.clone(),
        data_ptr,
        pool.clone() as Arc<dyn BufferPool>,
    )
    .unwrap();

    assert_eq!(interface.current_frame_slot(), 0);

    // Slot 0 write through map
    let ptr = interface.map(0, 4, MappingState::Unmapped, false);
    unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), 16) }.copy_from_slice(&[0xAA; 16]);
    interface.unmap(UnmapOptions::UnmapAll, 0, 0).unwrap();

    // Advancing targets the next slot; 3 advances wrap back to 0
    let ptr = interface.map(0, 4, MappingState::Unmapped, true);
    assert_eq!(interface.current_frame_slot(), 1);
    unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), 16) }.copy_from_slice(&[0xBB; 16]);
    interface.unmap(UnmapOptions::UnmapAll, 0, 0).unwrap();

    interface.advance_frame();
    interface.advance_frame();
    assert_eq!(interface.current_frame_slot(), 0);

    // Regress undoes exactly one advance
    interface.regress_frame();
    assert_eq!(interface.current_frame_slot(), 2);
    interface.advance_frame();

    // Both slot writes landed where the ring said they would
    let base = data_ptr.as_ptr();
    unsafe {
        assert_eq!(*base, 0xAA);
        assert_eq!(*base.add(packed.size_bytes()), 0xBB);
    }

    drop(interface);
    let releases = pool.releases.lock().unwrap().clone();
    assert_eq!(releases, vec![(7, 0)]);

    backing.release(&device);
    device.destroy();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_released_data_ptr_is_not_returned_to_pool() {
    let instance = create_instance();
    let mut device = create_device(&instance);
    let pool = CountingPool::new(2);

    let packed = Arc::new(BufferPacked::new(
        BufferType::DynamicPersistentCoherent,
        64,
        4,
        128,
    ));
    let mut backing = TestBuffer::new(&device, (packed.size_bytes() * 2) as u64);
    let allocation = backing.allocation.as_ref().unwrap();
    let data_ptr = allocation.mapped_ptr().unwrap().cast::<u8>();
    let memory = unsafe { allocation.memory() };
    let offset = allocation.offset();

    let mut interface = VulkanBufferInterface::new(
        &device,
        3,
        backing.buffer,
        memory,
        offset,
        packed,
        data_ptr,
        pool.clone() as Arc<dyn BufferPool>,
    )
    .unwrap();

    interface.release_data_ptr();
    drop(interface);

    // Ownership was transferred away, so no release notification
    assert!(pool.releases.lock().unwrap().is_empty());

    backing.release(&device);
    device.destroy();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_copy_to_moves_data_between_buffers() {
    let instance = create_instance();
    let mut device = create_device(&instance);
    let pool = CountingPool::new(1);

    let packed = Arc::new(BufferPacked::new(
        BufferType::DynamicPersistentCoherent,
        64,
        4,
        0,
    ));
    let mut src_backing = TestBuffer::new(&device, packed.size_bytes() as u64);
    let mut dst_backing = TestBuffer::new(&device, packed.size_bytes() as u64);

    let src_allocation = src_backing.allocation.as_ref().unwrap();
    let dst_allocation = dst_backing.allocation.as_ref().unwrap();
    let src_ptr = src_allocation.mapped_ptr().unwrap().cast::<u8>();
    let dst_ptr = dst_allocation.mapped_ptr().unwrap().cast::<u8>();

    let mut src = VulkanBufferInterface::new(
        &device,
        0,
        src_backing.buffer,
        unsafe { src_allocation.memory() },
        src_allocation.offset(),
        packed.clone(),
        src_ptr,
        pool.clone() as Arc<dyn BufferPool>,
    )
    .unwrap();
    let dst = VulkanBufferInterface::new(
        &device,
        1,
        dst_backing.buffer,
        unsafe { dst_allocation.memory() },
        dst_allocation.offset(),
        packed.clone(),
        dst_ptr,
        pool.clone() as Arc<dyn BufferPool>,
    )
    .unwrap();

    let payload: Vec<u8> = (0u8..=255).collect();
    src._first_upload(&payload, 0, 64).unwrap();

    let cmd = device.graphics_queue().unwrap().current_command_buffer();
    src.copy_to(cmd, &dst, 0, 0, 256);
    device
        .commit_and_next_command_buffer(SubmissionType::FlushOnly)
        .unwrap();
    device.stall().unwrap();

    let copied = unsafe { std::slice::from_raw_parts(dst_ptr.as_ptr(), 256) };
    assert_eq!(copied, payload.as_slice());

    drop(src);
    drop(dst);
    src_backing.release(&device);
    dst_backing.release(&device);
    device.destroy();
}

#[test]
#[ignore] // Requires GPU
#[serial]
fn test_device_survives_many_submission_cycles() {
    let instance = create_instance();
    let mut device = create_device(&instance);

    for _ in 0..12 {
        device
            .commit_and_next_command_buffer(SubmissionType::NewFrameIdx)
            .unwrap();
    }
    device.stall().unwrap();

    assert!(!device.is_device_lost());
    assert_eq!(device.state(), DeviceState::Active);

    device.destroy();
}
