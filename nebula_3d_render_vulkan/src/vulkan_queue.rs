/// VulkanQueue - one negotiated queue plus its command-buffer rotation
///
/// Wraps a `vk::Queue` together with the command pool, per-frame command
/// buffers and fences that drive submission. The graphics queue is the
/// one the device rotates every frame; compute and transfer queues reuse
/// the same type for async work.

use nebula_3d_render::gpu_error;
use nebula_3d_render::nebula3d::{Error, FrameRing, Result};

use ash::vk;

/// Role a queue was negotiated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueUsage {
    /// Guaranteed by the API to also run compute and transfer work
    Graphics,
    Compute,
    Transfer,
}

/// A live queue with its recording state
///
/// The current command buffer is always open for recording: `new` opens
/// the first one and `commit_and_next_command_buffer` opens the next
/// after every submit. Fences pace the rotation so a command buffer is
/// only reused once the GPU finished consuming its previous submission.
pub struct VulkanQueue {
    usage: QueueUsage,
    family_idx: u32,
    queue_idx: u32,
    queue: vk::Queue,

    device: ash::Device,

    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    fences: Vec<vk::Fence>,
    frame_ring: FrameRing,

    // Frame-boundary semaphores queued by the presentation path,
    // consumed by the next end-of-frame submit
    pending_wait_semaphores: Vec<vk::Semaphore>,
    pending_wait_stages: Vec<vk::PipelineStageFlags>,
    pending_signal_semaphores: Vec<vk::Semaphore>,
}

impl VulkanQueue {
    /// Create the queue wrapper and open its first command buffer
    ///
    /// # Arguments
    ///
    /// * `device` - Loaded device function table
    /// * `usage` - Role this queue was selected for
    /// * `family_idx` / `queue_idx` - The negotiated selection
    /// * `queue` - Queue handle fetched from the device
    /// * `frames_in_flight` - Depth of the command-buffer rotation
    pub fn new(
        device: ash::Device,
        usage: QueueUsage,
        family_idx: u32,
        queue_idx: u32,
        queue: vk::Queue,
        frames_in_flight: u32,
    ) -> Result<Self> {
        unsafe {
            let pool_info = vk::CommandPoolCreateInfo::default()
                .queue_family_index(family_idx)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

            let command_pool = device.create_command_pool(&pool_info, None).map_err(|e| {
                gpu_error!(
                    "nebula3d::vulkan",
                    "Failed to create command pool for {:?} queue: {:?}",
                    usage,
                    e
                );
                Error::InitializationFailed(format!("Failed to create command pool: {:?}", e))
            })?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(frames_in_flight);

            let command_buffers = device.allocate_command_buffers(&alloc_info).map_err(|e| {
                gpu_error!(
                    "nebula3d::vulkan",
                    "Failed to allocate command buffers: {:?}",
                    e
                );
                Error::InitializationFailed(format!("Failed to allocate command buffers: {:?}", e))
            })?;

            let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            let mut fences = Vec::with_capacity(frames_in_flight as usize);
            for _ in 0..frames_in_flight {
                fences.push(device.create_fence(&fence_info, None).map_err(|e| {
                    gpu_error!("nebula3d::vulkan", "Failed to create submit fence: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create fence: {:?}", e))
                })?);
            }

            // Open the first command buffer so recording can start right away
            device
                .wait_for_fences(&[fences[0]], true, u64::MAX)
                .and_then(|_| device.reset_fences(&[fences[0]]))
                .and_then(|_| {
                    let begin_info = vk::CommandBufferBeginInfo::default()
                        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                    device.begin_command_buffer(command_buffers[0], &begin_info)
                })
                .map_err(|e| {
                    gpu_error!(
                        "nebula3d::vulkan",
                        "Failed to open initial command buffer: {:?}",
                        e
                    );
                    Error::InitializationFailed(format!(
                        "Failed to open initial command buffer: {:?}",
                        e
                    ))
                })?;

            Ok(Self {
                usage,
                family_idx,
                queue_idx,
                queue,
                device,
                command_pool,
                command_buffers,
                fences,
                frame_ring: FrameRing::new(frames_in_flight),
                pending_wait_semaphores: Vec::new(),
                pending_wait_stages: Vec::new(),
                pending_signal_semaphores: Vec::new(),
            })
        }
    }

    pub fn usage(&self) -> QueueUsage {
        self.usage
    }

    pub fn family_idx(&self) -> u32 {
        self.family_idx
    }

    pub fn queue_idx(&self) -> u32 {
        self.queue_idx
    }

    pub fn queue_handle(&self) -> vk::Queue {
        self.queue
    }

    /// Command buffer currently open for recording
    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffers[self.frame_ring.current_slot() as usize]
    }

    /// Queue a semaphore the next end-of-frame submit must wait on
    pub fn queue_wait_semaphore(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) {
        self.pending_wait_semaphores.push(semaphore);
        self.pending_wait_stages.push(stage);
    }

    /// Queue a semaphore the next end-of-frame submit must signal
    pub fn queue_signal_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.pending_signal_semaphores.push(semaphore);
    }

    /// Submit the open command buffer and open the next one
    ///
    /// When `consume_semaphores` is set, the queued frame-boundary
    /// semaphores are attached to this submit and the pending lists are
    /// drained. Returns the raw result so the device can inspect it for
    /// `VK_ERROR_DEVICE_LOST`.
    pub fn commit_and_next_command_buffer(
        &mut self,
        consume_semaphores: bool,
    ) -> std::result::Result<(), vk::Result> {
        unsafe {
            let current_slot = self.frame_ring.current_slot() as usize;
            let current = self.command_buffers[current_slot];
            self.device.end_command_buffer(current)?;

            let (wait_semaphores, wait_stages, signal_semaphores) = if consume_semaphores {
                (
                    std::mem::take(&mut self.pending_wait_semaphores),
                    std::mem::take(&mut self.pending_wait_stages),
                    std::mem::take(&mut self.pending_signal_semaphores),
                )
            } else {
                (Vec::new(), Vec::new(), Vec::new())
            };

            let command_buffers = [current];
            let mut submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            if !wait_semaphores.is_empty() {
                submit_info = submit_info
                    .wait_semaphores(&wait_semaphores)
                    .wait_dst_stage_mask(&wait_stages);
            }
            if !signal_semaphores.is_empty() {
                submit_info = submit_info.signal_semaphores(&signal_semaphores);
            }

            self.device
                .queue_submit(self.queue, &[submit_info], self.fences[current_slot])?;

            // Rotate to the next slot and get its command buffer recording
            self.frame_ring.advance();
            let next_slot = self.frame_ring.current_slot() as usize;

            self.device
                .wait_for_fences(&[self.fences[next_slot]], true, u64::MAX)?;
            self.device.reset_fences(&[self.fences[next_slot]])?;

            self.device.reset_command_buffer(
                self.command_buffers[next_slot],
                vk::CommandBufferResetFlags::empty(),
            )?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(self.command_buffers[next_slot], &begin_info)?;

            Ok(())
        }
    }

    /// Drop frame-boundary semaphores after a full pipeline drain
    ///
    /// A drain consumes or invalidates everything that was queued; the
    /// presentation path re-queues what it still needs.
    pub fn notify_device_stalled(&mut self) {
        self.pending_wait_semaphores.clear();
        self.pending_wait_stages.clear();
        self.pending_signal_semaphores.clear();
    }

    /// Free the pool, buffers and fences. Idempotent
    ///
    /// The caller must guarantee the GPU no longer uses them (the device
    /// stalls before destroying queues).
    pub fn destroy(&mut self) {
        if self.command_pool == vk::CommandPool::null() {
            return;
        }
        unsafe {
            for &fence in &self.fences {
                self.device.destroy_fence(fence, None);
            }
            self.fences.clear();

            // Destroying the pool frees its command buffers too
            self.device.destroy_command_pool(self.command_pool, None);
            self.command_pool = vk::CommandPool::null();
            self.command_buffers.clear();
        }
    }
}
