/// VulkanBufferInterface - persistent-mapped ring access to one buffer
///
/// Multiplexes a buffer's CPU-visible memory across N in-flight frames.
/// The CPU writes ring slot `k` while the GPU still reads earlier slots;
/// `advance_frame` rotates the write slot once per rendered frame, paced
/// by the pool's frame-in-flight count, so a `map` never lands on memory
/// the GPU is consuming.

use nebula_3d_render::gpu_err;
use nebula_3d_render::nebula3d::utils::Ownership;
use nebula_3d_render::nebula3d::{
    BufferPacked, Error, FrameRing, MappingState, Result, SharedBufferPool, UnmapOptions,
};

use crate::vulkan_device::{VulkanDevice, SRC_VALID_ACCESS_FLAGS};

use ash::vk;

use std::ptr::NonNull;
use std::sync::Arc;

/// Byte offset of `element_start` in ring slot `slot`, relative to the
/// buffer's own region base
fn mapped_offset_bytes(buffer: &BufferPacked, slot: u32, element_start: usize) -> usize {
    (slot as usize * buffer.element_count + element_start) * buffer.bytes_per_element
}

/// Resolve the caller's flush subrange against the last mapped span
///
/// `flush_size == 0` means the whole mapped span from `flush_start` on.
/// Returns (absolute start element, size in elements).
fn flush_span(
    last_start: usize,
    last_count: usize,
    flush_start: usize,
    flush_size: usize,
) -> (usize, usize) {
    let size = if flush_size == 0 {
        last_count - flush_start
    } else {
        flush_size
    };
    (last_start + flush_start, size)
}

/// Round a byte range outward to the non-coherent atom granularity
fn round_range_to_atom(start: u64, size: u64, atom: u64) -> (u64, u64) {
    let rounded_start = (start / atom) * atom;
    let rounded_end = ((start + size + atom - 1) / atom) * atom;
    (rounded_start, rounded_end - rounded_start)
}

/// Per-buffer mapping object handed out by the resource pool
///
/// Holds the opaque pool index identifying the backing region, the raw
/// CPU-visible pointer for that region (owned until released back to the
/// pool), and the ring cursor selecting which per-frame slot the next
/// write lands in.
pub struct VulkanBufferInterface {
    vbo_pool_idx: usize,
    buffer: vk::Buffer,
    buffer_packed: Arc<BufferPacked>,

    device: ash::Device,
    memory: vk::DeviceMemory,
    memory_region_offset: u64,
    non_coherent_atom_size: u64,
    supported_stages: vk::PipelineStageFlags,

    // Region base pointer; Owned means destruction returns the region
    // to the pool, External means the pool already took it back
    data_ptr: Ownership<NonNull<u8>>,
    mapped_ptr: Option<NonNull<u8>>,
    mapping_state: MappingState,
    last_mapping_start: usize,
    last_mapping_count: usize,

    ring: FrameRing,
    pool: SharedBufferPool,
}

impl VulkanBufferInterface {
    /// Wrap one allocated region of a pool buffer
    ///
    /// # Arguments
    ///
    /// * `device` - Device the pool allocated from; supplies the flush
    ///   granularity and barrier stage mask
    /// * `vbo_pool_idx` - Opaque index of the backing pool
    /// * `buffer` - Pool buffer this region lives in (not owned here)
    /// * `memory` / `memory_region_offset` - Backing memory and the
    ///   region's byte offset in it, for explicit flushes
    /// * `buffer_packed` - Element geometry of the wrapped buffer
    /// * `data_ptr` - CPU-visible base of the region, covering all ring
    ///   slots; owned by this interface until released
    /// * `pool` - Pool to notify when the region is released
    pub fn new(
        device: &VulkanDevice,
        vbo_pool_idx: usize,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        memory_region_offset: u64,
        buffer_packed: Arc<BufferPacked>,
        data_ptr: NonNull<u8>,
        pool: SharedBufferPool,
    ) -> Result<Self> {
        let logical_device = device
            .logical_device()
            .ok_or_else(|| {
                Error::InvalidResource(
                    "Buffer interface requires a created logical device".to_string(),
                )
            })?
            .clone();

        let slot_count = if buffer_packed.buffer_type.is_dynamic() {
            pool.dynamic_buffer_multiplier().max(1)
        } else {
            1
        };

        Ok(Self {
            vbo_pool_idx,
            buffer,
            buffer_packed,
            device: logical_device,
            memory,
            memory_region_offset,
            non_coherent_atom_size: device.non_coherent_atom_size(),
            supported_stages: device.supported_stages(),
            data_ptr: Ownership::Owned(data_ptr),
            mapped_ptr: None,
            mapping_state: MappingState::Unmapped,
            last_mapping_start: 0,
            last_mapping_count: 0,
            ring: FrameRing::new(slot_count),
            pool,
        })
    }

    pub fn vbo_pool_idx(&self) -> usize {
        self.vbo_pool_idx
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn buffer_packed(&self) -> &BufferPacked {
        &self.buffer_packed
    }

    /// Region base pointer, valid whether or not ownership was released
    pub fn data_ptr(&self) -> NonNull<u8> {
        *self.data_ptr.get()
    }

    pub fn mapping_state(&self) -> MappingState {
        self.mapping_state
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped_ptr.is_some()
    }

    /// Ring slot the next write lands in
    pub fn current_frame_slot(&self) -> u32 {
        self.ring.current_slot()
    }

    /// Element offset the GPU should bind for the current slot
    pub fn final_buffer_start_elements(&self) -> usize {
        self.buffer_packed.slot_start_elements(self.ring.current_slot())
    }

    /// Map `[element_start, element_start + element_count)` for writing
    ///
    /// With `advance_frame` set the ring rotates first, so the returned
    /// pointer targets the next per-frame slot; without it the current
    /// slot is reused, which is how multiple partial writes within one
    /// frame work. `prev_mapping_state` must reflect the caller's view
    /// of the mapping; a fresh map and a persistent re-map differ only
    /// in bookkeeping here because pool memory stays mapped.
    pub fn map(
        &mut self,
        element_start: usize,
        element_count: usize,
        prev_mapping_state: MappingState,
        advance_frame: bool,
    ) -> NonNull<u8> {
        debug_assert!(
            self.buffer_packed.buffer_type.is_dynamic(),
            "map called on a non-dynamic buffer"
        );
        debug_assert!(
            element_start + element_count <= self.buffer_packed.element_count,
            "Mapping range {}..{} exceeds buffer capacity {}",
            element_start,
            element_start + element_count,
            self.buffer_packed.element_count
        );
        debug_assert!(
            prev_mapping_state == self.mapping_state,
            "prev_mapping_state {:?} does not match the live state {:?}",
            prev_mapping_state,
            self.mapping_state
        );

        if advance_frame {
            self.ring.advance();
        }

        let offset = mapped_offset_bytes(&self.buffer_packed, self.ring.current_slot(), element_start);
        // In bounds per the capacity check above
        let ptr = unsafe { NonNull::new_unchecked(self.data_ptr.get().as_ptr().add(offset)) };

        self.mapped_ptr = Some(ptr);
        self.mapping_state = if self.buffer_packed.buffer_type.is_persistent() {
            MappingState::PersistentMapped
        } else {
            MappingState::Mapped
        };
        self.last_mapping_start = element_start;
        self.last_mapping_count = element_count;
        ptr
    }

    /// End the current write session, flushing written elements
    ///
    /// `flush_start_elem`/`flush_size_elem` select a subrange of the
    /// last mapped span to flush (`flush_size_elem == 0` flushes from
    /// `flush_start_elem` to the end of the span). Coherent memory
    /// needs no flush; non-coherent ranges are rounded outward to the
    /// device's non-coherent atom size. `KeepPersistent` flushes but
    /// leaves the mapping live for further writes.
    pub fn unmap(
        &mut self,
        option: UnmapOptions,
        flush_start_elem: usize,
        flush_size_elem: usize,
    ) -> Result<()> {
        debug_assert!(
            self.mapped_ptr.is_some(),
            "unmap called on a buffer that is not mapped"
        );
        if self.mapped_ptr.is_none() {
            return Err(Error::InvalidResource(
                "unmap called on a buffer that is not mapped".to_string(),
            ));
        }
        debug_assert!(
            flush_start_elem + flush_size_elem <= self.last_mapping_count,
            "Flush range {}+{} exceeds the mapped span of {} elements",
            flush_start_elem,
            flush_size_elem,
            self.last_mapping_count
        );
        debug_assert!(
            option == UnmapOptions::UnmapAll || self.buffer_packed.buffer_type.is_persistent(),
            "KeepPersistent on a non-persistent buffer"
        );

        if !self.buffer_packed.buffer_type.is_coherent() {
            let (start_elem, size_elems) = flush_span(
                self.last_mapping_start,
                self.last_mapping_count,
                flush_start_elem,
                flush_size_elem,
            );
            self.flush_elements(start_elem, size_elems)?;
        }

        if option == UnmapOptions::UnmapAll {
            self.mapped_ptr = None;
            self.mapping_state = MappingState::Unmapped;
        }
        Ok(())
    }

    /// Rotate the write cursor to the next per-frame slot
    ///
    /// Called once per rendered frame by the frame driver.
    pub fn advance_frame(&mut self) {
        debug_assert!(
            self.buffer_packed.buffer_type.is_dynamic(),
            "advance_frame on a non-dynamic buffer"
        );
        self.ring.advance();
    }

    /// Undo one `advance_frame` after an aborted frame submission
    pub fn regress_frame(&mut self) {
        self.ring.regress();
    }

    /// Initial data upload, valid only before any frame was presented
    ///
    /// Writes the current slot directly with no ring rotation; there is
    /// no prior GPU read to race with yet.
    pub fn _first_upload(
        &mut self,
        data: &[u8],
        element_start: usize,
        element_count: usize,
    ) -> Result<()> {
        debug_assert!(
            element_start + element_count <= self.buffer_packed.element_count,
            "Upload range {}..{} exceeds buffer capacity {}",
            element_start,
            element_start + element_count,
            self.buffer_packed.element_count
        );
        debug_assert_eq!(
            data.len(),
            element_count * self.buffer_packed.bytes_per_element,
            "Upload data length does not match the element range"
        );

        let offset = mapped_offset_bytes(&self.buffer_packed, self.ring.current_slot(), element_start);
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.data_ptr.get().as_ptr().add(offset),
                data.len(),
            );
        }

        if !self.buffer_packed.buffer_type.is_coherent() {
            self.flush_elements(element_start, element_count)?;
        }
        Ok(())
    }

    /// Record a device-side copy into another interface's backing buffer
    ///
    /// Must be recorded on a transfer-capable queue (the graphics queue
    /// qualifies). Neither side may have an open CPU mapping; the result
    /// is undefined otherwise.
    pub fn copy_to(
        &self,
        cmd: vk::CommandBuffer,
        dst: &VulkanBufferInterface,
        dst_offset_bytes: u64,
        src_offset_bytes: u64,
        size_bytes: u64,
    ) {
        debug_assert!(
            self.mapped_ptr.is_none() && dst.mapped_ptr.is_none(),
            "copy_to with an open CPU mapping is undefined"
        );

        unsafe {
            // Make every prior write available to the transfer
            let before = vk::MemoryBarrier::default()
                .src_access_mask(SRC_VALID_ACCESS_FLAGS)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
            self.device.cmd_pipeline_barrier(
                cmd,
                self.supported_stages & !vk::PipelineStageFlags::HOST,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[before],
                &[],
                &[],
            );

            let region = vk::BufferCopy::default()
                .src_offset(src_offset_bytes)
                .dst_offset(dst_offset_bytes)
                .size(size_bytes);
            self.device.cmd_copy_buffer(cmd, self.buffer, dst.buffer, &[region]);

            // Make the copy visible to whatever reads it next
            let after = vk::MemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::MEMORY_READ);
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                self.supported_stages & !vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[after],
                &[],
                &[],
            );
        }
    }

    /// Rebind to a different owning buffer object
    ///
    /// Invoked when pool defragmentation reassigns the high-level buffer
    /// to this interface.
    pub fn _notify_buffer(&mut self, buffer: Arc<BufferPacked>) {
        self.buffer_packed = buffer;
    }

    /// Give the region pointer's ownership back to the pool
    ///
    /// The pointer stays readable, but destruction will no longer report
    /// the region as released; the pool reclaims it itself.
    pub fn release_data_ptr(&mut self) {
        let ptr = *self.data_ptr.get();
        self.data_ptr = Ownership::External(ptr);
    }

    fn flush_elements(&self, start_elem: usize, size_elems: usize) -> Result<()> {
        let start_bytes = self.memory_region_offset
            + mapped_offset_bytes(&self.buffer_packed, self.ring.current_slot(), start_elem) as u64;
        let size_bytes = (size_elems * self.buffer_packed.bytes_per_element) as u64;
        let (atom_start, atom_size) =
            round_range_to_atom(start_bytes, size_bytes, self.non_coherent_atom_size);

        let range = vk::MappedMemoryRange::default()
            .memory(self.memory)
            .offset(atom_start)
            .size(atom_size);
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }.map_err(|e| {
            gpu_err!(
                "nebula3d::vulkan",
                "Failed to flush mapped range: {:?}",
                e
            )
        })?;
        Ok(())
    }
}

impl Drop for VulkanBufferInterface {
    fn drop(&mut self) {
        debug_assert!(
            self.mapped_ptr.is_none(),
            "Buffer interface destroyed while mapped"
        );
        // Only a still-owned region goes back to the pool
        if self.data_ptr.is_owned() {
            self.pool.notify_region_released(
                self.vbo_pool_idx,
                self.buffer_packed.internal_buffer_start,
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "vulkan_buffer_interface_tests.rs"]
mod tests;
