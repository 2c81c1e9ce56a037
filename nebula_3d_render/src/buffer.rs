/// Buffer protocol types shared between the render core and GPU backends
///
/// A backend buffer interface multiplexes one CPU-visible allocation across
/// the frames in flight (see `FrameRing`). The types here describe what is
/// being multiplexed and how the CPU side is currently mapped; the actual
/// memory operations live in the backend crates.

use std::sync::Arc;

// ============================================================================
// Mapping protocol
// ============================================================================

/// CPU mapping state of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    /// No CPU pointer is live
    Unmapped,
    /// Mapped for the duration of one write session
    Mapped,
    /// Mapped once at creation and kept mapped across frames
    PersistentMapped,
}

/// How `unmap` should treat the current mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapOptions {
    /// Flush the written range and drop the CPU pointer
    UnmapAll,
    /// Flush the written range but keep a persistent pointer live
    KeepPersistent,
}

/// Placement and update strategy of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferType {
    /// Device-local memory, written through staging copies
    Default,
    /// Host-visible ring, mapped and unmapped per write session
    DynamicDefault,
    /// Host-visible ring, persistently mapped, explicit flush required
    DynamicPersistent,
    /// Host-visible ring, persistently mapped, coherent (flush is a no-op)
    DynamicPersistentCoherent,
}

impl BufferType {
    /// Whether the buffer keeps one copy per frame in flight
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, BufferType::Default)
    }

    /// Whether the CPU pointer stays live across frames
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            BufferType::DynamicPersistent | BufferType::DynamicPersistentCoherent
        )
    }

    /// Whether CPU writes become GPU-visible without an explicit flush
    pub fn is_coherent(&self) -> bool {
        matches!(self, BufferType::DynamicPersistentCoherent)
    }
}

// ============================================================================
// Buffer descriptor
// ============================================================================

/// Descriptor of one logical buffer carved out of a pool block
///
/// Sizes are expressed in elements. Dynamic buffers own
/// `element_count * dynamic_buffer_multiplier` elements of backing
/// storage; `slot_start_elements` resolves where a given ring slot
/// begins inside the pool block.
#[derive(Debug, Clone)]
pub struct BufferPacked {
    /// Placement strategy the pool allocated this buffer with
    pub buffer_type: BufferType,
    /// Number of elements visible to the caller (one ring slot)
    pub element_count: usize,
    /// Stride of one element in bytes
    pub bytes_per_element: usize,
    /// First element of slot 0, counted from the start of the pool block
    pub internal_buffer_start: usize,
}

impl BufferPacked {
    pub fn new(
        buffer_type: BufferType,
        element_count: usize,
        bytes_per_element: usize,
        internal_buffer_start: usize,
    ) -> Self {
        Self {
            buffer_type,
            element_count,
            bytes_per_element,
            internal_buffer_start,
        }
    }

    /// Size of one ring slot in bytes
    pub fn size_bytes(&self) -> usize {
        self.element_count * self.bytes_per_element
    }

    /// First element of ring slot `slot`, counted from the pool block start
    pub fn slot_start_elements(&self, slot: u32) -> usize {
        self.internal_buffer_start + self.element_count * slot as usize
    }

    /// Byte offset of ring slot `slot` inside the pool block
    pub fn slot_start_bytes(&self, slot: u32) -> usize {
        self.slot_start_elements(slot) * self.bytes_per_element
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Resource-pool allocator as seen from a backend buffer interface
///
/// The pool decides buffer placement and owns the backing memory blocks.
/// Backend buffer interfaces hold an `Arc<dyn BufferPool>` and report
/// back when a region they reference stops being used.
pub trait BufferPool: Send + Sync {
    /// Ring depth the pool allocated dynamic buffers with
    ///
    /// Matches the frame-in-flight count negotiated at device creation.
    fn dynamic_buffer_multiplier(&self) -> u32;

    /// A buffer interface released the region starting at
    /// `internal_buffer_start` (in elements) inside pool `vbo_pool_idx`
    fn notify_region_released(&self, vbo_pool_idx: usize, internal_buffer_start: usize);

    /// The device opened a fresh command buffer after a submission
    ///
    /// Pools use this to retire staging work recorded into the
    /// previous command buffer.
    fn notify_new_command_buffer(&self);
}

/// Convenience alias for the shared pool handle backends store
pub type SharedBufferPool = Arc<dyn BufferPool>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
