/// Ring cursor over per-frame resource slots.
///
/// Dynamic buffers and command recording keep one copy of their state
/// per frame in flight. `FrameRing` tracks which slot the CPU currently
/// writes while the GPU consumes the older ones. `advance` moves to the
/// next slot at a frame boundary; `regress` undoes one advance when a
/// frame is abandoned before submission.
///
/// # Example
///
/// ```ignore
/// let mut ring = FrameRing::new(3);
/// assert_eq!(ring.current_slot(), 0);
/// ring.advance();   // new frame, slot 1
/// assert_eq!(ring.current_slot(), 1);
/// ring.regress();   // frame abandoned, back to slot 0
/// assert_eq!(ring.current_slot(), 0);
/// ```
pub struct FrameRing {
    slot_count: u32,
    cursor: u32,
}

impl FrameRing {
    /// Create a ring of `slot_count` slots with the cursor on slot 0
    pub fn new(slot_count: u32) -> Self {
        debug_assert!(slot_count > 0, "a frame ring needs at least one slot");
        Self {
            slot_count,
            cursor: 0,
        }
    }

    /// Number of slots in the ring
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Slot the cursor is currently on
    pub fn current_slot(&self) -> u32 {
        self.cursor
    }

    /// Slot the cursor would land on after one `advance`, without moving
    pub fn next_slot(&self) -> u32 {
        (self.cursor + 1) % self.slot_count
    }

    /// Move the cursor one slot forward, wrapping at `slot_count`
    pub fn advance(&mut self) -> u32 {
        self.cursor = self.next_slot();
        self.cursor
    }

    /// Move the cursor one slot backward, wrapping below slot 0
    pub fn regress(&mut self) -> u32 {
        self.cursor = (self.cursor + self.slot_count - 1) % self.slot_count;
        self.cursor
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "frame_ring_tests.rs"]
mod tests;
