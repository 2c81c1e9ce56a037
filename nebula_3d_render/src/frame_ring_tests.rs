use super::*;

// ============================================================================
// Cursor movement tests
// ============================================================================

#[test]
fn test_new_starts_on_slot_zero() {
    let ring = FrameRing::new(3);
    assert_eq!(ring.current_slot(), 0);
    assert_eq!(ring.slot_count(), 3);
}

#[test]
fn test_advance_wraps_at_slot_count() {
    let mut ring = FrameRing::new(3);
    assert_eq!(ring.advance(), 1);
    assert_eq!(ring.advance(), 2);
    assert_eq!(ring.advance(), 0); // wrapped
    assert_eq!(ring.advance(), 1);
}

#[test]
fn test_regress_wraps_below_zero() {
    let mut ring = FrameRing::new(3);
    assert_eq!(ring.regress(), 2); // 0 - 1 wraps to the last slot
    assert_eq!(ring.regress(), 1);
    assert_eq!(ring.regress(), 0);
}

#[test]
fn test_regress_undoes_advance() {
    let mut ring = FrameRing::new(4);
    for start in 0..8u32 {
        let before = ring.current_slot();
        ring.advance();
        ring.regress();
        assert_eq!(ring.current_slot(), before, "cycle {}", start);
        ring.advance();
    }
}

#[test]
fn test_next_slot_does_not_move_the_cursor() {
    let mut ring = FrameRing::new(2);
    assert_eq!(ring.next_slot(), 1);
    assert_eq!(ring.current_slot(), 0); // unchanged
    ring.advance();
    assert_eq!(ring.next_slot(), 0);
    assert_eq!(ring.current_slot(), 1);
}

// ============================================================================
// Modulo property tests
// ============================================================================

#[test]
fn test_slot_is_advance_count_modulo_slot_count() {
    for slot_count in 1..=4u32 {
        let mut ring = FrameRing::new(slot_count);
        for k in 1..=20u32 {
            ring.advance();
            assert_eq!(
                ring.current_slot(),
                k % slot_count,
                "after {} advances of a {}-slot ring",
                k,
                slot_count
            );
        }
    }
}

#[test]
fn test_single_slot_ring_never_leaves_zero() {
    let mut ring = FrameRing::new(1);
    for _ in 0..5 {
        assert_eq!(ring.advance(), 0);
        assert_eq!(ring.regress(), 0);
        assert_eq!(ring.next_slot(), 0);
    }
}
