use super::*;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// ============================================================================
// DeviceConfig tests
// ============================================================================

#[test]
fn test_default_config() {
    let config = DeviceConfig::default();
    assert_eq!(config.app_name, "Nebula3D Application");
    assert_eq!(config.device_name, None);
    assert_eq!(config.frames_in_flight, 2);
    assert_eq!(config.max_compute_queues, 1);
    assert_eq!(config.max_transfer_queues, 1);
}

#[test]
fn test_config_is_cloneable() {
    let config = DeviceConfig {
        device_name: Some("NVIDIA GeForce RTX 3080".to_string()),
        ..Default::default()
    };
    let copy = config.clone();
    assert_eq!(copy.device_name.as_deref(), Some("NVIDIA GeForce RTX 3080"));
}

// ============================================================================
// SubmissionType tests
// ============================================================================

#[test]
fn test_submission_types_are_distinct() {
    assert_ne!(SubmissionType::FlushOnly, SubmissionType::NewFrameIdx);
    assert_ne!(SubmissionType::NewFrameIdx, SubmissionType::EndFrameAndSwap);
    assert_ne!(SubmissionType::FlushOnly, SubmissionType::EndFrameAndSwap);
}

// ============================================================================
// RenderSystem trait tests
// ============================================================================

struct CountingRenderSystem {
    stalls: AtomicU32,
}

impl RenderSystem for CountingRenderSystem {
    fn notify_device_stalled(&self) {
        self.stalls.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_render_system_is_object_safe() {
    let system = Arc::new(CountingRenderSystem {
        stalls: AtomicU32::new(0),
    });
    let shared: Arc<dyn RenderSystem> = system.clone();

    shared.notify_device_stalled();
    shared.notify_device_stalled();

    assert_eq!(system.stalls.load(Ordering::SeqCst), 2);
}
