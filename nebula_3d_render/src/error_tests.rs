//! Unit tests for error.rs
//!
//! Tests all Error variants and their implementations (Display, Debug, Clone, std::error::Error).

use crate::error::{Error, Result};

// ============================================================================
// ERROR DISPLAY TESTS
// ============================================================================

#[test]
fn test_backend_error_display() {
    let err = Error::BackendError("Vulkan initialization failed".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Backend error"));
    assert!(display.contains("Vulkan initialization failed"));
}

#[test]
fn test_out_of_memory_display() {
    let err = Error::OutOfMemory;
    let display = format!("{}", err);
    assert_eq!(display, "Out of GPU memory");
}

#[test]
fn test_invalid_resource_display() {
    let err = Error::InvalidResource("Buffer already mapped".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Invalid resource"));
    assert!(display.contains("Buffer already mapped"));
}

#[test]
fn test_initialization_failed_display() {
    let err = Error::InitializationFailed("No graphics queue family".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Initialization failed"));
    assert!(display.contains("No graphics queue family"));
}

#[test]
fn test_device_lost_display() {
    let err = Error::DeviceLost("ERROR_DEVICE_LOST".to_string());
    let display = format!("{}", err);
    assert!(display.contains("Device lost"));
    assert!(display.contains("ERROR_DEVICE_LOST"));
}

// ============================================================================
// ERROR TRAIT IMPLEMENTATIONS
// ============================================================================

#[test]
fn test_error_is_std_error() {
    let err = Error::OutOfMemory;
    // Verify Error implements std::error::Error trait
    let _: &dyn std::error::Error = &err;
}

#[test]
fn test_error_debug() {
    let err1 = Error::BackendError("test".to_string());
    let debug1 = format!("{:?}", err1);
    assert!(debug1.contains("BackendError"));

    let err2 = Error::OutOfMemory;
    let debug2 = format!("{:?}", err2);
    assert!(debug2.contains("OutOfMemory"));

    let err3 = Error::InvalidResource("resource".to_string());
    let debug3 = format!("{:?}", err3);
    assert!(debug3.contains("InvalidResource"));

    let err4 = Error::InitializationFailed("init".to_string());
    let debug4 = format!("{:?}", err4);
    assert!(debug4.contains("InitializationFailed"));

    let err5 = Error::DeviceLost("lost".to_string());
    let debug5 = format!("{:?}", err5);
    assert!(debug5.contains("DeviceLost"));
}

#[test]
fn test_error_clone() {
    let err1 = Error::BackendError("test".to_string());
    let err2 = err1.clone();
    assert_eq!(format!("{}", err1), format!("{}", err2));

    let err3 = Error::DeviceLost("reason".to_string());
    let err4 = err3.clone();
    assert_eq!(format!("{}", err3), format!("{}", err4));
}

// ============================================================================
// RESULT TYPE TESTS
// ============================================================================

#[test]
fn test_result_type_ok() {
    fn returns_ok() -> Result<i32> {
        Ok(42)
    }

    let result = returns_ok();
    assert!(result.is_ok());
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn test_result_type_err() {
    fn returns_error() -> Result<i32> {
        Err(Error::OutOfMemory)
    }

    let result = returns_error();
    assert!(result.is_err());

    if let Err(e) = result {
        assert_eq!(format!("{}", e), "Out of GPU memory");
    }
}

// ============================================================================
// ERROR PROPAGATION TESTS
// ============================================================================

#[test]
fn test_error_propagation_with_question_mark() {
    fn inner() -> Result<i32> {
        Err(Error::DeviceLost("submit failed".to_string()))
    }

    fn outer() -> Result<i32> {
        inner()?;
        Ok(42)
    }

    let result = outer();
    assert!(result.is_err());
}

#[test]
fn test_error_message_content() {
    // Error messages must name the specific capability or handle involved
    let err1 = Error::InitializationFailed(
        "Required device extension 'VK_KHR_swapchain' is not supported".to_string(),
    );
    assert!(format!("{}", err1).contains("VK_KHR_swapchain"));

    let err2 = Error::InvalidResource("map range 120..140 exceeds capacity 128".to_string());
    assert!(format!("{}", err2).contains("120..140"));
}
