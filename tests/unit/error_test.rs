//! Tests for error types

use std::time::Duration;

use prometheus_gates::GateError;

#[test]
fn test_configuration_error() {
    let err = GateError::Configuration("capacity must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: capacity must be greater than 0"
    );
}

#[test]
fn test_timeout_error() {
    let err = GateError::Timeout(Duration::from_millis(250));
    assert_eq!(format!("{}", err), "timed out after 250ms");
}

#[test]
fn test_circuit_open_error() {
    let err = GateError::CircuitOpen {
        retry_after: Duration::from_secs(1),
    };
    assert_eq!(format!("{}", err), "circuit open, retry after 1s");
}

#[test]
fn test_double_release_error() {
    let err = GateError::DoubleRelease { permit: 4 };
    assert_eq!(format!("{}", err), "permit 4 released more than once");
}

#[test]
fn test_task_error_keeps_message() {
    let err = GateError::task(std::io::Error::other("disk gone"));
    assert_eq!(format!("{}", err), "task failed: disk gone");
    assert!(!err.is_defect());
}

#[test]
fn test_lifecycle_errors() {
    assert_eq!(format!("{}", GateError::Cancelled), "acquisition cancelled");
    assert_eq!(format!("{}", GateError::Draining), "scheduler is draining");
    assert_eq!(
        format!("{}", GateError::ForeignPermit),
        "permit was issued by a different gate"
    );
}
