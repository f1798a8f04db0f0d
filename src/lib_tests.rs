// Tests for lib.rs: interrupt flag and error type rendering

use super::*;
use serial_test::serial;
use std::time::Duration;

// ==================== INTERRUPT HANDLING TESTS ====================

#[test]
#[serial]
fn test_interrupt_initially_not_set() {
    reset_interrupted();
    assert!(!is_interrupted(), "Interrupt flag should initially be not set");
}

#[test]
#[serial]
fn test_set_interrupt_flag() {
    reset_interrupted();
    set_interrupted();
    assert!(is_interrupted(), "Interrupt flag should be set");
    reset_interrupted();
}

#[test]
#[serial]
fn test_interrupt_flag_persists_until_reset() {
    reset_interrupted();
    set_interrupted();
    assert!(is_interrupted());
    assert!(is_interrupted(), "Flag should remain set on subsequent calls");
    reset_interrupted();
    assert!(!is_interrupted());
}

// ==================== VERIFY ERROR TESTS ====================

#[test]
fn test_stimulus_failed_names_operation() {
    let err = VerifyError::StimulusFailed {
        operation: "create RAID-1".to_string(),
        reason: "not enough drives".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "stimulus 'create RAID-1' could not be issued: not enough drives"
    );
}

#[test]
fn test_expectation_timeout_renders_window() {
    let err = VerifyError::ExpectationTimeout {
        expectation: "ld-degraded for vd0".to_string(),
        waited: Duration::from_secs(120),
    };
    assert_eq!(err.to_string(), "ld-degraded for vd0 was not observed within 2m");
}

#[test]
fn test_mismatch_carries_both_paths() {
    let err = VerifyError::mismatch("bios version", "sdk", "7.17.01.0", "cli", "7.17.00.0");
    let text = err.to_string();
    assert!(text.starts_with("bios version mismatch"));
    assert!(text.contains("sdk reports \"7.17.01.0\""));
    assert!(text.contains("cli reports \"7.17.00.0\""));

    match err {
        VerifyError::StateMismatch { field, left, right, .. } => {
            assert_eq!(field, "bios version");
            assert_eq!(left, "7.17.01.0");
            assert_eq!(right, "7.17.00.0");
        }
        other => panic!("unexpected variant {:?}", other),
    }
}

#[test]
fn test_missing_property_names_reader_and_key() {
    let err = VerifyError::MissingProperty {
        reader: "cli",
        key: "sas_address".to_string(),
    };
    assert_eq!(err.to_string(), "cli returned no value for 'sas_address'");
}

#[test]
fn test_io_error_converts() {
    fn read() -> VerifyResult<()> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "report dir"))?;
        Ok(())
    }
    let err = read().unwrap_err();
    assert!(matches!(err, VerifyError::Io(_)));
    assert!(err.to_string().contains("I/O error"));
}

#[test]
fn test_interrupted_message() {
    assert_eq!(
        VerifyError::Interrupted.to_string(),
        "operation interrupted by user"
    );
}
