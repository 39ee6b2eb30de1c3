//! Tests for error types

use std::io;

use trueno_results::error::StorageOp;
use trueno_results::store::KeyedObjectStore;
use trueno_results::Error;

#[test]
fn test_storage_error_names_key_and_operation() {
    let error = Error::Storage {
        key: "experiments/e1/summary".to_string(),
        op: StorageOp::Save,
        source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only filesystem"),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("save"));
    assert!(error_str.contains("experiments/e1/summary"));
    assert!(error_str.contains("read-only filesystem"));
    assert!(std::error::Error::source(&error).is_some());
}

#[test]
fn test_serialization_error() {
    let error = Error::Serialization {
        key: "experiments/e1/algorithms/orb".to_string(),
        message: "expected value at line 1".to_string(),
    };
    assert!(error.is_serialization());
    assert!(format!("{error}").contains("expected value"));
}

#[test]
fn test_integrity_error() {
    let error = Error::Integrity {
        url: "/assets/experiments/e1/trajectories/orb.ui.arrow".to_string(),
        message: "size changed".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Integrity check failed"));
    assert!(error_str.contains("orb.ui.arrow"));
    assert!(!error.is_serialization());
}

#[test]
fn test_invalid_key_is_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let store = KeyedObjectStore::open(dir.path()).unwrap();
    let err = store.load("../escape").unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn test_from_conversions() {
    let io_err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(io_err, Error::Io(_)));

    let json_err: Error = serde_json::from_str::<u32>("x").unwrap_err().into();
    assert!(matches!(json_err, Error::Json(_)));
    assert!(format!("{json_err}").starts_with("JSON error"));
}
