use harbor_sync::{DEFAULT_MAX_RETRIES, SyncConfig, SyncError};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn defaults() {
    let config = SyncConfig::default();
    assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
    assert_eq!(config.local_field_prefix, "_");
    assert_eq!(config.owner_fields, vec!["userId", "ownerId"]);
    assert!(config.schemas.is_empty());
}

#[test]
fn loads_partial_file_with_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "max_retries": 3,
            "key_prefix": "app",
            "schemas": [{{"collection": "medications", "preserved_fields": ["currentAlarmId"]}}]
        }}"#
    )
    .unwrap();

    let config = SyncConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.max_retries, 3);
    assert_eq!(config.key_prefix, "app");
    assert_eq!(config.drain_debounce_ms, SyncConfig::default().drain_debounce_ms);

    let registry = config.schema_registry();
    let schema = registry.schema_for("medications");
    assert_eq!(schema.preserved_fields, vec!["currentAlarmId"]);
    assert_eq!(schema.archive_field, "archived");
    assert!(!registry.is_registered("notes"));
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SyncConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}

#[test]
fn malformed_file_is_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "max_retries = 3").unwrap();
    let err = SyncConfig::from_json_file(file.path()).unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
}
