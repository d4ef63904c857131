//! Configuration tests

use redis_helper::{CacheSettings, ConnectionConfig, SerializationMode};
use std::io::Write;
use std::time::Duration;

// =============================================================================
// Defaults Tests
// =============================================================================

#[test]
fn test_connection_config_defaults() {
  let config = ConnectionConfig::default();
  assert_eq!(config.endpoints, "");
  assert!(config.password.is_none());
  assert_eq!(config.default_database, 0);
  assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
  assert_eq!(config.sync_timeout(), Duration::from_millis(5000));
  assert_eq!(config.async_timeout(), Duration::from_millis(5000));
  assert_eq!(config.serialization, SerializationMode::Structured);
  assert!(config.diagnostics.is_none());
}

#[test]
fn test_settings_defaults() {
  let settings = CacheSettings::default();
  assert_eq!(settings.logging.level, "info");
  assert_eq!(settings.redis.endpoints, "");
}

#[test]
fn test_builder() {
  let config = ConnectionConfig::new("a:1,b:2")
    .with_password("pwd")
    .with_default_database(2)
    .with_serialization(SerializationMode::Binary)
    .with_timeouts(100, 200, 300);
  assert_eq!(config.password.as_deref(), Some("pwd"));
  assert_eq!(config.default_database, 2);
  assert_eq!(config.serialization, SerializationMode::Binary);
  assert_eq!(config.connect_timeout(), Duration::from_millis(100));
  assert_eq!(config.sync_timeout(), Duration::from_millis(200));
  assert_eq!(config.async_timeout(), Duration::from_millis(300));
  assert!(config.validate().is_ok());
}

#[test]
fn test_endpoint_list_splits_and_trims() {
  let config = ConnectionConfig::new(" 10.0.0.1:6379 ,10.0.0.2:6380,, ");
  assert_eq!(
    config.endpoint_list(),
    vec!["10.0.0.1:6379".to_string(), "10.0.0.2:6380".to_string()]
  );
}

#[test]
fn test_validate_rejects_bad_default_database() {
  let config = ConnectionConfig::new("a:1").with_default_database(-1);
  assert!(config.validate().is_err());
}

// =============================================================================
// YAML Tests
// =============================================================================

#[test]
fn test_yaml_full() {
  let yaml = r#"
redis:
  endpoints: "10.0.0.1:6379,10.0.0.2:6379"
  password: secret
  default_database: 1
  connect_timeout_ms: 1000
  sync_timeout_ms: 2000
  async_timeout_ms: 3000
  serialization: binary
logging:
  level: debug
"#;
  let settings = CacheSettings::from_yaml_str(yaml).unwrap();
  assert_eq!(settings.redis.endpoint_list().len(), 2);
  assert_eq!(settings.redis.password.as_deref(), Some("secret"));
  assert_eq!(settings.redis.default_database, 1);
  assert_eq!(settings.redis.connect_timeout_ms, 1000);
  assert_eq!(settings.redis.sync_timeout_ms, 2000);
  assert_eq!(settings.redis.async_timeout_ms, 3000);
  assert_eq!(settings.redis.serialization, SerializationMode::Binary);
  assert_eq!(settings.logging.level, "debug");
}

#[test]
fn test_yaml_partial_uses_defaults() {
  let settings = CacheSettings::from_yaml_str("redis:\n  endpoints: localhost:6379\n").unwrap();
  assert_eq!(settings.redis.endpoints, "localhost:6379");
  assert_eq!(settings.redis.sync_timeout_ms, 5000);
  assert_eq!(settings.redis.serialization, SerializationMode::Structured);
  assert_eq!(settings.logging.level, "info");
}

#[test]
fn test_yaml_serialize_type_alias() {
  let settings =
    CacheSettings::from_yaml_str("redis:\n  endpoints: h:1\n  serialize_type: msgpack\n").unwrap();
  assert_eq!(settings.redis.serialization, SerializationMode::Binary);
}

#[test]
fn test_yaml_unknown_mode_fails() {
  let result = CacheSettings::from_yaml_str("redis:\n  serialization: protobuf\n");
  assert!(result.is_err());
}

#[test]
fn test_yaml_env_expansion() {
  std::env::set_var("REDIS_HELPER_CFG_TEST_PASSWORD", "from-env");
  std::env::set_var("REDIS_HELPER_CFG_TEST_HOST", "cache.internal");
  let yaml = "redis:\n  endpoints: ${REDIS_HELPER_CFG_TEST_HOST}:6379\n  password: $REDIS_HELPER_CFG_TEST_PASSWORD\n";
  let settings = CacheSettings::from_yaml_str(yaml).unwrap();
  assert_eq!(settings.redis.endpoints, "cache.internal:6379");
  assert_eq!(settings.redis.password.as_deref(), Some("from-env"));
}

#[test]
fn test_from_file() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  writeln!(file, "redis:\n  endpoints: file-host:6379\n  default_database: 7").unwrap();

  let settings = CacheSettings::from_file(file.path()).unwrap();
  assert_eq!(settings.redis.endpoints, "file-host:6379");
  assert_eq!(settings.redis.default_database, 7);
}

#[test]
fn test_from_missing_file_fails() {
  let dir = tempfile::tempdir().unwrap();
  assert!(CacheSettings::from_file(dir.path().join("absent.yaml")).is_err());
}
