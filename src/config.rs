//! Connection configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::SerializationMode;
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::error::{CacheError, CacheResult};

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax.
fn expand_env_vars(input: &str) -> String {
  let mut result = input.to_string();

  while let Some(start) = result.find("${") {
    if let Some(end) = result[start..].find('}') {
      let var_name = &result[start + 2..start + end];
      let value = std::env::var(var_name).unwrap_or_default();
      result = format!(
        "{}{}{}",
        &result[..start],
        value,
        &result[start + end + 1..]
      );
    } else {
      break;
    }
  }

  let mut i = 0;
  while i < result.len() {
    if result[i..].starts_with('$') && !result[i..].starts_with("${") {
      let rest = &result[i + 1..];
      let var_len = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
      if var_len > 0 {
        let var_name = &rest[..var_len];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..i], value, &rest[var_len..]);
        i += value.len();
        continue;
      }
    }
    i += 1;
  }

  result
}

/// Settings for the single connection to the remote store.
///
/// Loaded once before first use; the connection manager keeps its own copy
/// and never mutates it.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
  /// Comma-separated `host:port` pairs (or `redis://` URLs), tried in order
  #[serde(default)]
  pub endpoints: String,

  #[serde(default)]
  pub password: Option<String>,

  /// Database selected for index -1
  #[serde(default)]
  pub default_database: i64,

  /// Connect timeout in milliseconds
  #[serde(default = "default_timeout_ms")]
  pub connect_timeout_ms: u64,

  /// Blocking command timeout in milliseconds
  #[serde(default = "default_timeout_ms")]
  pub sync_timeout_ms: u64,

  /// Async command timeout in milliseconds
  #[serde(default = "default_timeout_ms")]
  pub async_timeout_ms: u64,

  /// Default encoding for non-text values
  #[serde(default, alias = "serialize_type")]
  pub serialization: SerializationMode,

  #[serde(skip)]
  pub diagnostics: Option<Arc<dyn Diagnostics>>,
}

fn default_timeout_ms() -> u64 {
  5000
}

impl Default for ConnectionConfig {
  fn default() -> Self {
    Self {
      endpoints: String::new(),
      password: None,
      default_database: 0,
      connect_timeout_ms: default_timeout_ms(),
      sync_timeout_ms: default_timeout_ms(),
      async_timeout_ms: default_timeout_ms(),
      serialization: SerializationMode::default(),
      diagnostics: None,
    }
  }
}

impl std::fmt::Debug for ConnectionConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectionConfig")
      .field("endpoints", &self.endpoints)
      .field("password", &self.password.as_ref().map(|_| "***"))
      .field("default_database", &self.default_database)
      .field("connect_timeout_ms", &self.connect_timeout_ms)
      .field("sync_timeout_ms", &self.sync_timeout_ms)
      .field("async_timeout_ms", &self.async_timeout_ms)
      .field("serialization", &self.serialization)
      .field("diagnostics", &self.diagnostics.is_some())
      .finish()
  }
}

impl ConnectionConfig {
  pub fn new(endpoints: impl Into<String>) -> Self {
    Self {
      endpoints: endpoints.into(),
      ..Default::default()
    }
  }

  pub fn with_password(mut self, password: impl Into<String>) -> Self {
    self.password = Some(password.into());
    self
  }

  pub fn with_default_database(mut self, index: i64) -> Self {
    self.default_database = index;
    self
  }

  pub fn with_serialization(mut self, mode: SerializationMode) -> Self {
    self.serialization = mode;
    self
  }

  pub fn with_timeouts(mut self, connect_ms: u64, sync_ms: u64, async_ms: u64) -> Self {
    self.connect_timeout_ms = connect_ms;
    self.sync_timeout_ms = sync_ms;
    self.async_timeout_ms = async_ms;
    self
  }

  pub fn with_diagnostics(mut self, sink: Arc<dyn Diagnostics>) -> Self {
    self.diagnostics = Some(sink);
    self
  }

  /// Endpoints split on commas, trimmed, empties dropped
  pub fn endpoint_list(&self) -> Vec<String> {
    self
      .endpoints
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(String::from)
      .collect()
  }

  /// The configured sink, or [`TracingDiagnostics`]
  pub fn diagnostics(&self) -> Arc<dyn Diagnostics> {
    self
      .diagnostics
      .clone()
      .unwrap_or_else(|| Arc::new(TracingDiagnostics))
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_millis(self.connect_timeout_ms)
  }

  pub fn sync_timeout(&self) -> Duration {
    Duration::from_millis(self.sync_timeout_ms)
  }

  pub fn async_timeout(&self) -> Duration {
    Duration::from_millis(self.async_timeout_ms)
  }

  /// Check the record before it is handed to the connection manager
  pub fn validate(&self) -> CacheResult<()> {
    if self.endpoint_list().is_empty() {
      return Err(CacheError::invalid_usage("no redis endpoints configured"));
    }
    if self.default_database < 0 {
      return Err(CacheError::invalid_usage(format!(
        "default database must be non-negative, got {}",
        self.default_database
      )));
    }
    if self.connect_timeout_ms == 0 || self.sync_timeout_ms == 0 || self.async_timeout_ms == 0 {
      return Err(CacheError::invalid_usage("timeouts must be greater than zero"));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

/// On-disk settings file: a `redis` section plus logging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
  #[serde(default)]
  pub redis: ConnectionConfig,
  #[serde(default)]
  pub logging: LoggingSection,
}

impl CacheSettings {
  pub fn from_yaml_str(content: &str) -> Result<Self, anyhow::Error> {
    let expanded = expand_env_vars(content);
    Ok(serde_yaml::from_str(&expanded)?)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml_str(&content)
  }

  pub fn find_and_load() -> Result<Option<Self>, anyhow::Error> {
    for p in ["redis.yaml", "redis.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_expand_env_vars_braced() {
    std::env::set_var("REDIS_HELPER_TEST_HOST", "10.0.0.5");
    assert_eq!(
      expand_env_vars("endpoints: ${REDIS_HELPER_TEST_HOST}:6379"),
      "endpoints: 10.0.0.5:6379"
    );
  }

  #[test]
  fn test_expand_env_vars_bare() {
    std::env::set_var("REDIS_HELPER_TEST_PWD", "s3cret");
    assert_eq!(
      expand_env_vars("password: $REDIS_HELPER_TEST_PWD"),
      "password: s3cret"
    );
  }

  #[test]
  fn test_expand_env_vars_missing_is_empty() {
    assert_eq!(
      expand_env_vars("x${REDIS_HELPER_TEST_UNSET_VAR}y"),
      "xy"
    );
  }

  #[test]
  fn test_debug_redacts_password() {
    let config = ConnectionConfig::new("127.0.0.1:6379").with_password("hunter2");
    let printed = format!("{:?}", config);
    assert!(!printed.contains("hunter2"));
    assert!(printed.contains("***"));
  }
}
