//! Error types for cache operations

use redis::RedisError;

/// Result alias used across the crate
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by the connection, codec and executor layers.
///
/// Only [`CacheError::RemoteOperation`] is operational: the fail-soft
/// entry points turn it into a default value plus an exception
/// notification. Every other variant always reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
  /// The caller broke a usage contract (bad configuration, bad index, ...)
  #[error("invalid usage: {0}")]
  InvalidUsage(String),

  /// A serialization mode name that the codec does not know
  #[error("unsupported serialization mode: {0}")]
  UnsupportedSerializationMode(String),

  /// A command failed while running against a database handle
  #[error("remote operation failed: {source}")]
  RemoteOperation {
    #[from]
    source: RedisError,
  },

  /// No connection could be obtained at all
  #[error("connection unavailable: {message}")]
  ConnectionUnavailable {
    message: String,
    #[source]
    source: Option<RedisError>,
  },

  #[error(transparent)]
  Json(#[from] serde_json::Error),

  #[error(transparent)]
  BinaryEncode(#[from] rmp_serde::encode::Error),

  #[error(transparent)]
  BinaryDecode(#[from] rmp_serde::decode::Error),
}

impl CacheError {
  pub fn invalid_usage(message: impl Into<String>) -> Self {
    CacheError::InvalidUsage(message.into())
  }

  pub fn unavailable(message: impl Into<String>, source: Option<RedisError>) -> Self {
    CacheError::ConnectionUnavailable {
      message: message.into(),
      source,
    }
  }

  /// Whether the fail-soft executor may swallow this error
  pub fn is_operational(&self) -> bool {
    matches!(self, CacheError::RemoteOperation { .. })
  }

  /// The underlying redis error, if this error carries one
  pub fn redis_error(&self) -> Option<&RedisError> {
    match self {
      CacheError::RemoteOperation { source } => Some(source),
      CacheError::ConnectionUnavailable { source, .. } => source.as_ref(),
      _ => None,
    }
  }
}
