//! Connection lifecycle diagnostics
//!
//! Every method is a notification only; nothing a sink does can change the
//! outcome of the command that triggered it.

use redis::{ErrorKind, RedisError};

/// Sink for connection lifecycle events.
///
/// The default bodies log through `tracing`, so an implementation only
/// overrides the events it cares about.
pub trait Diagnostics: Send + Sync {
  fn internal_error(&self, endpoint: &str, error: &RedisError) {
    tracing::error!("[redis] internal error on {}: {}", endpoint, error);
  }

  fn error_message(&self, endpoint: &str, message: &str) {
    tracing::error!("[redis] error message from {}: {}", endpoint, message);
  }

  fn connection_failed(&self, endpoint: &str, error: &RedisError) {
    tracing::error!("[redis] connection failed: {}, {}", endpoint, error);
  }

  fn connection_restored(&self, endpoint: &str) {
    tracing::info!("[redis] connection restored: {}", endpoint);
  }

  fn configuration_changed(&self, endpoint: &str) {
    tracing::info!("[redis] configuration changed: {}", endpoint);
  }

  fn hash_slot_moved(&self, endpoint: &str, target: &str) {
    tracing::info!("[redis] hash slot moved: {} -> {}", endpoint, target);
  }

  fn server_maintenance(&self, endpoint: &str, message: &str) {
    tracing::info!("[redis] server maintenance on {}: {}", endpoint, message);
  }
}

/// Default sink: logs every event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {}

/// Route a command error to the matching lifecycle event
pub(crate) fn report(sink: &dyn Diagnostics, endpoint: &str, error: &RedisError) {
  match error.kind() {
    ErrorKind::Moved | ErrorKind::Ask => {
      // detail is "<slot> <host:port>"
      let target = error.detail().unwrap_or_default();
      sink.hash_slot_moved(endpoint, target);
    }
    ErrorKind::BusyLoadingError | ErrorKind::TryAgain | ErrorKind::MasterDown => {
      sink.server_maintenance(endpoint, &error.to_string());
    }
    ErrorKind::ResponseError | ErrorKind::ExtensionError | ErrorKind::TypeError => {
      sink.error_message(endpoint, &error.to_string());
    }
    _ if error.is_io_error() || error.is_connection_dropped() || error.is_timeout() => {
      sink.connection_failed(endpoint, error);
    }
    _ => sink.internal_error(endpoint, error),
  }
}
