//! Connection management
//!
//! The remote store client sits behind three small traits:
//! - [`Connector`] establishes a [`Connection`] from a [`ConnectionConfig`]
//! - [`Connection`] is the single live handle, and opens per-database transports
//! - [`Transport`] runs one command, blocking or async
//!
//! [`ConnectionManager`] owns the one live connection and creates it lazily.

mod client;
mod memory;

pub use client::RedisConnector;
pub use memory::{MemoryConnector, MemoryServer};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redis::{Cmd, RedisResult, Value};
use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::error::CacheResult;

/// Runs commands against one logical database
#[async_trait]
pub trait Transport: Send + Sync {
  /// Run a command, blocking the calling thread for the round trip
  fn query(&self, cmd: &Cmd) -> RedisResult<Value>;

  /// Run a command without blocking the worker
  async fn query_async(&self, cmd: &Cmd) -> RedisResult<Value>;
}

/// The live handle to the remote store
pub trait Connection: Send + Sync {
  /// Endpoint this connection is bound to
  fn endpoint(&self) -> &str;

  /// Open a transport for a database index (-1 = configured default)
  fn open_database(&self, index: i64) -> CacheResult<Arc<dyn Transport>>;
}

/// Establishes connections
pub trait Connector: Send + Sync {
  fn connect(&self, config: &ConnectionConfig) -> CacheResult<Arc<dyn Connection>>;
}

/// A connection together with the initialization generation it belongs to
#[derive(Clone)]
pub struct Established {
  pub connection: Arc<dyn Connection>,
  pub generation: u64,
}

#[derive(Default)]
struct State {
  config: Option<ConnectionConfig>,
  connection: Option<Arc<dyn Connection>>,
  generation: u64,
}

/// Owns the configuration and the single live connection
pub struct ConnectionManager {
  connector: Arc<dyn Connector>,
  state: RwLock<State>,
  // Held while a connection is being created or the config replaced
  connect_lock: Mutex<()>,
}

impl ConnectionManager {
  pub fn new(connector: Arc<dyn Connector>) -> Self {
    Self {
      connector,
      state: RwLock::new(State::default()),
      connect_lock: Mutex::new(()),
    }
  }

  /// Store a configuration without connecting.
  ///
  /// A second call replaces the configuration and drops the live
  /// connection, so the next access reconnects with the new settings.
  pub fn initialize(&self, config: ConnectionConfig) -> CacheResult<()> {
    config.validate()?;

    let sink = config.diagnostics();
    let endpoints = config.endpoints.clone();

    let replaced = {
      let _guard = self.connect_lock.lock();
      let mut state = self.state.write();
      state.generation += 1;
      state.config = Some(config);
      state.connection.take()
    };

    if let Some(old) = replaced {
      tracing::info!(
        "Re-initializing redis connection, releasing connection to {}",
        old.endpoint()
      );
      sink.configuration_changed(&endpoints);
    }
    Ok(())
  }

  /// Current configuration, if any
  pub fn config(&self) -> Option<ConnectionConfig> {
    self.state.read().config.clone()
  }

  pub fn is_initialized(&self) -> bool {
    self.state.read().config.is_some()
  }

  /// The live connection, created on first use.
  ///
  /// `Ok(None)` means no configuration was ever stored. Connect failures
  /// propagate.
  pub fn connection(&self) -> CacheResult<Option<Established>> {
    if let Some(found) = self.current() {
      return Ok(Some(found));
    }

    let _guard = self.connect_lock.lock();
    if let Some(found) = self.current() {
      return Ok(Some(found));
    }

    let (config, generation) = {
      let state = self.state.read();
      match &state.config {
        Some(config) => (config.clone(), state.generation),
        None => return Ok(None),
      }
    };

    let connection = self.connector.connect(&config)?;
    tracing::info!("Connected to redis at {}", connection.endpoint());

    let mut state = self.state.write();
    state.connection = Some(connection.clone());
    Ok(Some(Established {
      connection,
      generation,
    }))
  }

  fn current(&self) -> Option<Established> {
    let state = self.state.read();
    state.connection.as_ref().map(|connection| Established {
      connection: connection.clone(),
      generation: state.generation,
    })
  }
}
