//! The `Cache` service: strict and fail-soft command execution
//!
//! Every typed operation funnels through here. A delegate receives a
//! [`Database`] handle and runs primitive commands against it; the executor
//! obtains the handle, applies the value codec and decides what happens to
//! failures.
//!
//! - `try_execute*` return every failure to the caller.
//! - `execute*` swallow operational failures ([`CacheError::RemoteOperation`]):
//!   the failure is logged, every exception listener is called once with it,
//!   and the caller gets the type's default. Usage and connection errors
//!   still propagate.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

use crate::codec::{self, SerializationMode, WireValue};
use crate::config::ConnectionConfig;
use crate::connection::{Connection, ConnectionManager, Connector, RedisConnector};
use crate::database::{check_index, Database, HandleCache};
use crate::error::{CacheError, CacheResult};

/// Callback fired for every failure the fail-soft entry points swallow
pub type ExceptionListener = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// Explicitly constructed cache service.
///
/// Holds the connection manager, the per-database handle cache and the
/// exception listeners. Share it behind an `Arc` across threads and tasks.
pub struct Cache {
  manager: ConnectionManager,
  handles: HandleCache,
  listeners: RwLock<Vec<ExceptionListener>>,
}

impl Default for Cache {
  fn default() -> Self {
    Self::new()
  }
}

impl Cache {
  /// Service backed by real Redis servers
  pub fn new() -> Self {
    Self::with_connector(Arc::new(RedisConnector::new()))
  }

  pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
    Self {
      manager: ConnectionManager::new(connector),
      handles: HandleCache::new(),
      listeners: RwLock::new(Vec::new()),
    }
  }

  /// Store the configuration; the connection is made on first use.
  ///
  /// Calling again replaces the configuration and drops the live connection
  /// along with every cached database handle.
  pub fn initialize(&self, config: ConnectionConfig) -> CacheResult<()> {
    self.manager.initialize(config)?;
    self.handles.clear();
    Ok(())
  }

  pub fn is_initialized(&self) -> bool {
    self.manager.is_initialized()
  }

  pub fn config(&self) -> Option<ConnectionConfig> {
    self.manager.config()
  }

  /// Default encoding for non-text values
  pub fn serialization_mode(&self) -> SerializationMode {
    self
      .manager
      .config()
      .map(|c| c.serialization)
      .unwrap_or_default()
  }

  /// The live connection, created on first call.
  ///
  /// `Ok(None)` when no configuration was ever stored.
  pub fn connection(&self) -> CacheResult<Option<Arc<dyn Connection>>> {
    Ok(self.manager.connection()?.map(|e| e.connection))
  }

  /// Cached handle for a database index (-1 = configured default)
  pub fn database(&self, index: i64) -> CacheResult<Database> {
    check_index(index)?;
    let established = self
      .manager
      .connection()?
      .ok_or_else(|| CacheError::unavailable("redis connection is not initialized", None))?;
    self.handles.get_or_open(&established, index)
  }

  /// Number of database handles currently cached
  pub fn cached_databases(&self) -> usize {
    self.handles.len()
  }

  /// Register a listener for failures swallowed by the fail-soft entry points
  pub fn on_exception<F>(&self, listener: F)
  where
    F: Fn(&CacheError) + Send + Sync + 'static,
  {
    self.listeners.write().push(Arc::new(listener));
  }

  fn notify(&self, error: &CacheError) {
    // Listeners run without the lock held so they may register others
    let listeners = self.listeners.read().clone();
    for listener in listeners.iter() {
      listener(error);
    }
  }

  fn recover<T: Default>(&self, result: CacheResult<T>) -> CacheResult<T> {
    match result {
      Err(e) if e.is_operational() => {
        tracing::warn!("Redis operation failed, returning default: {}", e);
        self.notify(&e);
        Ok(T::default())
      }
      other => other,
    }
  }

  fn resolve_mode(&self, mode: Option<SerializationMode>) -> SerializationMode {
    mode.unwrap_or_else(|| self.serialization_mode())
  }

  // ==========================================================================
  // Strict entry points
  // ==========================================================================

  /// Run a delegate against a database handle and return its outcome as is
  pub fn try_execute<T, F>(&self, index: i64, op: F) -> CacheResult<T>
  where
    F: FnOnce(&Database) -> CacheResult<T>,
  {
    let db = self.database(index)?;
    op(&db)
  }

  pub async fn try_execute_async<T, F, Fut>(&self, index: i64, op: F) -> CacheResult<T>
  where
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = CacheResult<T>>,
  {
    let db = self.database(index)?;
    op(db).await
  }

  // ==========================================================================
  // Fail-soft entry points
  // ==========================================================================

  /// Delegate computes a typed result itself.
  ///
  /// Swallowed failures reach only the listeners registered with
  /// [`Cache::on_exception`]. To handle a failure for one call, use
  /// [`Cache::try_execute`] and match on the error at the call site.
  pub fn execute<T, F>(&self, index: i64, op: F) -> CacheResult<T>
  where
    T: Default,
    F: FnOnce(&Database) -> CacheResult<T>,
  {
    let result = self.try_execute(index, op);
    self.recover(result)
  }

  /// Delegate returns a wire value, decoded with `mode` or the default mode
  pub fn execute_value<T, F>(
    &self,
    index: i64,
    mode: Option<SerializationMode>,
    op: F,
  ) -> CacheResult<T>
  where
    T: DeserializeOwned + Default + 'static,
    F: FnOnce(&Database) -> CacheResult<WireValue>,
  {
    let mode = self.resolve_mode(mode);
    let wire = self.execute(index, op)?;
    codec::from_wire(wire, mode)
  }

  /// Delegate returns wire values, decoded element-wise; failure gives `None`
  pub fn execute_values<T, F>(
    &self,
    index: i64,
    mode: Option<SerializationMode>,
    op: F,
  ) -> CacheResult<Option<Vec<T>>>
  where
    T: DeserializeOwned + Default + 'static,
    F: FnOnce(&Database) -> CacheResult<Vec<WireValue>>,
  {
    let mode = self.resolve_mode(mode);
    let wire = self.execute(index, |db| op(db).map(Some))?;
    codec::from_wire_array(wire, mode)
  }

  pub async fn execute_async<T, F, Fut>(&self, index: i64, op: F) -> CacheResult<T>
  where
    T: Default,
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = CacheResult<T>>,
  {
    let result = self.try_execute_async(index, op).await;
    self.recover(result)
  }

  pub async fn execute_value_async<T, F, Fut>(
    &self,
    index: i64,
    mode: Option<SerializationMode>,
    op: F,
  ) -> CacheResult<T>
  where
    T: DeserializeOwned + Default + 'static,
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = CacheResult<WireValue>>,
  {
    let mode = self.resolve_mode(mode);
    let wire = self.execute_async(index, op).await?;
    codec::from_wire(wire, mode)
  }

  pub async fn execute_values_async<T, F, Fut>(
    &self,
    index: i64,
    mode: Option<SerializationMode>,
    op: F,
  ) -> CacheResult<Option<Vec<T>>>
  where
    T: DeserializeOwned + Default + 'static,
    F: FnOnce(Database) -> Fut,
    Fut: Future<Output = CacheResult<Vec<WireValue>>>,
  {
    let mode = self.resolve_mode(mode);
    let wire = self
      .execute_async(index, |db| async move { op(db).await.map(Some) })
      .await?;
    codec::from_wire_array(wire, mode)
  }
}
