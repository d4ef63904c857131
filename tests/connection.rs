//! Connection manager, handle cache and diagnostics tests

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{Cmd, RedisError, RedisResult, Value};
use redis_helper::connection::{Connection, Connector, Transport};
use redis_helper::{
  Cache, CacheError, CacheResult, ConnectionConfig, Diagnostics, MemoryConnector, WireValue,
  DEFAULT_DB,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Recorder {
  events: Mutex<Vec<String>>,
}

impl Recorder {
  fn events(&self) -> Vec<String> {
    self.events.lock().clone()
  }

  fn count(&self, prefix: &str) -> usize {
    self
      .events
      .lock()
      .iter()
      .filter(|e| e.starts_with(prefix))
      .count()
  }
}

impl Diagnostics for Recorder {
  fn internal_error(&self, endpoint: &str, _error: &RedisError) {
    self.events.lock().push(format!("internal_error {}", endpoint));
  }

  fn error_message(&self, endpoint: &str, _message: &str) {
    self.events.lock().push(format!("error_message {}", endpoint));
  }

  fn connection_failed(&self, endpoint: &str, _error: &RedisError) {
    self
      .events
      .lock()
      .push(format!("connection_failed {}", endpoint));
  }

  fn connection_restored(&self, endpoint: &str) {
    self
      .events
      .lock()
      .push(format!("connection_restored {}", endpoint));
  }

  fn configuration_changed(&self, endpoint: &str) {
    self
      .events
      .lock()
      .push(format!("configuration_changed {}", endpoint));
  }
}

fn setup() -> (Arc<MemoryConnector>, Cache) {
  let connector = Arc::new(MemoryConnector::new());
  let cache = Cache::with_connector(connector.clone());
  (connector, cache)
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_uninitialized_connection_is_absent() {
  let (_, cache) = setup();
  assert!(!cache.is_initialized());
  assert!(cache.connection().unwrap().is_none());
}

#[test]
fn test_uninitialized_database_is_unavailable() {
  let (_, cache) = setup();
  let err = cache.database(DEFAULT_DB).unwrap_err();
  assert!(matches!(err, CacheError::ConnectionUnavailable { .. }));
}

#[test]
fn test_initialize_does_not_connect() {
  let (connector, cache) = setup();
  cache.initialize(ConnectionConfig::new("mem:6379")).unwrap();
  assert!(cache.is_initialized());
  assert_eq!(connector.connect_count(), 0);

  cache.database(DEFAULT_DB).unwrap();
  assert_eq!(connector.connect_count(), 1);
}

#[test]
fn test_initialize_rejects_empty_endpoints() {
  let (_, cache) = setup();
  let err = cache.initialize(ConnectionConfig::new(" , ")).unwrap_err();
  assert!(matches!(err, CacheError::InvalidUsage(_)));
  assert!(!cache.is_initialized());
}

#[test]
fn test_initialize_rejects_zero_timeout() {
  let (_, cache) = setup();
  let config = ConnectionConfig::new("mem:6379").with_timeouts(1000, 0, 1000);
  assert!(matches!(
    cache.initialize(config),
    Err(CacheError::InvalidUsage(_))
  ));
}

#[test]
fn test_concurrent_first_access_connects_once() {
  let connector = Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_millis(50)));
  let cache = Arc::new(Cache::with_connector(connector.clone()));
  cache.initialize(ConnectionConfig::new("mem:6379")).unwrap();

  let handles: Vec<_> = (0..8)
    .map(|_| {
      let cache = cache.clone();
      thread::spawn(move || cache.database(DEFAULT_DB).unwrap())
    })
    .collect();
  let dbs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

  assert_eq!(connector.connect_count(), 1);
  assert!(dbs.iter().all(|db| db.same_handle(&dbs[0])));
}

#[test]
fn test_connection_is_reused() {
  let (connector, cache) = setup();
  cache.initialize(ConnectionConfig::new("mem:6379")).unwrap();
  let first = cache.connection().unwrap().unwrap();
  let second = cache.connection().unwrap().unwrap();
  assert!(Arc::ptr_eq(&first, &second));
  assert_eq!(connector.connect_count(), 1);
}

// =============================================================================
// Connect Failure Tests
// =============================================================================

#[test]
fn test_unreachable_endpoint_propagates() {
  let (connector, cache) = setup();
  let recorder = Arc::new(Recorder::default());
  connector.set_unreachable("down:6379", true);
  cache
    .initialize(ConnectionConfig::new("down:6379").with_diagnostics(recorder.clone()))
    .unwrap();

  let err = cache.database(DEFAULT_DB).unwrap_err();
  assert!(matches!(err, CacheError::ConnectionUnavailable { .. }));
  assert!(err.redis_error().is_some());
  assert_eq!(recorder.count("connection_failed down:6379"), 1);
  assert_eq!(connector.connect_count(), 0);
}

#[test]
fn test_failure_is_not_cached() {
  let (connector, cache) = setup();
  connector.set_unreachable("flaky:6379", true);
  cache.initialize(ConnectionConfig::new("flaky:6379")).unwrap();
  assert!(cache.database(0).is_err());

  connector.set_unreachable("flaky:6379", false);
  assert!(cache.database(0).is_ok());
}

#[test]
fn test_endpoints_tried_in_order() {
  let (connector, cache) = setup();
  connector.set_unreachable("primary:6379", true);
  cache
    .initialize(ConnectionConfig::new("primary:6379, replica:6379"))
    .unwrap();

  let db = cache.database(DEFAULT_DB).unwrap();
  assert_eq!(db.endpoint(), "replica:6379");
}

// =============================================================================
// Re-initialization Tests
// =============================================================================

#[test]
fn test_reinitialize_binds_new_endpoint() {
  let (connector, cache) = setup();
  let recorder = Arc::new(Recorder::default());

  cache
    .initialize(ConnectionConfig::new("alpha:6379").with_diagnostics(recorder.clone()))
    .unwrap();
  let old = cache.database(DEFAULT_DB).unwrap();
  assert_eq!(old.endpoint(), "alpha:6379");

  cache
    .initialize(ConnectionConfig::new("beta:6379").with_diagnostics(recorder.clone()))
    .unwrap();
  let new = cache.database(DEFAULT_DB).unwrap();

  assert_eq!(new.endpoint(), "beta:6379");
  assert!(!new.same_handle(&old));
  assert_eq!(connector.connect_count(), 2);
  assert_eq!(
    recorder.events(),
    vec!["configuration_changed beta:6379".to_string()]
  );
}

#[test]
fn test_reinitialize_before_connect_is_silent() {
  let (_, cache) = setup();
  let recorder = Arc::new(Recorder::default());
  cache
    .initialize(ConnectionConfig::new("alpha:6379").with_diagnostics(recorder.clone()))
    .unwrap();
  cache
    .initialize(ConnectionConfig::new("beta:6379").with_diagnostics(recorder.clone()))
    .unwrap();
  assert!(recorder.events().is_empty());
}

#[test]
fn test_reinitialize_keeps_data_per_endpoint() {
  let (connector, cache) = setup();
  cache.initialize(ConnectionConfig::new("alpha:6379")).unwrap();
  cache
    .database(0)
    .unwrap()
    .set("k", &WireValue::from("on-alpha"), None)
    .unwrap();

  cache.initialize(ConnectionConfig::new("beta:6379")).unwrap();
  assert!(cache.database(0).unwrap().get("k").unwrap().is_nil());
  assert_eq!(connector.server("alpha:6379").dbsize(0), 1);
}

// =============================================================================
// Handle Cache Tests
// =============================================================================

#[test]
fn test_same_index_same_handle() {
  let (_, cache) = setup();
  cache.initialize(ConnectionConfig::new("mem:6379")).unwrap();
  let a = cache.database(2).unwrap();
  let b = cache.database(2).unwrap();
  assert!(a.same_handle(&b));
  assert_eq!(a.index(), 2);
  assert_eq!(cache.cached_databases(), 1);
}

#[test]
fn test_distinct_indices_distinct_handles() {
  let (_, cache) = setup();
  cache.initialize(ConnectionConfig::new("mem:6379")).unwrap();
  let default = cache.database(DEFAULT_DB).unwrap();
  let zero = cache.database(0).unwrap();
  assert!(!default.same_handle(&zero));
  assert_eq!(cache.cached_databases(), 2);
}

#[test]
fn test_negative_index_rejected() {
  let (_, cache) = setup();
  cache.initialize(ConnectionConfig::new("mem:6379")).unwrap();
  assert!(matches!(
    cache.database(-2),
    Err(CacheError::InvalidUsage(_))
  ));
}

#[test]
fn test_default_index_resolves_to_configured_database() {
  let (connector, cache) = setup();
  cache
    .initialize(ConnectionConfig::new("mem:6379").with_default_database(3))
    .unwrap();
  cache
    .database(DEFAULT_DB)
    .unwrap()
    .set("k", &WireValue::from("v"), None)
    .unwrap();

  let server = connector.server("mem:6379");
  assert_eq!(server.dbsize(3), 1);
  assert_eq!(server.dbsize(0), 0);
  assert_eq!(
    cache.database(3).unwrap().get("k").unwrap().to_text(),
    "v"
  );
}

// =============================================================================
// Diagnostics Tests
// =============================================================================

#[test]
fn test_transport_io_failure_reports_connection_failed() {
  let (connector, cache) = setup();
  let recorder = Arc::new(Recorder::default());
  cache
    .initialize(ConnectionConfig::new("mem:6379").with_diagnostics(recorder.clone()))
    .unwrap();
  let db = cache.database(0).unwrap();

  connector.server("mem:6379").set_offline(true);
  assert!(db.get("k").is_err());
  assert_eq!(recorder.count("connection_failed mem:6379"), 1);
}

#[test]
fn test_server_error_reports_error_message() {
  let (_, cache) = setup();
  let recorder = Arc::new(Recorder::default());
  cache
    .initialize(ConnectionConfig::new("mem:6379").with_diagnostics(recorder.clone()))
    .unwrap();
  let db = cache.database(0).unwrap();

  db.rpush("list", &[WireValue::from("a")]).unwrap();
  let err = db.get("list").unwrap_err();
  assert!(matches!(err, CacheError::RemoteOperation { .. }));
  assert_eq!(recorder.count("error_message mem:6379"), 1);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

/// Answers every command after a fixed delay, tracking how many are in flight
struct SlowTransport {
  delay: Duration,
  in_flight: AtomicUsize,
  peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for SlowTransport {
  fn query(&self, _cmd: &Cmd) -> RedisResult<Value> {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    thread::sleep(self.delay);
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
    Ok(Value::Okay)
  }

  async fn query_async(&self, _cmd: &Cmd) -> RedisResult<Value> {
    tokio::time::sleep(self.delay).await;
    Ok(Value::Okay)
  }
}

struct SlowConnection {
  delay: Duration,
  peak: Arc<AtomicUsize>,
}

impl Connection for SlowConnection {
  fn endpoint(&self) -> &str {
    "slow:6379"
  }

  fn open_database(&self, _index: i64) -> CacheResult<Arc<dyn Transport>> {
    Ok(Arc::new(SlowTransport {
      delay: self.delay,
      in_flight: AtomicUsize::new(0),
      peak: self.peak.clone(),
    }))
  }
}

struct SlowConnector {
  delay: Duration,
  peak: Arc<AtomicUsize>,
}

impl Connector for SlowConnector {
  fn connect(&self, _config: &ConnectionConfig) -> CacheResult<Arc<dyn Connection>> {
    Ok(Arc::new(SlowConnection {
      delay: self.delay,
      peak: self.peak.clone(),
    }))
  }
}

#[test]
fn test_blocking_commands_on_one_database_run_in_parallel() {
  let peak = Arc::new(AtomicUsize::new(0));
  let delay = Duration::from_millis(150);
  let cache = Arc::new(Cache::with_connector(Arc::new(SlowConnector {
    delay,
    peak: peak.clone(),
  })));
  cache.initialize(ConnectionConfig::new("slow:6379")).unwrap();
  cache.database(0).unwrap();

  let start = Instant::now();
  let handles: Vec<_> = (0..4)
    .map(|_| {
      let cache = cache.clone();
      thread::spawn(move || {
        let db = cache.database(0).unwrap();
        db.query::<()>(&redis::cmd("PING")).unwrap();
      })
    })
    .collect();
  for h in handles {
    h.join().unwrap();
  }

  assert!(start.elapsed() < delay * 3);
  assert!(peak.load(Ordering::SeqCst) > 1);
  assert_eq!(cache.cached_databases(), 1);
}
