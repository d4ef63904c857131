//! Redis client for connecting to external Redis servers

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, ConnectionInfo, IntoConnectionInfo, RedisError, RedisResult, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{Connection, Connector, Transport};
use crate::config::ConnectionConfig;
use crate::database::DEFAULT_DB;
use crate::diagnostics::{self, Diagnostics};
use crate::error::{CacheError, CacheResult};

/// Connects to real Redis servers through the `redis` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisConnector;

impl RedisConnector {
  pub fn new() -> Self {
    Self
  }
}

/// Build connection info for an endpoint, accepting `host:port` or a URL
fn connection_info(endpoint: &str, password: Option<&str>, db: i64) -> RedisResult<ConnectionInfo> {
  let url = if endpoint.contains("://") {
    endpoint.to_string()
  } else {
    format!("redis://{}", endpoint)
  };
  let mut info = url.into_connection_info()?;
  if let Some(pwd) = password.filter(|p| !p.is_empty()) {
    info.redis.password = Some(pwd.to_string());
  }
  info.redis.db = db;
  Ok(info)
}

fn timed_out(what: &str) -> RedisError {
  std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{} timed out", what)).into()
}

/// Open a blocking connection and check it answers PING
fn probe(endpoint: &str, config: &ConnectionConfig) -> RedisResult<()> {
  let info = connection_info(endpoint, config.password.as_deref(), config.default_database)?;
  let client = Client::open(info)?;
  let mut conn = client.get_connection_with_timeout(config.connect_timeout())?;
  conn.set_read_timeout(Some(config.sync_timeout()))?;
  redis::cmd("PING").query::<()>(&mut conn)
}

impl Connector for RedisConnector {
  fn connect(&self, config: &ConnectionConfig) -> CacheResult<Arc<dyn Connection>> {
    let sink = config.diagnostics();
    let mut last_error = None;

    for endpoint in config.endpoint_list() {
      match probe(&endpoint, config) {
        Ok(()) => {
          return Ok(Arc::new(RedisConnection {
            endpoint,
            config: config.clone(),
            sink,
          }));
        }
        Err(e) => {
          tracing::warn!("Redis endpoint {} unreachable: {}", endpoint, e);
          sink.connection_failed(&endpoint, &e);
          last_error = Some(e);
        }
      }
    }

    Err(CacheError::unavailable(
      format!("no reachable redis endpoint in '{}'", config.endpoints),
      last_error,
    ))
  }
}

/// Live connection bound to one endpoint
struct RedisConnection {
  endpoint: String,
  config: ConnectionConfig,
  sink: Arc<dyn Diagnostics>,
}

impl Connection for RedisConnection {
  fn endpoint(&self) -> &str {
    &self.endpoint
  }

  fn open_database(&self, index: i64) -> CacheResult<Arc<dyn Transport>> {
    let db = if index == DEFAULT_DB {
      self.config.default_database
    } else {
      index
    };
    let client = connection_info(&self.endpoint, self.config.password.as_deref(), db)
      .and_then(Client::open)
      .map_err(|e| CacheError::unavailable(format!("cannot open database {}", db), Some(e)))?;

    Ok(Arc::new(RedisTransport {
      client,
      endpoint: self.endpoint.clone(),
      connect_timeout: self.config.connect_timeout(),
      sync_timeout: self.config.sync_timeout(),
      async_timeout: self.config.async_timeout(),
      blocking: IdlePool::new(MAX_IDLE_CONNECTIONS),
      multiplexed: OnceCell::new(),
      degraded: AtomicBool::new(false),
      sink: self.sink.clone(),
    }))
  }
}

/// Idle blocking sockets kept per database
const MAX_IDLE_CONNECTIONS: usize = 8;

/// Idle connections handed out one per command.
///
/// The lock covers only checkout and checkin, so concurrent callers each run
/// their round trip on their own socket.
struct IdlePool<C> {
  idle: Mutex<Vec<C>>,
  capacity: usize,
}

impl<C> IdlePool<C> {
  fn new(capacity: usize) -> Self {
    Self {
      idle: Mutex::new(Vec::with_capacity(capacity)),
      capacity,
    }
  }

  fn checkout(&self) -> Option<C> {
    self.idle.lock().pop()
  }

  /// Past capacity the connection is dropped
  fn checkin(&self, conn: C) {
    let mut idle = self.idle.lock();
    if idle.len() < self.capacity {
      idle.push(conn);
    }
  }

  #[cfg(test)]
  fn idle_count(&self) -> usize {
    self.idle.lock().len()
  }
}

/// Per-database transport.
///
/// Blocking commands check a socket out of an idle pool for each round trip;
/// async commands go through a multiplexed, auto-reconnecting
/// `ConnectionManager`.
struct RedisTransport {
  client: Client,
  endpoint: String,
  connect_timeout: Duration,
  sync_timeout: Duration,
  async_timeout: Duration,
  blocking: IdlePool<redis::Connection>,
  multiplexed: OnceCell<ConnectionManager>,
  degraded: AtomicBool,
  sink: Arc<dyn Diagnostics>,
}

impl RedisTransport {
  fn open_blocking(&self) -> RedisResult<redis::Connection> {
    let conn = self.client.get_connection_with_timeout(self.connect_timeout)?;
    conn.set_read_timeout(Some(self.sync_timeout))?;
    conn.set_write_timeout(Some(self.sync_timeout))?;
    Ok(conn)
  }

  async fn manager(&self) -> RedisResult<ConnectionManager> {
    self
      .multiplexed
      .get_or_try_init(|| async {
        match tokio::time::timeout(self.connect_timeout, ConnectionManager::new(self.client.clone()))
          .await
        {
          Ok(result) => result,
          Err(_) => Err(timed_out("connect")),
        }
      })
      .await
      .cloned()
  }

  fn observe(&self, result: &RedisResult<Value>) {
    match result {
      Ok(_) => {
        if self.degraded.swap(false, Ordering::AcqRel) {
          self.sink.connection_restored(&self.endpoint);
        }
      }
      Err(e) => {
        if is_broken(e) {
          self.degraded.store(true, Ordering::Release);
        }
        diagnostics::report(self.sink.as_ref(), &self.endpoint, e);
      }
    }
  }
}

fn is_broken(e: &RedisError) -> bool {
  e.is_io_error() || e.is_connection_dropped() || e.is_timeout()
}

#[async_trait]
impl Transport for RedisTransport {
  fn query(&self, cmd: &Cmd) -> RedisResult<Value> {
    let mut conn = match self.blocking.checkout() {
      Some(conn) => conn,
      None => match self.open_blocking() {
        Ok(conn) => conn,
        Err(e) => {
          let result = Err(e);
          self.observe(&result);
          return result;
        }
      },
    };

    let result = cmd.query::<Value>(&mut conn);
    self.observe(&result);

    // A broken socket is dropped; the next call reconnects
    if !matches!(&result, Err(e) if is_broken(e)) {
      self.blocking.checkin(conn);
    }
    result
  }

  async fn query_async(&self, cmd: &Cmd) -> RedisResult<Value> {
    let result = match self.manager().await {
      Ok(mut conn) => {
        match tokio::time::timeout(self.async_timeout, cmd.query_async::<Value>(&mut conn)).await {
          Ok(result) => result,
          Err(_) => Err(timed_out("async operation")),
        }
      }
      Err(e) => Err(e),
    };
    self.observe(&result);
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_connection_info_host_port() {
    let info = connection_info("127.0.0.1:6380", Some("pwd"), 3).unwrap();
    assert_eq!(info.redis.db, 3);
    assert_eq!(info.redis.password.as_deref(), Some("pwd"));
    assert!(matches!(
      info.addr,
      redis::ConnectionAddr::Tcp(ref host, 6380) if host == "127.0.0.1"
    ));
  }

  #[test]
  fn test_connection_info_url_keeps_scheme() {
    let info = connection_info("redis://cache.local:6379", None, 0).unwrap();
    assert_eq!(info.redis.db, 0);
    assert!(info.redis.password.is_none());
  }

  #[test]
  fn test_connection_info_empty_password_ignored() {
    let info = connection_info("localhost:6379", Some(""), 1).unwrap();
    assert!(info.redis.password.is_none());
  }

  #[test]
  fn test_idle_pool_reuses_returned_connection() {
    let pool = IdlePool::new(2);
    assert!(pool.checkout().is_none());
    pool.checkin(7u32);
    assert_eq!(pool.checkout(), Some(7));
    assert!(pool.checkout().is_none());
  }

  #[test]
  fn test_idle_pool_drops_past_capacity() {
    let pool = IdlePool::new(2);
    for n in 0..5u32 {
      pool.checkin(n);
    }
    assert_eq!(pool.idle_count(), 2);
  }

  #[test]
  fn test_idle_pool_round_trips_overlap() {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Instant;

    let pool = Arc::new(IdlePool::new(MAX_IDLE_CONNECTIONS));
    let opened = Arc::new(AtomicUsize::new(0));
    let all_checked_out = Arc::new(Barrier::new(4));
    let round_trip = Duration::from_millis(150);
    let start = Instant::now();

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let pool = pool.clone();
        let opened = opened.clone();
        let all_checked_out = all_checked_out.clone();
        std::thread::spawn(move || {
          let conn = pool
            .checkout()
            .unwrap_or_else(|| opened.fetch_add(1, Ordering::SeqCst));
          all_checked_out.wait();
          std::thread::sleep(round_trip);
          pool.checkin(conn);
        })
      })
      .collect();
    for h in handles {
      h.join().unwrap();
    }

    assert!(start.elapsed() < round_trip * 3);
    assert_eq!(opened.load(Ordering::SeqCst), 4);
    assert_eq!(pool.idle_count(), 4);
  }

  #[test]
  fn test_connect_unreachable_endpoint_fails() {
    let config = ConnectionConfig::new("127.0.0.1:1").with_timeouts(200, 200, 200);
    let err = RedisConnector::new().connect(&config).err().unwrap();
    assert!(matches!(err, CacheError::ConnectionUnavailable { .. }));
  }
}
