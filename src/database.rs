//! Per-database handles and their cache

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use redis::{Cmd, FromRedisValue, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::WireValue;
use crate::connection::{Established, Transport};
use crate::error::{CacheError, CacheResult};

/// Index meaning "the configured default database"
pub const DEFAULT_DB: i64 = -1;

/// Deletes the lock key only while it still holds the caller's token
pub(crate) const LOCK_RELEASE_SCRIPT: &str = "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('del', KEYS[1]) else return 0 end";

/// Resets the lock TTL only while the key still holds the caller's token
pub(crate) const LOCK_EXTEND_SCRIPT: &str = "if redis.call('get', KEYS[1]) == ARGV[1] then return redis.call('pexpire', KEYS[1], ARGV[2]) else return 0 end";

/// Milliseconds for a PX/PEXPIRE argument; never zero
fn millis(ttl: Duration) -> u64 {
  u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Render a sorted-set score bound the way the server spells infinities
fn score_bound(score: f64) -> String {
  if score == f64::INFINITY {
    "+inf".to_string()
  } else if score == f64::NEG_INFINITY {
    "-inf".to_string()
  } else {
    score.to_string()
  }
}

fn key_cmd(name: &str, key: &str) -> Cmd {
  let mut cmd = redis::cmd(name);
  cmd.arg(key);
  cmd
}

fn set_cmd(key: &str, value: &WireValue, expiry: Option<Duration>) -> Cmd {
  let mut cmd = key_cmd("SET", key);
  cmd.arg(value);
  if let Some(ttl) = expiry {
    cmd.arg("PX").arg(millis(ttl));
  }
  cmd
}

fn values_cmd(name: &str, key: &str, values: &[WireValue]) -> Cmd {
  let mut cmd = key_cmd(name, key);
  cmd.arg(values);
  cmd
}

fn range_cmd(name: &str, key: &str, start: i64, stop: i64) -> Cmd {
  let mut cmd = key_cmd(name, key);
  cmd.arg(start).arg(stop);
  cmd
}

fn zadd_cmd(key: &str, members: &[(f64, WireValue)]) -> Cmd {
  let mut cmd = key_cmd("ZADD", key);
  for (score, member) in members {
    cmd.arg(*score).arg(member);
  }
  cmd
}

fn zrange_by_score_cmd(key: &str, min: f64, max: f64) -> Cmd {
  let mut cmd = key_cmd("ZRANGEBYSCORE", key);
  cmd.arg(score_bound(min)).arg(score_bound(max));
  cmd
}

fn lock_take_cmd(key: &str, token: &str, ttl: Duration) -> Cmd {
  let mut cmd = key_cmd("SET", key);
  cmd.arg(token).arg("NX").arg("PX").arg(millis(ttl));
  cmd
}

fn lock_release_cmd(key: &str, token: &str) -> Cmd {
  let mut cmd = redis::cmd("EVAL");
  cmd.arg(LOCK_RELEASE_SCRIPT).arg(1).arg(key).arg(token);
  cmd
}

fn lock_extend_cmd(key: &str, token: &str, ttl: Duration) -> Cmd {
  let mut cmd = redis::cmd("EVAL");
  cmd
    .arg(LOCK_EXTEND_SCRIPT)
    .arg(1)
    .arg(key)
    .arg(token)
    .arg(millis(ttl));
  cmd
}

/// PTTL reply: negative means missing or persistent
fn ttl_from_millis(ms: i64) -> Option<Duration> {
  if ms < 0 {
    None
  } else {
    Some(Duration::from_millis(ms as u64))
  }
}

/// Handle scoped to one logical database.
///
/// Cloning is cheap; clones share the underlying transport.
#[derive(Clone)]
pub struct Database {
  index: i64,
  generation: u64,
  endpoint: String,
  transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Database {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Database")
      .field("index", &self.index)
      .field("generation", &self.generation)
      .field("endpoint", &self.endpoint)
      .finish()
  }
}

impl Database {
  pub(crate) fn new(
    index: i64,
    generation: u64,
    endpoint: impl Into<String>,
    transport: Arc<dyn Transport>,
  ) -> Self {
    Self {
      index,
      generation,
      endpoint: endpoint.into(),
      transport,
    }
  }

  /// Index this handle was requested with (-1 for the default database)
  pub fn index(&self) -> i64 {
    self.index
  }

  /// Endpoint of the connection the handle belongs to
  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub(crate) fn generation(&self) -> u64 {
    self.generation
  }

  /// Whether both handles share the same transport
  pub fn same_handle(&self, other: &Database) -> bool {
    Arc::ptr_eq(&self.transport, &other.transport)
  }

  /// Run any command, blocking
  pub fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> CacheResult<T> {
    let value = self.transport.query(cmd)?;
    Ok(T::from_redis_value(&value)?)
  }

  /// Run any command without blocking the worker
  pub async fn query_async<T: FromRedisValue>(&self, cmd: &Cmd) -> CacheResult<T> {
    let value = self.transport.query_async(cmd).await?;
    Ok(T::from_redis_value(&value)?)
  }

  pub fn ping(&self) -> CacheResult<String> {
    self.query(&redis::cmd("PING"))
  }

  pub async fn ping_async(&self) -> CacheResult<String> {
    self.query_async(&redis::cmd("PING")).await
  }

  // ==========================================================================
  // Keys
  // ==========================================================================

  pub fn exists(&self, key: &str) -> CacheResult<bool> {
    self.query(&key_cmd("EXISTS", key))
  }

  pub async fn exists_async(&self, key: &str) -> CacheResult<bool> {
    self.query_async(&key_cmd("EXISTS", key)).await
  }

  pub fn del(&self, key: &str) -> CacheResult<bool> {
    self.query(&key_cmd("DEL", key))
  }

  pub async fn del_async(&self, key: &str) -> CacheResult<bool> {
    self.query_async(&key_cmd("DEL", key)).await
  }

  /// Delete several keys, returning how many existed
  pub fn del_many(&self, keys: &[&str]) -> CacheResult<i64> {
    if keys.is_empty() {
      return Ok(0);
    }
    let mut cmd = redis::cmd("DEL");
    cmd.arg(keys);
    self.query(&cmd)
  }

  pub async fn del_many_async(&self, keys: &[&str]) -> CacheResult<i64> {
    if keys.is_empty() {
      return Ok(0);
    }
    let mut cmd = redis::cmd("DEL");
    cmd.arg(keys);
    self.query_async(&cmd).await
  }

  pub fn rename(&self, key: &str, new_key: &str) -> CacheResult<()> {
    let mut cmd = key_cmd("RENAME", key);
    cmd.arg(new_key);
    self.query(&cmd)
  }

  pub async fn rename_async(&self, key: &str, new_key: &str) -> CacheResult<()> {
    let mut cmd = key_cmd("RENAME", key);
    cmd.arg(new_key);
    self.query_async(&cmd).await
  }

  /// Set a TTL; false when the key does not exist
  pub fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
    let mut cmd = key_cmd("PEXPIRE", key);
    cmd.arg(millis(ttl));
    self.query(&cmd)
  }

  pub async fn expire_async(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
    let mut cmd = key_cmd("PEXPIRE", key);
    cmd.arg(millis(ttl));
    self.query_async(&cmd).await
  }

  /// Remaining TTL; `None` when the key is missing or has no expiry
  pub fn ttl(&self, key: &str) -> CacheResult<Option<Duration>> {
    let ms: i64 = self.query(&key_cmd("PTTL", key))?;
    Ok(ttl_from_millis(ms))
  }

  pub async fn ttl_async(&self, key: &str) -> CacheResult<Option<Duration>> {
    let ms: i64 = self.query_async(&key_cmd("PTTL", key)).await?;
    Ok(ttl_from_millis(ms))
  }

  // ==========================================================================
  // Strings
  // ==========================================================================

  pub fn get(&self, key: &str) -> CacheResult<WireValue> {
    self.query(&key_cmd("GET", key))
  }

  pub async fn get_async(&self, key: &str) -> CacheResult<WireValue> {
    self.query_async(&key_cmd("GET", key)).await
  }

  /// Store a value, optionally with an expiry
  pub fn set(&self, key: &str, value: &WireValue, expiry: Option<Duration>) -> CacheResult<bool> {
    let reply: Value = self.query(&set_cmd(key, value, expiry))?;
    Ok(!matches!(reply, Value::Nil))
  }

  pub async fn set_async(
    &self,
    key: &str,
    value: &WireValue,
    expiry: Option<Duration>,
  ) -> CacheResult<bool> {
    let reply: Value = self.query_async(&set_cmd(key, value, expiry)).await?;
    Ok(!matches!(reply, Value::Nil))
  }

  pub fn incr_by_float(&self, key: &str, delta: f64) -> CacheResult<f64> {
    let mut cmd = key_cmd("INCRBYFLOAT", key);
    cmd.arg(delta);
    self.query(&cmd)
  }

  pub async fn incr_by_float_async(&self, key: &str, delta: f64) -> CacheResult<f64> {
    let mut cmd = key_cmd("INCRBYFLOAT", key);
    cmd.arg(delta);
    self.query_async(&cmd).await
  }

  // ==========================================================================
  // Lists
  // ==========================================================================

  /// Push to the head; returns the new length
  pub fn lpush(&self, key: &str, values: &[WireValue]) -> CacheResult<i64> {
    self.query(&values_cmd("LPUSH", key, values))
  }

  pub async fn lpush_async(&self, key: &str, values: &[WireValue]) -> CacheResult<i64> {
    self.query_async(&values_cmd("LPUSH", key, values)).await
  }

  /// Push to the tail; returns the new length
  pub fn rpush(&self, key: &str, values: &[WireValue]) -> CacheResult<i64> {
    self.query(&values_cmd("RPUSH", key, values))
  }

  pub async fn rpush_async(&self, key: &str, values: &[WireValue]) -> CacheResult<i64> {
    self.query_async(&values_cmd("RPUSH", key, values)).await
  }

  pub fn lpop(&self, key: &str) -> CacheResult<WireValue> {
    self.query(&key_cmd("LPOP", key))
  }

  pub async fn lpop_async(&self, key: &str) -> CacheResult<WireValue> {
    self.query_async(&key_cmd("LPOP", key)).await
  }

  pub fn rpop(&self, key: &str) -> CacheResult<WireValue> {
    self.query(&key_cmd("RPOP", key))
  }

  pub async fn rpop_async(&self, key: &str) -> CacheResult<WireValue> {
    self.query_async(&key_cmd("RPOP", key)).await
  }

  /// Inclusive range; negative indices count from the tail
  pub fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<WireValue>> {
    self.query(&range_cmd("LRANGE", key, start, stop))
  }

  pub async fn lrange_async(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<WireValue>> {
    self.query_async(&range_cmd("LRANGE", key, start, stop)).await
  }

  pub fn llen(&self, key: &str) -> CacheResult<i64> {
    self.query(&key_cmd("LLEN", key))
  }

  pub async fn llen_async(&self, key: &str) -> CacheResult<i64> {
    self.query_async(&key_cmd("LLEN", key)).await
  }

  // ==========================================================================
  // Sets
  // ==========================================================================

  pub fn sadd(&self, key: &str, members: &[WireValue]) -> CacheResult<i64> {
    self.query(&values_cmd("SADD", key, members))
  }

  pub async fn sadd_async(&self, key: &str, members: &[WireValue]) -> CacheResult<i64> {
    self.query_async(&values_cmd("SADD", key, members)).await
  }

  pub fn srem(&self, key: &str, members: &[WireValue]) -> CacheResult<i64> {
    self.query(&values_cmd("SREM", key, members))
  }

  pub async fn srem_async(&self, key: &str, members: &[WireValue]) -> CacheResult<i64> {
    self.query_async(&values_cmd("SREM", key, members)).await
  }

  pub fn smembers(&self, key: &str) -> CacheResult<Vec<WireValue>> {
    self.query(&key_cmd("SMEMBERS", key))
  }

  pub async fn smembers_async(&self, key: &str) -> CacheResult<Vec<WireValue>> {
    self.query_async(&key_cmd("SMEMBERS", key)).await
  }

  pub fn sismember(&self, key: &str, member: &WireValue) -> CacheResult<bool> {
    self.query(&values_cmd("SISMEMBER", key, std::slice::from_ref(member)))
  }

  pub async fn sismember_async(&self, key: &str, member: &WireValue) -> CacheResult<bool> {
    self
      .query_async(&values_cmd("SISMEMBER", key, std::slice::from_ref(member)))
      .await
  }

  pub fn scard(&self, key: &str) -> CacheResult<i64> {
    self.query(&key_cmd("SCARD", key))
  }

  pub async fn scard_async(&self, key: &str) -> CacheResult<i64> {
    self.query_async(&key_cmd("SCARD", key)).await
  }

  // ==========================================================================
  // Sorted sets
  // ==========================================================================

  /// Add `(score, member)` pairs; returns how many members were new
  pub fn zadd(&self, key: &str, members: &[(f64, WireValue)]) -> CacheResult<i64> {
    self.query(&zadd_cmd(key, members))
  }

  pub async fn zadd_async(&self, key: &str, members: &[(f64, WireValue)]) -> CacheResult<i64> {
    self.query_async(&zadd_cmd(key, members)).await
  }

  pub fn zrem(&self, key: &str, members: &[WireValue]) -> CacheResult<i64> {
    self.query(&values_cmd("ZREM", key, members))
  }

  pub async fn zrem_async(&self, key: &str, members: &[WireValue]) -> CacheResult<i64> {
    self.query_async(&values_cmd("ZREM", key, members)).await
  }

  /// Members by rank, lowest score first
  pub fn zrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<WireValue>> {
    self.query(&range_cmd("ZRANGE", key, start, stop))
  }

  pub async fn zrange_async(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<WireValue>> {
    self.query_async(&range_cmd("ZRANGE", key, start, stop)).await
  }

  /// Members with `min <= score <= max`; infinities are allowed
  pub fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> CacheResult<Vec<WireValue>> {
    self.query(&zrange_by_score_cmd(key, min, max))
  }

  pub async fn zrange_by_score_async(
    &self,
    key: &str,
    min: f64,
    max: f64,
  ) -> CacheResult<Vec<WireValue>> {
    self.query_async(&zrange_by_score_cmd(key, min, max)).await
  }

  pub fn zscore(&self, key: &str, member: &WireValue) -> CacheResult<Option<f64>> {
    self.query(&values_cmd("ZSCORE", key, std::slice::from_ref(member)))
  }

  pub async fn zscore_async(&self, key: &str, member: &WireValue) -> CacheResult<Option<f64>> {
    self
      .query_async(&values_cmd("ZSCORE", key, std::slice::from_ref(member)))
      .await
  }

  pub fn zcard(&self, key: &str) -> CacheResult<i64> {
    self.query(&key_cmd("ZCARD", key))
  }

  pub async fn zcard_async(&self, key: &str) -> CacheResult<i64> {
    self.query_async(&key_cmd("ZCARD", key)).await
  }

  // ==========================================================================
  // Hashes
  // ==========================================================================

  /// Set one field; true when the field is new
  pub fn hset(&self, key: &str, field: &str, value: &WireValue) -> CacheResult<bool> {
    let mut cmd = key_cmd("HSET", key);
    cmd.arg(field).arg(value);
    self.query(&cmd)
  }

  pub async fn hset_async(&self, key: &str, field: &str, value: &WireValue) -> CacheResult<bool> {
    let mut cmd = key_cmd("HSET", key);
    cmd.arg(field).arg(value);
    self.query_async(&cmd).await
  }

  pub fn hget(&self, key: &str, field: &str) -> CacheResult<WireValue> {
    let mut cmd = key_cmd("HGET", key);
    cmd.arg(field);
    self.query(&cmd)
  }

  pub async fn hget_async(&self, key: &str, field: &str) -> CacheResult<WireValue> {
    let mut cmd = key_cmd("HGET", key);
    cmd.arg(field);
    self.query_async(&cmd).await
  }

  pub fn hdel(&self, key: &str, field: &str) -> CacheResult<bool> {
    let mut cmd = key_cmd("HDEL", key);
    cmd.arg(field);
    self.query(&cmd)
  }

  pub async fn hdel_async(&self, key: &str, field: &str) -> CacheResult<bool> {
    let mut cmd = key_cmd("HDEL", key);
    cmd.arg(field);
    self.query_async(&cmd).await
  }

  pub fn hexists(&self, key: &str, field: &str) -> CacheResult<bool> {
    let mut cmd = key_cmd("HEXISTS", key);
    cmd.arg(field);
    self.query(&cmd)
  }

  pub async fn hexists_async(&self, key: &str, field: &str) -> CacheResult<bool> {
    let mut cmd = key_cmd("HEXISTS", key);
    cmd.arg(field);
    self.query_async(&cmd).await
  }

  pub fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, WireValue>> {
    self.query(&key_cmd("HGETALL", key))
  }

  pub async fn hgetall_async(&self, key: &str) -> CacheResult<HashMap<String, WireValue>> {
    self.query_async(&key_cmd("HGETALL", key)).await
  }

  pub fn hvals(&self, key: &str) -> CacheResult<Vec<WireValue>> {
    self.query(&key_cmd("HVALS", key))
  }

  pub async fn hvals_async(&self, key: &str) -> CacheResult<Vec<WireValue>> {
    self.query_async(&key_cmd("HVALS", key)).await
  }

  pub fn hlen(&self, key: &str) -> CacheResult<i64> {
    self.query(&key_cmd("HLEN", key))
  }

  pub async fn hlen_async(&self, key: &str) -> CacheResult<i64> {
    self.query_async(&key_cmd("HLEN", key)).await
  }

  // ==========================================================================
  // Locks
  // ==========================================================================

  /// Create `key = token` only if absent, expiring after `ttl`
  pub fn lock_take(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
    let reply: Value = self.query(&lock_take_cmd(key, token, ttl))?;
    Ok(!matches!(reply, Value::Nil))
  }

  pub async fn lock_take_async(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
    let reply: Value = self.query_async(&lock_take_cmd(key, token, ttl)).await?;
    Ok(!matches!(reply, Value::Nil))
  }

  /// Delete `key` only while it holds `token`
  pub fn lock_release(&self, key: &str, token: &str) -> CacheResult<bool> {
    self.query(&lock_release_cmd(key, token))
  }

  pub async fn lock_release_async(&self, key: &str, token: &str) -> CacheResult<bool> {
    self.query_async(&lock_release_cmd(key, token)).await
  }

  /// Current holder's token, or nil
  pub fn lock_query(&self, key: &str) -> CacheResult<WireValue> {
    self.get(key)
  }

  pub async fn lock_query_async(&self, key: &str) -> CacheResult<WireValue> {
    self.get_async(key).await
  }

  /// Reset the TTL only while `key` holds `token`
  pub fn lock_extend(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
    self.query(&lock_extend_cmd(key, token, ttl))
  }

  pub async fn lock_extend_async(&self, key: &str, token: &str, ttl: Duration) -> CacheResult<bool> {
    self.query_async(&lock_extend_cmd(key, token, ttl)).await
  }
}

/// Memoizes one [`Database`] per index for the live connection.
///
/// Handles from an older connection generation are replaced on access.
#[derive(Default)]
pub(crate) struct HandleCache {
  handles: DashMap<i64, Database>,
}

impl HandleCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// Handle for `index` on the caller's generation.
  ///
  /// An older cached handle is replaced. A caller still holding an older
  /// generation gets an uncached handle and leaves the newer one in place.
  pub fn get_or_open(&self, established: &Established, index: i64) -> CacheResult<Database> {
    check_index(index)?;

    if let Some(db) = self.handles.get(&index) {
      if db.generation() == established.generation {
        return Ok(db.clone());
      }
    }

    let open = || -> CacheResult<Database> {
      let transport = established.connection.open_database(index)?;
      tracing::debug!(
        "Opened database handle {} on {}",
        index,
        established.connection.endpoint()
      );
      Ok(Database::new(
        index,
        established.generation,
        established.connection.endpoint(),
        transport,
      ))
    };

    match self.handles.entry(index) {
      Entry::Occupied(mut slot) => {
        let cached = slot.get().generation();
        if cached == established.generation {
          return Ok(slot.get().clone());
        }
        if cached > established.generation {
          drop(slot);
          return open();
        }
        let db = open()?;
        slot.insert(db.clone());
        Ok(db)
      }
      Entry::Vacant(slot) => {
        let db = open()?;
        slot.insert(db.clone());
        Ok(db)
      }
    }
  }

  pub fn len(&self) -> usize {
    self.handles.len()
  }

  pub fn clear(&self) {
    self.handles.clear();
  }
}

pub(crate) fn check_index(index: i64) -> CacheResult<()> {
  if index < DEFAULT_DB {
    return Err(CacheError::invalid_usage(format!(
      "database index must be -1 or non-negative, got {}",
      index
    )));
  }
  Ok(())
}
