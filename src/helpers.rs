//! Typed helpers over the default database
//!
//! Thin wrappers pairing one primitive command with the value codec. Values
//! are encoded with the cache's default serialization mode; `String` values
//! travel as plain text. Reads and writes are fail-soft.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::codec::{self, WireValue};
use crate::database::DEFAULT_DB;
use crate::error::CacheResult;
use crate::executor::Cache;

impl Cache {
  fn encode<T: Serialize + 'static>(&self, value: &T) -> CacheResult<WireValue> {
    codec::to_wire(Some(value), self.serialization_mode())
  }

  // ==========================================================================
  // Strings
  // ==========================================================================

  pub fn string_set<T: Serialize + 'static>(
    &self,
    key: &str,
    value: &T,
    expiry: Option<Duration>,
  ) -> CacheResult<bool> {
    let wire = self.encode(value)?;
    self.execute(DEFAULT_DB, |db| db.set(key, &wire, expiry))
  }

  /// Missing keys and failures both yield `T::default()`
  pub fn string_get<T: DeserializeOwned + Default + 'static>(&self, key: &str) -> CacheResult<T> {
    self.execute_value(DEFAULT_DB, None, |db| db.get(key))
  }

  pub fn string_increment(&self, key: &str, delta: f64) -> CacheResult<f64> {
    self.execute(DEFAULT_DB, |db| db.incr_by_float(key, delta))
  }

  pub async fn string_set_async<T: Serialize + 'static>(
    &self,
    key: &str,
    value: &T,
    expiry: Option<Duration>,
  ) -> CacheResult<bool> {
    let wire = self.encode(value)?;
    self
      .execute_async(DEFAULT_DB, |db| async move {
        db.set_async(key, &wire, expiry).await
      })
      .await
  }

  pub async fn string_get_async<T: DeserializeOwned + Default + 'static>(
    &self,
    key: &str,
  ) -> CacheResult<T> {
    self
      .execute_value_async(DEFAULT_DB, None, |db| async move { db.get_async(key).await })
      .await
  }

  pub async fn string_increment_async(&self, key: &str, delta: f64) -> CacheResult<f64> {
    self
      .execute_async(DEFAULT_DB, |db| async move {
        db.incr_by_float_async(key, delta).await
      })
      .await
  }

  // ==========================================================================
  // Keys
  // ==========================================================================

  pub fn key_delete(&self, key: &str) -> CacheResult<bool> {
    self.execute(DEFAULT_DB, |db| db.del(key))
  }

  pub fn key_exists(&self, key: &str) -> CacheResult<bool> {
    self.execute(DEFAULT_DB, |db| db.exists(key))
  }

  pub fn key_expire(&self, key: &str, expiry: Duration) -> CacheResult<bool> {
    self.execute(DEFAULT_DB, |db| db.expire(key, expiry))
  }

  pub fn key_time_to_live(&self, key: &str) -> CacheResult<Option<Duration>> {
    self.execute(DEFAULT_DB, |db| db.ttl(key))
  }

  pub async fn key_delete_async(&self, key: &str) -> CacheResult<bool> {
    self
      .execute_async(DEFAULT_DB, |db| async move { db.del_async(key).await })
      .await
  }

  pub async fn key_exists_async(&self, key: &str) -> CacheResult<bool> {
    self
      .execute_async(DEFAULT_DB, |db| async move { db.exists_async(key).await })
      .await
  }

  pub async fn key_expire_async(&self, key: &str, expiry: Duration) -> CacheResult<bool> {
    self
      .execute_async(DEFAULT_DB, |db| async move {
        db.expire_async(key, expiry).await
      })
      .await
  }

  pub async fn key_time_to_live_async(&self, key: &str) -> CacheResult<Option<Duration>> {
    self
      .execute_async(DEFAULT_DB, |db| async move { db.ttl_async(key).await })
      .await
  }

  // ==========================================================================
  // Lists
  // ==========================================================================

  /// Returns the list length after the push
  pub fn list_left_push<T: Serialize + 'static>(&self, key: &str, value: &T) -> CacheResult<i64> {
    let wire = self.encode(value)?;
    self.execute(DEFAULT_DB, |db| db.lpush(key, std::slice::from_ref(&wire)))
  }

  pub fn list_right_push<T: Serialize + 'static>(&self, key: &str, value: &T) -> CacheResult<i64> {
    let wire = self.encode(value)?;
    self.execute(DEFAULT_DB, |db| db.rpush(key, std::slice::from_ref(&wire)))
  }

  pub fn list_left_pop<T: DeserializeOwned + Default + 'static>(&self, key: &str) -> CacheResult<T> {
    self.execute_value(DEFAULT_DB, None, |db| db.lpop(key))
  }

  pub fn list_right_pop<T: DeserializeOwned + Default + 'static>(&self, key: &str) -> CacheResult<T> {
    self.execute_value(DEFAULT_DB, None, |db| db.rpop(key))
  }

  /// Inclusive range; `Some(vec![])` for a missing key, `None` on failure
  pub fn list_range<T: DeserializeOwned + Default + 'static>(
    &self,
    key: &str,
    start: i64,
    stop: i64,
  ) -> CacheResult<Option<Vec<T>>> {
    self.execute_values(DEFAULT_DB, None, |db| db.lrange(key, start, stop))
  }

  // ==========================================================================
  // Sets
  // ==========================================================================

  /// True when the member was not already present
  pub fn set_add<T: Serialize + 'static>(&self, key: &str, value: &T) -> CacheResult<bool> {
    let wire = self.encode(value)?;
    self.execute(DEFAULT_DB, |db| {
      Ok(db.sadd(key, std::slice::from_ref(&wire))? > 0)
    })
  }

  pub fn set_members<T: DeserializeOwned + Default + 'static>(
    &self,
    key: &str,
  ) -> CacheResult<Option<Vec<T>>> {
    self.execute_values(DEFAULT_DB, None, |db| db.smembers(key))
  }

  // ==========================================================================
  // Sorted sets
  // ==========================================================================

  /// True when the member was new; an existing member only gets its score updated
  pub fn sorted_set_add<T: Serialize + 'static>(
    &self,
    key: &str,
    value: &T,
    score: f64,
  ) -> CacheResult<bool> {
    let wire = self.encode(value)?;
    self.execute(DEFAULT_DB, |db| Ok(db.zadd(key, &[(score, wire)])? > 0))
  }

  /// Members scored within `[min, max]`, lowest first
  pub fn sorted_set_range_by_score<T: DeserializeOwned + Default + 'static>(
    &self,
    key: &str,
    min: f64,
    max: f64,
  ) -> CacheResult<Option<Vec<T>>> {
    self.execute_values(DEFAULT_DB, None, |db| db.zrange_by_score(key, min, max))
  }

  // ==========================================================================
  // Hashes
  // ==========================================================================

  pub fn hash_set<T: Serialize + 'static>(
    &self,
    key: &str,
    field: &str,
    value: &T,
  ) -> CacheResult<bool> {
    let wire = self.encode(value)?;
    self.execute(DEFAULT_DB, |db| db.hset(key, field, &wire))
  }

  pub fn hash_get<T: DeserializeOwned + Default + 'static>(
    &self,
    key: &str,
    field: &str,
  ) -> CacheResult<T> {
    self.execute_value(DEFAULT_DB, None, |db| db.hget(key, field))
  }

  pub fn hash_values<T: DeserializeOwned + Default + 'static>(
    &self,
    key: &str,
  ) -> CacheResult<Option<Vec<T>>> {
    self.execute_values(DEFAULT_DB, None, |db| db.hvals(key))
  }
}
