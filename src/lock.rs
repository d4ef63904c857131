//! Token-based mutual exclusion
//!
//! A lock is a plain key holding the owner's token. Taking it is
//! `SET NX PX`; release and extend compare the token and act in one
//! server-side script, so atomicity comes from the server's single-threaded
//! command execution. There is no queueing, fairness, re-entrancy or
//! automatic renewal.
//!
//! All helpers go through the fail-soft executor: a failed call reports to
//! the exception listeners and answers `false` (or an empty token).

use std::time::Duration;

use crate::database::DEFAULT_DB;
use crate::error::CacheResult;
use crate::executor::Cache;

impl Cache {
  /// Fresh random token for identifying a lock holder
  pub fn new_lock_token() -> String {
    uuid::Uuid::new_v4().to_string()
  }

  /// Take `key` for `token` unless someone already holds it
  pub fn lock_take(&self, key: &str, token: &str, expiry: Duration) -> CacheResult<bool> {
    self.lock_take_on(DEFAULT_DB, key, token, expiry)
  }

  pub fn lock_take_on(
    &self,
    index: i64,
    key: &str,
    token: &str,
    expiry: Duration,
  ) -> CacheResult<bool> {
    self.execute(index, |db| db.lock_take(key, token, expiry))
  }

  /// Release `key`; false when absent or held under another token
  pub fn lock_release(&self, key: &str, token: &str) -> CacheResult<bool> {
    self.lock_release_on(DEFAULT_DB, key, token)
  }

  pub fn lock_release_on(&self, index: i64, key: &str, token: &str) -> CacheResult<bool> {
    self.execute(index, |db| db.lock_release(key, token))
  }

  /// Token of the current holder; empty when the lock is free
  pub fn lock_query(&self, key: &str) -> CacheResult<String> {
    self.lock_query_on(DEFAULT_DB, key)
  }

  pub fn lock_query_on(&self, index: i64, key: &str) -> CacheResult<String> {
    self.execute_value(index, None, |db| db.lock_query(key))
  }

  /// Push the expiry out to `expiry` from now, only for the current holder
  pub fn lock_extend(&self, key: &str, token: &str, expiry: Duration) -> CacheResult<bool> {
    self.lock_extend_on(DEFAULT_DB, key, token, expiry)
  }

  pub fn lock_extend_on(
    &self,
    index: i64,
    key: &str,
    token: &str,
    expiry: Duration,
  ) -> CacheResult<bool> {
    self.execute(index, |db| db.lock_extend(key, token, expiry))
  }

  pub async fn lock_take_async(&self, key: &str, token: &str, expiry: Duration) -> CacheResult<bool> {
    self
      .execute_async(DEFAULT_DB, |db| async move {
        db.lock_take_async(key, token, expiry).await
      })
      .await
  }

  pub async fn lock_release_async(&self, key: &str, token: &str) -> CacheResult<bool> {
    self
      .execute_async(DEFAULT_DB, |db| async move {
        db.lock_release_async(key, token).await
      })
      .await
  }

  pub async fn lock_query_async(&self, key: &str) -> CacheResult<String> {
    self
      .execute_value_async(DEFAULT_DB, None, |db| async move {
        db.lock_query_async(key).await
      })
      .await
  }

  pub async fn lock_extend_async(
    &self,
    key: &str,
    token: &str,
    expiry: Duration,
  ) -> CacheResult<bool> {
    self
      .execute_async(DEFAULT_DB, |db| async move {
        db.lock_extend_async(key, token, expiry).await
      })
      .await
  }
}
