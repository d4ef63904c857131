//! Typed helper tests

use redis_helper::{Cache, CacheError, ConnectionConfig, MemoryConnector, SerializationMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct User {
  id: u32,
  name: String,
}

fn user(id: u32, name: &str) -> User {
  User {
    id,
    name: name.into(),
  }
}

fn setup(mode: SerializationMode) -> (Arc<MemoryConnector>, Cache) {
  let connector = Arc::new(MemoryConnector::new());
  let cache = Cache::with_connector(connector.clone());
  cache
    .initialize(ConnectionConfig::new("mem:6379").with_serialization(mode))
    .unwrap();
  (connector, cache)
}

// =============================================================================
// String Tests
// =============================================================================

#[test]
fn test_string_set_get_both_modes() {
  for mode in [SerializationMode::Structured, SerializationMode::Binary] {
    let (_, cache) = setup(mode);
    assert!(cache
      .string_set("user", &user(1001, "Sean"), Some(Duration::from_secs(20)))
      .unwrap());
    let loaded: User = cache.string_get("user").unwrap();
    assert_eq!(loaded, user(1001, "Sean"));
  }
}

#[test]
fn test_string_text_stored_raw() {
  let (connector, cache) = setup(SerializationMode::Binary);
  cache
    .string_set("greeting", &"hello".to_string(), None)
    .unwrap();
  let raw = cache.database(0).unwrap().get("greeting").unwrap();
  assert_eq!(raw.to_text(), "hello");
  assert_eq!(connector.server("mem:6379").dbsize(0), 1);
}

#[test]
fn test_string_slice_reads_back_as_string() {
  for mode in [SerializationMode::Structured, SerializationMode::Binary] {
    let (_, cache) = setup(mode);
    cache.string_set("greeting", &"hello", None).unwrap();
    let got: String = cache.string_get("greeting").unwrap();
    assert_eq!(got, "hello");
  }
}

#[test]
fn test_string_get_missing_is_default() {
  let (_, cache) = setup(SerializationMode::Structured);
  let missing: User = cache.string_get("nobody").unwrap();
  assert_eq!(missing, User::default());
  let count: i64 = cache.string_get("no-count").unwrap();
  assert_eq!(count, 0);
}

#[test]
fn test_string_increment() {
  let (_, cache) = setup(SerializationMode::Structured);
  assert_eq!(cache.string_increment("counter", 1.5).unwrap(), 1.5);
  assert_eq!(cache.string_increment("counter", 2.0).unwrap(), 3.5);
  let stored: f64 = cache.string_get("counter").unwrap();
  assert_eq!(stored, 3.5);
}

#[test]
fn test_string_increment_non_number_fails_soft() {
  let (_, cache) = setup(SerializationMode::Structured);
  cache.string_set("word", &"abc".to_string(), None).unwrap();
  assert_eq!(cache.string_increment("word", 1.0).unwrap(), 0.0);
}

#[test]
fn test_string_set_uninitialized_propagates() {
  let cache = Cache::with_connector(Arc::new(MemoryConnector::new()));
  let err = cache.string_set("k", &1, None).unwrap_err();
  assert!(matches!(err, CacheError::ConnectionUnavailable { .. }));
}

// =============================================================================
// Key Tests
// =============================================================================

#[test]
fn test_key_lifecycle() {
  let (_, cache) = setup(SerializationMode::Structured);
  assert!(!cache.key_exists("k").unwrap());
  cache.string_set("k", &42, None).unwrap();
  assert!(cache.key_exists("k").unwrap());
  assert_eq!(cache.key_time_to_live("k").unwrap(), None);

  assert!(cache.key_expire("k", Duration::from_secs(30)).unwrap());
  let ttl = cache.key_time_to_live("k").unwrap().unwrap();
  assert!(ttl > Duration::from_secs(25) && ttl <= Duration::from_secs(30));

  assert!(cache.key_delete("k").unwrap());
  assert!(!cache.key_delete("k").unwrap());
  assert!(!cache.key_expire("k", Duration::from_secs(30)).unwrap());
}

// =============================================================================
// List Tests
// =============================================================================

#[test]
fn test_list_as_queue() {
  let (_, cache) = setup(SerializationMode::Structured);
  for n in 1..=3 {
    cache.list_right_push("queue", &user(n, "q")).unwrap();
  }
  let first: User = cache.list_left_pop("queue").unwrap();
  let second: User = cache.list_left_pop("queue").unwrap();
  assert_eq!(first.id, 1);
  assert_eq!(second.id, 2);
}

#[test]
fn test_list_as_stack() {
  let (_, cache) = setup(SerializationMode::Binary);
  for n in 1..=3 {
    assert_eq!(cache.list_left_push("stack", &n).unwrap(), n as i64);
  }
  let top: i32 = cache.list_left_pop("stack").unwrap();
  let bottom: i32 = cache.list_right_pop("stack").unwrap();
  assert_eq!(top, 3);
  assert_eq!(bottom, 1);
}

#[test]
fn test_list_range() {
  let (_, cache) = setup(SerializationMode::Structured);
  for name in ["a", "b", "c", "d"] {
    cache.list_right_push("names", &name.to_string()).unwrap();
  }
  let middle: Option<Vec<String>> = cache.list_range("names", 1, 2).unwrap();
  assert_eq!(middle, Some(vec!["b".to_string(), "c".to_string()]));
  let all: Option<Vec<String>> = cache.list_range("names", 0, -1).unwrap();
  assert_eq!(all.unwrap().len(), 4);
}

#[test]
fn test_list_pop_empty_is_default() {
  let (_, cache) = setup(SerializationMode::Structured);
  let nothing: String = cache.list_left_pop("empty").unwrap();
  assert_eq!(nothing, "");
}

// =============================================================================
// Set / Sorted Set / Hash Tests
// =============================================================================

#[test]
fn test_set_add_members() {
  let (_, cache) = setup(SerializationMode::Structured);
  assert!(cache.set_add("tags", &"red".to_string()).unwrap());
  assert!(cache.set_add("tags", &"blue".to_string()).unwrap());
  assert!(!cache.set_add("tags", &"red".to_string()).unwrap());

  let mut members: Vec<String> = cache.set_members("tags").unwrap().unwrap();
  members.sort();
  assert_eq!(members, vec!["blue".to_string(), "red".to_string()]);
}

#[test]
fn test_sorted_set_range_by_score() {
  let (_, cache) = setup(SerializationMode::Structured);
  cache.sorted_set_add("board", &user(1, "low"), 10.0).unwrap();
  cache.sorted_set_add("board", &user(2, "mid"), 20.0).unwrap();
  cache.sorted_set_add("board", &user(3, "high"), 30.0).unwrap();

  let ranged: Vec<User> = cache
    .sorted_set_range_by_score("board", 15.0, f64::INFINITY)
    .unwrap()
    .unwrap();
  assert_eq!(ranged, vec![user(2, "mid"), user(3, "high")]);

  // Re-adding updates the score only
  assert!(!cache.sorted_set_add("board", &user(1, "low"), 40.0).unwrap());
  let top: Vec<User> = cache
    .sorted_set_range_by_score("board", 35.0, 50.0)
    .unwrap()
    .unwrap();
  assert_eq!(top, vec![user(1, "low")]);
}

#[test]
fn test_hash_set_get_values() {
  let (_, cache) = setup(SerializationMode::Binary);
  assert!(cache.hash_set("users", "1", &user(1, "a")).unwrap());
  assert!(cache.hash_set("users", "2", &user(2, "b")).unwrap());
  assert!(!cache.hash_set("users", "1", &user(1, "aa")).unwrap());

  let one: User = cache.hash_get("users", "1").unwrap();
  assert_eq!(one, user(1, "aa"));
  let missing: User = cache.hash_get("users", "9").unwrap();
  assert_eq!(missing, User::default());

  let mut all: Vec<User> = cache.hash_values("users").unwrap().unwrap();
  all.sort_by_key(|u| u.id);
  assert_eq!(all, vec![user(1, "aa"), user(2, "b")]);
}

// =============================================================================
// Async Tests
// =============================================================================

#[tokio::test]
async fn test_async_string_and_key_helpers() {
  let (_, cache) = setup(SerializationMode::Structured);
  assert!(cache
    .string_set_async("user", &user(1001, "Sean"), Some(Duration::from_secs(20)))
    .await
    .unwrap());
  let loaded: User = cache.string_get_async("user").await.unwrap();
  assert_eq!(loaded, user(1001, "Sean"));

  assert!(cache.key_exists_async("user").await.unwrap());
  assert!(cache
    .key_time_to_live_async("user")
    .await
    .unwrap()
    .is_some());
  assert!(cache
    .key_expire_async("user", Duration::from_secs(60))
    .await
    .unwrap());
  assert_eq!(cache.string_increment_async("n", 2.5).await.unwrap(), 2.5);

  assert!(cache.key_delete_async("user").await.unwrap());
  let gone: User = cache.string_get_async("user").await.unwrap();
  assert_eq!(gone, User::default());
}
