//! In-process store speaking the same commands as Redis
//!
//! Covers the commands the database handle issues: strings, keys, lists,
//! sets, sorted sets, hashes and the lock scripts. Expiry is lazy, checked
//! on access. Each endpoint gets its own [`MemoryServer`]; each database
//! index its own keyspace.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{Arg, Cmd, ErrorKind, RedisError, RedisResult, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Connection, Connector, Transport};
use crate::config::ConnectionConfig;
use crate::database::{DEFAULT_DB, LOCK_EXTEND_SCRIPT, LOCK_RELEASE_SCRIPT};
use crate::diagnostics::{self, Diagnostics};
use crate::error::{CacheError, CacheResult};

type Bytes = Vec<u8>;

enum Stored {
  Text(Bytes),
  List(VecDeque<Bytes>),
  Set(BTreeSet<Bytes>),
  Sorted(Vec<(Bytes, f64)>),
  Hash(BTreeMap<Bytes, Bytes>),
}

impl Stored {
  fn as_list(&mut self) -> Option<&mut VecDeque<Bytes>> {
    match self {
      Stored::List(l) => Some(l),
      _ => None,
    }
  }

  fn as_set(&mut self) -> Option<&mut BTreeSet<Bytes>> {
    match self {
      Stored::Set(s) => Some(s),
      _ => None,
    }
  }

  fn as_sorted(&mut self) -> Option<&mut Vec<(Bytes, f64)>> {
    match self {
      Stored::Sorted(z) => Some(z),
      _ => None,
    }
  }

  fn as_hash(&mut self) -> Option<&mut BTreeMap<Bytes, Bytes>> {
    match self {
      Stored::Hash(h) => Some(h),
      _ => None,
    }
  }

  fn is_empty_container(&self) -> bool {
    match self {
      Stored::Text(_) => false,
      Stored::List(l) => l.is_empty(),
      Stored::Set(s) => s.is_empty(),
      Stored::Sorted(z) => z.is_empty(),
      Stored::Hash(h) => h.is_empty(),
    }
  }
}

struct Entry {
  value: Stored,
  expires_at: Option<Instant>,
}

impl Entry {
  fn new(value: Stored) -> Self {
    Self {
      value,
      expires_at: None,
    }
  }

  fn is_expired(&self) -> bool {
    self
      .expires_at
      .map(|exp| Instant::now() >= exp)
      .unwrap_or(false)
  }
}

#[derive(Default)]
struct Keyspace {
  entries: HashMap<Bytes, Entry>,
}

impl Keyspace {
  fn purge_expired(&mut self, key: &[u8]) {
    if self.entries.get(key).map(Entry::is_expired).unwrap_or(false) {
      self.entries.remove(key);
    }
  }

  fn get(&mut self, key: &[u8]) -> Option<&Entry> {
    self.purge_expired(key);
    self.entries.get(key)
  }

  fn get_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
    self.purge_expired(key);
    self.entries.get_mut(key)
  }

  fn remove(&mut self, key: &[u8]) -> Option<Entry> {
    self.purge_expired(key);
    self.entries.remove(key)
  }

  fn live_len(&self) -> usize {
    self.entries.values().filter(|e| !e.is_expired()).count()
  }

  /// Existing container of the kind `pick` selects
  fn container<T>(
    &mut self,
    key: &[u8],
    pick: fn(&mut Stored) -> Option<&mut T>,
  ) -> RedisResult<Option<&mut T>> {
    match self.get_mut(key) {
      None => Ok(None),
      Some(entry) => pick(&mut entry.value).map(Some).ok_or_else(wrong_type),
    }
  }

  /// Container of the kind `pick` selects, created empty when absent
  fn container_or_insert<T>(
    &mut self,
    key: &[u8],
    pick: fn(&mut Stored) -> Option<&mut T>,
    empty: fn() -> Stored,
  ) -> RedisResult<&mut T> {
    self.purge_expired(key);
    let entry = self
      .entries
      .entry(key.to_vec())
      .or_insert_with(|| Entry::new(empty()));
    pick(&mut entry.value).ok_or_else(wrong_type)
  }

  /// Redis deletes containers that become empty
  fn drop_if_empty(&mut self, key: &[u8]) {
    if self
      .entries
      .get(key)
      .map(|e| e.value.is_empty_container())
      .unwrap_or(false)
    {
      self.entries.remove(key);
    }
  }
}

fn wrong_type() -> RedisError {
  (
    ErrorKind::TypeError,
    "WRONGTYPE Operation against a key holding the wrong kind of value",
  )
    .into()
}

fn wrong_args(cmd: &str) -> RedisError {
  (
    ErrorKind::ResponseError,
    "ERR wrong number of arguments",
    cmd.to_lowercase(),
  )
    .into()
}

fn syntax_error() -> RedisError {
  (ErrorKind::ResponseError, "ERR syntax error").into()
}

fn not_integer() -> RedisError {
  (
    ErrorKind::ResponseError,
    "ERR value is not an integer or out of range",
  )
    .into()
}

fn invalid_expire(cmd: &str) -> RedisError {
  (
    ErrorKind::ResponseError,
    "ERR invalid expire time",
    format!("in '{}' command", cmd.to_lowercase()),
  )
    .into()
}

/// Expiry instant `amount` units from now; out-of-range amounts are rejected
fn deadline(amount: i64, unit_ms: u64, cmd: &str) -> RedisResult<Instant> {
  u64::try_from(amount)
    .ok()
    .and_then(|n| n.checked_mul(unit_ms))
    .and_then(|ms| Instant::now().checked_add(Duration::from_millis(ms)))
    .ok_or_else(|| invalid_expire(cmd))
}

fn not_float() -> RedisError {
  (ErrorKind::ResponseError, "ERR value is not a valid float").into()
}

fn parse_int(raw: &[u8]) -> RedisResult<i64> {
  std::str::from_utf8(raw)
    .ok()
    .and_then(|s| s.parse::<i64>().ok())
    .ok_or_else(not_integer)
}

fn parse_float(raw: &[u8]) -> RedisResult<f64> {
  let text = std::str::from_utf8(raw).map_err(|_| not_float())?;
  match text.to_lowercase().as_str() {
    "+inf" | "inf" => Ok(f64::INFINITY),
    "-inf" => Ok(f64::NEG_INFINITY),
    other => other
      .parse::<f64>()
      .ok()
      .filter(|f| !f.is_nan())
      .ok_or_else(not_float),
  }
}

/// Score bound for ZRANGEBYSCORE: `(x` is exclusive
fn parse_bound(raw: &[u8]) -> RedisResult<(f64, bool)> {
  match raw.first() {
    Some(b'(') => Ok((parse_float(&raw[1..])?, true)),
    _ => Ok((parse_float(raw)?, false)),
  }
}

fn format_float(value: f64) -> Bytes {
  value.to_string().into_bytes()
}

fn upper(raw: &[u8]) -> String {
  String::from_utf8_lossy(raw).to_uppercase()
}

fn bulk(bytes: Bytes) -> Value {
  Value::BulkString(bytes)
}

fn int(n: usize) -> Value {
  Value::Int(n as i64)
}

fn flag(b: bool) -> Value {
  Value::Int(if b { 1 } else { 0 })
}

/// Resolve inclusive LRANGE/ZRANGE indices against a length
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
  let len = len as i64;
  let start = if start < 0 { (len + start).max(0) } else { start };
  let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
  if start > stop || start >= len {
    None
  } else {
    Some((start as usize, stop as usize))
  }
}

/// Shared state of one in-memory server
#[derive(Default)]
pub struct MemoryServer {
  databases: Mutex<HashMap<i64, Keyspace>>,
  commands: AtomicUsize,
  offline: AtomicBool,
}

impl MemoryServer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of commands executed so far
  pub fn command_count(&self) -> usize {
    self.commands.load(Ordering::Relaxed)
  }

  /// Number of live keys in a database
  pub fn dbsize(&self, db: i64) -> usize {
    self
      .databases
      .lock()
      .get(&db)
      .map(Keyspace::live_len)
      .unwrap_or(0)
  }

  /// While offline every command fails with an I/O error
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::Relaxed);
  }

  pub fn flush_all(&self) {
    self.databases.lock().clear();
  }

  /// Execute one command against database `db`
  pub fn execute(&self, db: i64, cmd: &Cmd) -> RedisResult<Value> {
    if self.offline.load(Ordering::Relaxed) {
      return Err(
        std::io::Error::new(
          std::io::ErrorKind::ConnectionReset,
          "memory server is offline",
        )
        .into(),
      );
    }

    let mut args: Vec<Bytes> = cmd
      .args_iter()
      .map(|arg| match arg {
        Arg::Simple(bytes) => bytes.to_vec(),
        Arg::Cursor => b"0".to_vec(),
      })
      .collect();
    if args.is_empty() {
      return Err((ErrorKind::ResponseError, "ERR empty command").into());
    }
    let name = upper(&args.remove(0));
    self.commands.fetch_add(1, Ordering::Relaxed);

    let mut databases = self.databases.lock();
    let space = databases.entry(db).or_default();
    dispatch(space, &name, &args)
  }
}

fn dispatch(space: &mut Keyspace, cmd: &str, args: &[Bytes]) -> RedisResult<Value> {
  match cmd {
    "PING" => Ok(match args.first() {
      Some(msg) => bulk(msg.clone()),
      None => Value::SimpleString("PONG".to_string()),
    }),
    "SELECT" => Ok(Value::Okay),
    "FLUSHDB" => {
      space.entries.clear();
      Ok(Value::Okay)
    }
    "DBSIZE" => Ok(int(space.live_len())),
    "GET" => cmd_get(space, args),
    "SET" => cmd_set(space, args),
    "INCRBY" => cmd_incrby(space, args),
    "INCRBYFLOAT" => cmd_incrbyfloat(space, args),
    "DEL" => cmd_del(space, args),
    "EXISTS" => cmd_exists(space, args),
    "RENAME" => cmd_rename(space, args),
    "EXPIRE" => cmd_expire(space, args, 1000),
    "PEXPIRE" => cmd_expire(space, args, 1),
    "PERSIST" => cmd_persist(space, args),
    "TTL" => cmd_ttl(space, args, 1000),
    "PTTL" => cmd_ttl(space, args, 1),
    "LPUSH" => cmd_push(space, args, true),
    "RPUSH" => cmd_push(space, args, false),
    "LPOP" => cmd_pop(space, args, true),
    "RPOP" => cmd_pop(space, args, false),
    "LRANGE" => cmd_lrange(space, args),
    "LLEN" => cmd_llen(space, args),
    "SADD" => cmd_sadd(space, args),
    "SREM" => cmd_srem(space, args),
    "SMEMBERS" => cmd_smembers(space, args),
    "SISMEMBER" => cmd_sismember(space, args),
    "SCARD" => cmd_scard(space, args),
    "ZADD" => cmd_zadd(space, args),
    "ZREM" => cmd_zrem(space, args),
    "ZRANGE" => cmd_zrange(space, args),
    "ZRANGEBYSCORE" => cmd_zrangebyscore(space, args),
    "ZSCORE" => cmd_zscore(space, args),
    "ZCARD" => cmd_zcard(space, args),
    "HSET" => cmd_hset(space, args),
    "HGET" => cmd_hget(space, args),
    "HDEL" => cmd_hdel(space, args),
    "HEXISTS" => cmd_hexists(space, args),
    "HGETALL" => cmd_hgetall(space, args),
    "HVALS" => cmd_hvals(space, args),
    "HLEN" => cmd_hlen(space, args),
    "EVAL" => cmd_eval(space, args),
    _ => Err(
      (
        ErrorKind::ResponseError,
        "ERR unknown command",
        cmd.to_string(),
      )
        .into(),
    ),
  }
}

fn cmd_get(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("get"));
  }
  match space.get(&args[0]) {
    None => Ok(Value::Nil),
    Some(Entry {
      value: Stored::Text(v),
      ..
    }) => Ok(bulk(v.clone())),
    Some(_) => Err(wrong_type()),
  }
}

fn cmd_set(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 2 {
    return Err(wrong_args("set"));
  }

  let key = &args[0];
  let mut expires: Option<Instant> = None;
  let mut nx = false;
  let mut xx = false;
  let mut keep_ttl = false;

  let mut i = 2;
  while i < args.len() {
    match upper(&args[i]).as_str() {
      "EX" | "PX" => {
        let raw = args.get(i + 1).ok_or_else(syntax_error)?;
        let amount = parse_int(raw)?;
        if amount <= 0 {
          return Err(invalid_expire("set"));
        }
        let unit_ms = if upper(&args[i]) == "EX" { 1000 } else { 1 };
        expires = Some(deadline(amount, unit_ms, "set")?);
        i += 2;
      }
      "NX" => {
        nx = true;
        i += 1;
      }
      "XX" => {
        xx = true;
        i += 1;
      }
      "KEEPTTL" => {
        keep_ttl = true;
        i += 1;
      }
      _ => return Err(syntax_error()),
    }
  }

  let existing = space.get(key).map(|e| e.expires_at);
  if (nx && existing.is_some()) || (xx && existing.is_none()) {
    return Ok(Value::Nil);
  }

  let expires_at = match expires {
    Some(at) => Some(at),
    None if keep_ttl => existing.flatten(),
    None => None,
  };
  space.entries.insert(
    key.clone(),
    Entry {
      value: Stored::Text(args[1].clone()),
      expires_at,
    },
  );
  Ok(Value::Okay)
}

/// Current numeric text at `key`, or `None` when absent
fn read_number(space: &mut Keyspace, key: &[u8]) -> RedisResult<Option<Bytes>> {
  match space.get(key) {
    None => Ok(None),
    Some(Entry {
      value: Stored::Text(v),
      ..
    }) => Ok(Some(v.clone())),
    Some(_) => Err(wrong_type()),
  }
}

fn store_number(space: &mut Keyspace, key: &[u8], text: Bytes) {
  match space.get_mut(key) {
    Some(entry) => entry.value = Stored::Text(text),
    None => {
      space
        .entries
        .insert(key.to_vec(), Entry::new(Stored::Text(text)));
    }
  }
}

fn cmd_incrby(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("incrby"));
  }
  let delta = parse_int(&args[1])?;
  let current = match read_number(space, &args[0])? {
    Some(v) => parse_int(&v)?,
    None => 0,
  };
  let next = current.checked_add(delta).ok_or_else(not_integer)?;
  store_number(space, &args[0], next.to_string().into_bytes());
  Ok(Value::Int(next))
}

fn cmd_incrbyfloat(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("incrbyfloat"));
  }
  let delta = parse_float(&args[1])?;
  let current = match read_number(space, &args[0])? {
    Some(v) => parse_float(&v)?,
    None => 0.0,
  };
  let next = current + delta;
  if !next.is_finite() {
    return Err(not_float());
  }
  let text = format_float(next);
  store_number(space, &args[0], text.clone());
  Ok(bulk(text))
}

fn cmd_del(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.is_empty() {
    return Err(wrong_args("del"));
  }
  let deleted = args.iter().filter(|k| space.remove(k).is_some()).count();
  Ok(int(deleted))
}

fn cmd_exists(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.is_empty() {
    return Err(wrong_args("exists"));
  }
  let count = args.iter().filter(|k| space.get(k).is_some()).count();
  Ok(int(count))
}

fn cmd_rename(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("rename"));
  }
  match space.remove(&args[0]) {
    Some(entry) => {
      space.entries.insert(args[1].clone(), entry);
      Ok(Value::Okay)
    }
    None => Err((ErrorKind::ResponseError, "ERR no such key").into()),
  }
}

fn cmd_expire(space: &mut Keyspace, args: &[Bytes], unit_ms: u64) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("expire"));
  }
  let amount = parse_int(&args[1])?;
  if amount <= 0 {
    // Non-positive TTL deletes the key
    return Ok(flag(space.remove(&args[0]).is_some()));
  }
  let at = deadline(amount, unit_ms, "expire")?;
  match space.get_mut(&args[0]) {
    Some(entry) => {
      entry.expires_at = Some(at);
      Ok(flag(true))
    }
    None => Ok(flag(false)),
  }
}

fn cmd_persist(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("persist"));
  }
  match space.get_mut(&args[0]) {
    Some(entry) => Ok(flag(entry.expires_at.take().is_some())),
    None => Ok(flag(false)),
  }
}

fn cmd_ttl(space: &mut Keyspace, args: &[Bytes], unit_ms: u64) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("ttl"));
  }
  match space.get(&args[0]) {
    None => Ok(Value::Int(-2)),
    Some(Entry {
      expires_at: None, ..
    }) => Ok(Value::Int(-1)),
    Some(Entry {
      expires_at: Some(exp),
      ..
    }) => {
      let remaining = exp.saturating_duration_since(Instant::now());
      Ok(Value::Int((remaining.as_millis() as u64 / unit_ms) as i64))
    }
  }
}

fn cmd_push(space: &mut Keyspace, args: &[Bytes], left: bool) -> RedisResult<Value> {
  if args.len() < 2 {
    return Err(wrong_args(if left { "lpush" } else { "rpush" }));
  }
  let list = space.container_or_insert(&args[0], Stored::as_list, || {
    Stored::List(VecDeque::new())
  })?;
  for item in &args[1..] {
    if left {
      list.push_front(item.clone());
    } else {
      list.push_back(item.clone());
    }
  }
  Ok(int(list.len()))
}

fn cmd_pop(space: &mut Keyspace, args: &[Bytes], left: bool) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args(if left { "lpop" } else { "rpop" }));
  }
  let popped = match space.container(&args[0], Stored::as_list)? {
    Some(list) => {
      if left {
        list.pop_front()
      } else {
        list.pop_back()
      }
    }
    None => None,
  };
  space.drop_if_empty(&args[0]);
  Ok(popped.map(bulk).unwrap_or(Value::Nil))
}

fn cmd_lrange(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 3 {
    return Err(wrong_args("lrange"));
  }
  let start = parse_int(&args[1])?;
  let stop = parse_int(&args[2])?;
  let items = match space.container(&args[0], Stored::as_list)? {
    Some(list) => match normalize_range(start, stop, list.len()) {
      Some((s, e)) => list.range(s..=e).cloned().map(bulk).collect(),
      None => Vec::new(),
    },
    None => Vec::new(),
  };
  Ok(Value::Array(items))
}

fn cmd_llen(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("llen"));
  }
  let len = space
    .container(&args[0], Stored::as_list)?
    .map(|l| l.len())
    .unwrap_or(0);
  Ok(int(len))
}

fn cmd_sadd(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 2 {
    return Err(wrong_args("sadd"));
  }
  let set = space.container_or_insert(&args[0], Stored::as_set, || {
    Stored::Set(BTreeSet::new())
  })?;
  let added = args[1..].iter().filter(|m| set.insert((*m).clone())).count();
  Ok(int(added))
}

fn cmd_srem(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 2 {
    return Err(wrong_args("srem"));
  }
  let removed = match space.container(&args[0], Stored::as_set)? {
    Some(set) => args[1..].iter().filter(|m| set.remove(*m)).count(),
    None => 0,
  };
  space.drop_if_empty(&args[0]);
  Ok(int(removed))
}

fn cmd_smembers(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("smembers"));
  }
  let members = match space.container(&args[0], Stored::as_set)? {
    Some(set) => set.iter().cloned().map(bulk).collect(),
    None => Vec::new(),
  };
  Ok(Value::Array(members))
}

fn cmd_sismember(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("sismember"));
  }
  let found = space
    .container(&args[0], Stored::as_set)?
    .map(|set| set.contains(&args[1]))
    .unwrap_or(false);
  Ok(flag(found))
}

fn cmd_scard(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("scard"));
  }
  let len = space
    .container(&args[0], Stored::as_set)?
    .map(|s| s.len())
    .unwrap_or(0);
  Ok(int(len))
}

fn sort_members(members: &mut [(Bytes, f64)]) {
  members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
}

fn cmd_zadd(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 3 || args.len() % 2 != 1 {
    return Err(wrong_args("zadd"));
  }
  let mut pairs = Vec::with_capacity(args.len() / 2);
  for chunk in args[1..].chunks(2) {
    pairs.push((parse_float(&chunk[0])?, chunk[1].clone()));
  }

  let zset = space.container_or_insert(&args[0], Stored::as_sorted, || {
    Stored::Sorted(Vec::new())
  })?;
  let mut added = 0;
  for (score, member) in pairs {
    match zset.iter_mut().find(|(m, _)| *m == member) {
      Some(existing) => existing.1 = score,
      None => {
        zset.push((member, score));
        added += 1;
      }
    }
  }
  sort_members(zset);
  Ok(int(added))
}

fn cmd_zrem(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 2 {
    return Err(wrong_args("zrem"));
  }
  let removed = match space.container(&args[0], Stored::as_sorted)? {
    Some(zset) => {
      let before = zset.len();
      zset.retain(|(m, _)| !args[1..].contains(m));
      before - zset.len()
    }
    None => 0,
  };
  space.drop_if_empty(&args[0]);
  Ok(int(removed))
}

fn cmd_zrange(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 3 {
    return Err(wrong_args("zrange"));
  }
  let start = parse_int(&args[1])?;
  let stop = parse_int(&args[2])?;
  let members = match space.container(&args[0], Stored::as_sorted)? {
    Some(zset) => match normalize_range(start, stop, zset.len()) {
      Some((s, e)) => zset[s..=e].iter().map(|(m, _)| bulk(m.clone())).collect(),
      None => Vec::new(),
    },
    None => Vec::new(),
  };
  Ok(Value::Array(members))
}

fn cmd_zrangebyscore(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 3 {
    return Err(wrong_args("zrangebyscore"));
  }
  let (min, min_exclusive) = parse_bound(&args[1])?;
  let (max, max_exclusive) = parse_bound(&args[2])?;
  let above = |s: f64| if min_exclusive { s > min } else { s >= min };
  let below = |s: f64| if max_exclusive { s < max } else { s <= max };

  let members = match space.container(&args[0], Stored::as_sorted)? {
    Some(zset) => zset
      .iter()
      .filter(|(_, s)| above(*s) && below(*s))
      .map(|(m, _)| bulk(m.clone()))
      .collect(),
    None => Vec::new(),
  };
  Ok(Value::Array(members))
}

fn cmd_zscore(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("zscore"));
  }
  let score = space
    .container(&args[0], Stored::as_sorted)?
    .and_then(|zset| zset.iter().find(|(m, _)| *m == args[1]).map(|(_, s)| *s));
  Ok(score.map(|s| bulk(format_float(s))).unwrap_or(Value::Nil))
}

fn cmd_zcard(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("zcard"));
  }
  let len = space
    .container(&args[0], Stored::as_sorted)?
    .map(|z| z.len())
    .unwrap_or(0);
  Ok(int(len))
}

fn cmd_hset(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 3 || args.len() % 2 != 1 {
    return Err(wrong_args("hset"));
  }
  let hash = space.container_or_insert(&args[0], Stored::as_hash, || {
    Stored::Hash(BTreeMap::new())
  })?;
  let added = args[1..]
    .chunks(2)
    .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
    .count();
  Ok(int(added))
}

fn cmd_hget(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("hget"));
  }
  let value = space
    .container(&args[0], Stored::as_hash)?
    .and_then(|hash| hash.get(&args[1]).cloned());
  Ok(value.map(bulk).unwrap_or(Value::Nil))
}

fn cmd_hdel(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 2 {
    return Err(wrong_args("hdel"));
  }
  let removed = match space.container(&args[0], Stored::as_hash)? {
    Some(hash) => args[1..]
      .iter()
      .filter(|f| hash.remove(*f).is_some())
      .count(),
    None => 0,
  };
  space.drop_if_empty(&args[0]);
  Ok(int(removed))
}

fn cmd_hexists(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 2 {
    return Err(wrong_args("hexists"));
  }
  let found = space
    .container(&args[0], Stored::as_hash)?
    .map(|hash| hash.contains_key(&args[1]))
    .unwrap_or(false);
  Ok(flag(found))
}

fn cmd_hgetall(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("hgetall"));
  }
  let flat = match space.container(&args[0], Stored::as_hash)? {
    Some(hash) => hash
      .iter()
      .flat_map(|(f, v)| [bulk(f.clone()), bulk(v.clone())])
      .collect(),
    None => Vec::new(),
  };
  Ok(Value::Array(flat))
}

fn cmd_hvals(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("hvals"));
  }
  let values = match space.container(&args[0], Stored::as_hash)? {
    Some(hash) => hash.values().cloned().map(bulk).collect(),
    None => Vec::new(),
  };
  Ok(Value::Array(values))
}

fn cmd_hlen(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() != 1 {
    return Err(wrong_args("hlen"));
  }
  let len = space
    .container(&args[0], Stored::as_hash)?
    .map(|h| h.len())
    .unwrap_or(0);
  Ok(int(len))
}

/// Whether `key` currently holds exactly `token`
fn holds(space: &mut Keyspace, key: &[u8], token: &[u8]) -> RedisResult<bool> {
  match space.get(key) {
    None => Ok(false),
    Some(Entry {
      value: Stored::Text(v),
      ..
    }) => Ok(v.as_slice() == token),
    Some(_) => Err(wrong_type()),
  }
}

/// Only the lock scripts are understood
fn cmd_eval(space: &mut Keyspace, args: &[Bytes]) -> RedisResult<Value> {
  if args.len() < 2 {
    return Err(wrong_args("eval"));
  }
  let numkeys = parse_int(&args[1])?;
  if numkeys < 0 || args.len() < 2 + numkeys as usize {
    return Err(
      (
        ErrorKind::ResponseError,
        "ERR Number of keys can't be greater than number of args",
      )
        .into(),
    );
  }
  let keys = &args[2..2 + numkeys as usize];
  let argv = &args[2 + numkeys as usize..];
  let script = args[0].as_slice();

  if script == LOCK_RELEASE_SCRIPT.as_bytes() {
    let (key, token) = match (keys.first(), argv.first()) {
      (Some(k), Some(t)) => (k, t),
      _ => return Err(wrong_args("eval")),
    };
    if holds(space, key, token)? {
      space.remove(key);
      return Ok(Value::Int(1));
    }
    return Ok(Value::Int(0));
  }

  if script == LOCK_EXTEND_SCRIPT.as_bytes() {
    let (key, token, ms) = match (keys.first(), argv.first(), argv.get(1)) {
      (Some(k), Some(t), Some(ms)) => (k, t, parse_int(ms)?),
      _ => return Err(wrong_args("eval")),
    };
    if ms > 0 && holds(space, key, token)? {
      let at = deadline(ms, 1, "pexpire")?;
      if let Some(entry) = space.get_mut(key) {
        entry.expires_at = Some(at);
        return Ok(Value::Int(1));
      }
    }
    return Ok(Value::Int(0));
  }

  Err((ErrorKind::NoScriptError, "NOSCRIPT script not supported by the memory store").into())
}

/// Connector backed by in-process [`MemoryServer`]s, one per endpoint
#[derive(Default)]
pub struct MemoryConnector {
  servers: Mutex<HashMap<String, Arc<MemoryServer>>>,
  unreachable: Mutex<HashSet<String>>,
  connect_delay: Option<Duration>,
  connects: AtomicUsize,
}

impl MemoryConnector {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sleep this long inside every connect, widening race windows in tests
  pub fn with_connect_delay(mut self, delay: Duration) -> Self {
    self.connect_delay = Some(delay);
    self
  }

  /// Server behind an endpoint, created on first request
  pub fn server(&self, endpoint: &str) -> Arc<MemoryServer> {
    self
      .servers
      .lock()
      .entry(endpoint.to_string())
      .or_default()
      .clone()
  }

  /// Make connects to `endpoint` fail (or succeed again)
  pub fn set_unreachable(&self, endpoint: &str, unreachable: bool) {
    let mut set = self.unreachable.lock();
    if unreachable {
      set.insert(endpoint.to_string());
    } else {
      set.remove(endpoint);
    }
  }

  /// Number of successful connects
  pub fn connect_count(&self) -> usize {
    self.connects.load(Ordering::SeqCst)
  }
}

impl Connector for MemoryConnector {
  fn connect(&self, config: &ConnectionConfig) -> CacheResult<Arc<dyn Connection>> {
    if let Some(delay) = self.connect_delay {
      std::thread::sleep(delay);
    }

    let sink = config.diagnostics();
    let mut last_error = None;

    for endpoint in config.endpoint_list() {
      if self.unreachable.lock().contains(&endpoint) {
        let e: RedisError = std::io::Error::new(
          std::io::ErrorKind::ConnectionRefused,
          format!("{} refused the connection", endpoint),
        )
        .into();
        tracing::warn!("Redis endpoint {} unreachable: {}", endpoint, e);
        sink.connection_failed(&endpoint, &e);
        last_error = Some(e);
        continue;
      }

      self.connects.fetch_add(1, Ordering::SeqCst);
      return Ok(Arc::new(MemoryConnection {
        server: self.server(&endpoint),
        endpoint,
        default_database: config.default_database,
        sink,
      }));
    }

    Err(CacheError::unavailable(
      format!("no reachable redis endpoint in '{}'", config.endpoints),
      last_error,
    ))
  }
}

struct MemoryConnection {
  server: Arc<MemoryServer>,
  endpoint: String,
  default_database: i64,
  sink: Arc<dyn Diagnostics>,
}

impl Connection for MemoryConnection {
  fn endpoint(&self) -> &str {
    &self.endpoint
  }

  fn open_database(&self, index: i64) -> CacheResult<Arc<dyn Transport>> {
    let db = if index == DEFAULT_DB {
      self.default_database
    } else {
      index
    };
    Ok(Arc::new(MemoryTransport {
      server: self.server.clone(),
      db,
      endpoint: self.endpoint.clone(),
      sink: self.sink.clone(),
    }))
  }
}

struct MemoryTransport {
  server: Arc<MemoryServer>,
  db: i64,
  endpoint: String,
  sink: Arc<dyn Diagnostics>,
}

#[async_trait]
impl Transport for MemoryTransport {
  fn query(&self, cmd: &Cmd) -> RedisResult<Value> {
    let result = self.server.execute(self.db, cmd);
    if let Err(e) = &result {
      diagnostics::report(self.sink.as_ref(), &self.endpoint, e);
    }
    result
  }

  async fn query_async(&self, cmd: &Cmd) -> RedisResult<Value> {
    self.query(cmd)
  }
}
