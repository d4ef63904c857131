//! Wire value exchanged with the remote store

use redis::{ErrorKind, FromRedisValue, RedisResult, RedisWrite, ToRedisArgs, Value};

/// Scalar payload stored in or read from the remote store
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum WireValue {
  /// Key or field absent
  #[default]
  Nil,
  Text(String),
  Bytes(Vec<u8>),
}

impl WireValue {
  pub fn is_nil(&self) -> bool {
    matches!(self, WireValue::Nil)
  }

  /// Raw payload bytes; `None` for the nil sentinel
  pub fn as_bytes(&self) -> Option<&[u8]> {
    match self {
      WireValue::Nil => None,
      WireValue::Text(s) => Some(s.as_bytes()),
      WireValue::Bytes(b) => Some(b),
    }
  }

  /// Payload as text, replacing invalid UTF-8 sequences
  pub fn to_text(&self) -> String {
    match self {
      WireValue::Nil => String::new(),
      WireValue::Text(s) => s.clone(),
      WireValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
    }
  }

  pub fn len(&self) -> usize {
    self.as_bytes().map(|b| b.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl From<String> for WireValue {
  fn from(s: String) -> Self {
    WireValue::Text(s)
  }
}

impl From<&str> for WireValue {
  fn from(s: &str) -> Self {
    WireValue::Text(s.to_string())
  }
}

impl From<Vec<u8>> for WireValue {
  fn from(b: Vec<u8>) -> Self {
    WireValue::Bytes(b)
  }
}

impl From<Option<String>> for WireValue {
  fn from(s: Option<String>) -> Self {
    s.map(WireValue::Text).unwrap_or_default()
  }
}

impl ToRedisArgs for WireValue {
  fn write_redis_args<W>(&self, out: &mut W)
  where
    W: ?Sized + RedisWrite,
  {
    // Nil goes out as an empty string, same as an absent value would read back
    out.write_arg(self.as_bytes().unwrap_or(&[]));
  }
}

impl FromRedisValue for WireValue {
  fn from_redis_value(v: &Value) -> RedisResult<Self> {
    match v {
      Value::Nil => Ok(WireValue::Nil),
      Value::BulkString(bytes) => Ok(WireValue::Bytes(bytes.clone())),
      Value::SimpleString(s) => Ok(WireValue::Text(s.clone())),
      Value::Okay => Ok(WireValue::Text("OK".to_string())),
      Value::Int(i) => Ok(WireValue::Text(i.to_string())),
      Value::Double(d) => Ok(WireValue::Text(d.to_string())),
      Value::VerbatimString { text, .. } => Ok(WireValue::Text(text.clone())),
      other => Err(
        (
          ErrorKind::TypeError,
          "Response type not convertible to a wire value",
          format!("{:?}", other),
        )
          .into(),
      ),
    }
  }
}
