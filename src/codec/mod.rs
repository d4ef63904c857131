//! Value marshaling between application types and wire values
//!
//! Two encodings are supported for non-text values:
//! - Structured: JSON text via `serde_json`
//! - Binary: MessagePack via `rmp-serde`
//!
//! `String` values bypass both and travel as-is.

mod wire;

pub use wire::WireValue;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::{Any, TypeId};

use crate::error::{CacheError, CacheResult};

/// Encoding used for non-text values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SerializationMode {
  /// Human-readable JSON (default)
  #[default]
  Structured,
  /// Compact MessagePack
  Binary,
}

impl std::fmt::Display for SerializationMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      SerializationMode::Structured => write!(f, "structured"),
      SerializationMode::Binary => write!(f, "binary"),
    }
  }
}

impl std::str::FromStr for SerializationMode {
  type Err = CacheError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "structured" | "json" => Ok(SerializationMode::Structured),
      "binary" | "msgpack" | "messagepack" => Ok(SerializationMode::Binary),
      _ => Err(CacheError::UnsupportedSerializationMode(s.to_string())),
    }
  }
}

impl Serialize for SerializationMode {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for SerializationMode {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
  }
}

/// How a declared type is carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Text passes through untouched, whatever the mode
  Text,
  Structured,
  Binary,
}

impl Strategy {
  /// Pick the strategy for declared type `T` under `mode`
  pub fn select<T: 'static>(mode: SerializationMode) -> Self {
    let id = TypeId::of::<T>();
    if id == TypeId::of::<String>() || id == TypeId::of::<&'static str>() {
      return Strategy::Text;
    }
    match mode {
      SerializationMode::Structured => Strategy::Structured,
      SerializationMode::Binary => Strategy::Binary,
    }
  }
}

/// Encode a value; `None` becomes the nil sentinel
pub fn to_wire<T>(value: Option<&T>, mode: SerializationMode) -> CacheResult<WireValue>
where
  T: Serialize + 'static,
{
  let value = match value {
    Some(v) => v,
    None => return Ok(WireValue::Nil),
  };

  match Strategy::select::<T>(mode) {
    Strategy::Text => {
      let any = value as &dyn Any;
      let text = match any.downcast_ref::<String>() {
        Some(owned) => owned.clone(),
        None => any
          .downcast_ref::<&'static str>()
          .map(|borrowed| borrowed.to_string())
          .ok_or_else(|| CacheError::invalid_usage("text strategy selected for a non-text type"))?,
      };
      Ok(WireValue::Text(text))
    }
    Strategy::Structured => Ok(WireValue::Text(serde_json::to_string(value)?)),
    Strategy::Binary => Ok(WireValue::Bytes(rmp_serde::to_vec_named(value)?)),
  }
}

/// Decode a wire value; the nil sentinel yields `T::default()`
pub fn from_wire<T>(value: WireValue, mode: SerializationMode) -> CacheResult<T>
where
  T: DeserializeOwned + Default + 'static,
{
  let bytes = match &value {
    WireValue::Nil => return Ok(T::default()),
    WireValue::Text(s) => s.as_bytes(),
    WireValue::Bytes(b) => b.as_slice(),
  };

  match Strategy::select::<T>(mode) {
    Strategy::Text => {
      let text: Box<dyn Any> = Box::new(value.to_text());
      text
        .downcast::<T>()
        .map(|v| *v)
        .map_err(|_| CacheError::invalid_usage("text strategy selected for a non-text type"))
    }
    Strategy::Structured => Ok(serde_json::from_slice(bytes)?),
    Strategy::Binary => Ok(rmp_serde::from_slice(bytes)?),
  }
}

/// Element-wise [`to_wire`]; `None` in gives `None` out
pub fn to_wire_array<T>(
  values: Option<&[T]>,
  mode: SerializationMode,
) -> CacheResult<Option<Vec<WireValue>>>
where
  T: Serialize + 'static,
{
  values
    .map(|items| items.iter().map(|v| to_wire(Some(v), mode)).collect())
    .transpose()
}

/// Element-wise [`from_wire`]; `None` in gives `None` out
pub fn from_wire_array<T>(
  values: Option<Vec<WireValue>>,
  mode: SerializationMode,
) -> CacheResult<Option<Vec<T>>>
where
  T: DeserializeOwned + Default + 'static,
{
  values
    .map(|items| items.into_iter().map(|v| from_wire(v, mode)).collect())
    .transpose()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_strategy_text_ignores_mode() {
    assert_eq!(
      Strategy::select::<String>(SerializationMode::Binary),
      Strategy::Text
    );
    assert_eq!(
      Strategy::select::<String>(SerializationMode::Structured),
      Strategy::Text
    );
    assert_eq!(
      Strategy::select::<&'static str>(SerializationMode::Structured),
      Strategy::Text
    );
  }

  #[test]
  fn test_strategy_follows_mode() {
    assert_eq!(
      Strategy::select::<i64>(SerializationMode::Structured),
      Strategy::Structured
    );
    assert_eq!(
      Strategy::select::<Vec<String>>(SerializationMode::Binary),
      Strategy::Binary
    );
  }

  #[test]
  fn test_mode_parse() {
    assert_eq!(
      "json".parse::<SerializationMode>().unwrap(),
      SerializationMode::Structured
    );
    assert_eq!(
      "Binary".parse::<SerializationMode>().unwrap(),
      SerializationMode::Binary
    );
    assert!(matches!(
      "xml".parse::<SerializationMode>(),
      Err(CacheError::UnsupportedSerializationMode(m)) if m == "xml"
    ));
  }
}
