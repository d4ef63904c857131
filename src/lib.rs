//! Typed convenience layer over Redis.
//!
//! A [`Cache`] owns one lazily created connection, hands out cached
//! per-database [`Database`] handles and runs caller delegates through strict
//! (`try_execute*`) or fail-soft (`execute*`) entry points. Values cross the
//! wire as [`WireValue`]s, encoded as JSON or MessagePack by the [`codec`].

pub mod codec;
pub mod config;
pub mod connection;
pub mod database;
pub mod diagnostics;
pub mod error;
pub mod executor;
mod helpers;
mod lock;

pub use codec::{SerializationMode, WireValue};
pub use config::{CacheSettings, ConnectionConfig};
pub use connection::{MemoryConnector, MemoryServer, RedisConnector};
pub use database::{Database, DEFAULT_DB};
pub use diagnostics::{Diagnostics, TracingDiagnostics};
pub use error::{CacheError, CacheResult};
pub use executor::{Cache, ExceptionListener};
