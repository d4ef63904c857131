use clap::Parser;
use redis_helper::{Cache, CacheSettings, MemoryConnector, SerializationMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "redis-demo", about = "Walk through the redis-helper API", version)]
struct Args {
  /// Comma-separated host:port list
  #[arg(long, env = "REDIS_ENDPOINTS")]
  endpoints: Option<String>,
  #[arg(long, env = "REDIS_PASSWORD")]
  password: Option<String>,
  /// structured (JSON) or binary (MessagePack)
  #[arg(long)]
  mode: Option<SerializationMode>,
  #[arg(short, long)]
  config: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
  /// Run against the in-process store instead of a server
  #[arg(long)]
  memory: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct User {
  id: u32,
  name: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut settings = if let Some(path) = &args.config {
    CacheSettings::from_file(path)?
  } else {
    CacheSettings::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(endpoints) = args.endpoints {
    settings.redis.endpoints = endpoints;
  }
  if let Some(password) = args.password {
    settings.redis.password = Some(password);
  }
  if let Some(mode) = args.mode {
    settings.redis.serialization = mode;
  }
  if let Some(level) = args.log_level {
    settings.logging.level = level;
  }
  if settings.redis.endpoints.is_empty() {
    settings.redis.endpoints = "127.0.0.1:6379".into();
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let cache = if args.memory {
    Cache::with_connector(Arc::new(MemoryConnector::new()))
  } else {
    Cache::new()
  };
  cache.on_exception(|e| tracing::error!("Cache operation failed: {}", e));
  cache.initialize(settings.redis)?;

  tracing::info!("Serialization mode: {}", cache.serialization_mode());

  strings(&cache).await?;
  queue(&cache)?;
  stack(&cache)?;

  Ok(())
}

async fn strings(cache: &Cache) -> Result<(), anyhow::Error> {
  let user = User {
    id: 1001,
    name: "Sean".into(),
  };
  cache
    .string_set_async("demo:user", &user, Some(Duration::from_secs(20)))
    .await?;
  let loaded: User = cache.string_get_async("demo:user").await?;
  println!("get demo:user -> {:?}", loaded);

  let ttl = cache.key_time_to_live_async("demo:user").await?;
  println!("ttl demo:user -> {:?}", ttl);

  cache.key_delete_async("demo:user").await?;
  let gone: User = cache.string_get_async("demo:user").await?;
  println!("after delete -> {:?}", gone);

  cache.string_set("demo:greeting", &"hello".to_string(), None)?;
  let greeting: String = cache.string_get("demo:greeting")?;
  println!("get demo:greeting -> {}", greeting);
  cache.key_delete("demo:greeting")?;
  Ok(())
}

/// Right push + left pop: first in, first out
fn queue(cache: &Cache) -> Result<(), anyhow::Error> {
  for n in 1..=3 {
    cache.list_right_push("demo:queue", &format!("job-{}", n))?;
  }
  let pending: Vec<String> = cache.list_range("demo:queue", 0, -1)?.unwrap_or_default();
  println!("queue -> {:?}", pending);
  loop {
    let job: String = cache.list_left_pop("demo:queue")?;
    if job.is_empty() {
      break;
    }
    println!("dequeued {}", job);
  }
  Ok(())
}

/// Left push + left pop: last in, first out
fn stack(cache: &Cache) -> Result<(), anyhow::Error> {
  for n in 1..=3 {
    cache.list_left_push("demo:stack", &format!("frame-{}", n))?;
  }
  loop {
    let frame: String = cache.list_left_pop("demo:stack")?;
    if frame.is_empty() {
      break;
    }
    println!("popped {}", frame);
  }
  Ok(())
}
