//! Keyed Cache - demo driver
//!
//! Builds a cache from the environment and walks through overwrite,
//! eviction, dependency invalidation and sliding expiration, logging every
//! removal.

use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyed_cache::{Cache, CacheConfig, CacheDependency, CacheOptions, RemovedItem};

/// Entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache and subscribe to removals
/// 4. Run the scenarios and print final statistics
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyed_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: max_size={:?}, expiration_slack={}ms",
        config.max_size, config.expiration_slack_ms
    );

    let cache: Cache<String> =
        Cache::from_config(&config).context("invalid cache configuration")?;
    cache.item_removed().add(|item: &RemovedItem<String>| {
        info!(key = %item.key, value = %item.value, reason = %item.reason, "Entry removed");
    });

    // Overwrite
    cache.set("greeting", "hello".to_string(), CacheOptions::new())?;
    cache.set("greeting", "bonjour".to_string(), CacheOptions::new())?;

    // Structured keys address the same entry whatever the field order
    cache.set(
        json!({"user": 7, "view": "profile"}),
        "rendered".to_string(),
        CacheOptions::new(),
    )?;
    let hit = cache.get(json!({"view": "profile", "user": 7}))?;
    info!("Structured lookup: {:?}", hit);

    // Chained invalidation: config <- settings <- page
    let on_config = CacheDependency::on_key("config")?;
    let on_settings = CacheDependency::on_parents([on_config.clone()]);
    cache.set("config", "v1".to_string(), CacheOptions::new())?;
    cache.set(
        "settings",
        "derived".to_string(),
        CacheOptions::new().dependency(on_config),
    )?;
    cache.set(
        "page",
        "derived twice".to_string(),
        CacheOptions::new().dependency(on_settings),
    )?;
    cache.remove("config")?;
    info!(
        "After removing config: settings={}, page={}",
        cache.has("settings")?,
        cache.has("page")?
    );

    // Sliding expiration
    cache.set(
        "session",
        "active".to_string(),
        CacheOptions::new().sliding_expiration_msec(200),
    )?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    cache.get("session")?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    info!("Session still cached after refresh: {}", cache.has("session")?);
    tokio::time::sleep(Duration::from_millis(300)).await;
    info!("Session cached after idling: {}", cache.has("session")?);

    let stats = cache.stats();
    info!(
        "Stats: lookups={}, hit_rate={:.2}, removed={}, entries={}",
        stats.lookups(),
        stats.hit_rate(),
        stats.removed_total(),
        stats.total_entries
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}
