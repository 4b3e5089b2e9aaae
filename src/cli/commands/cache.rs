//! Cache statistics and maintenance commands.

use std::time::Duration;

use tokio::runtime::Runtime;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::ResultExt;

async fn open_cache(config: &Config) -> anyhow::Result<Cache> {
    let dir = config.cache.resolved_dir();
    Ok(Cache::from_config(&config.cache)
        .await
        .with_context(format!("failed to open cache at {}", dir.display()))?)
}

/// Show what is on disk
pub fn cmd_cache_stats(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let cache = open_cache(config).await?;
        let storage = cache.storage_stats().await;

        println!("Cache: {}", config.cache.resolved_dir().display());
        if !config.cache.enabled {
            println!("  (disabled in config)");
        }
        println!("  Entries:     {}", storage.entries);
        println!("  Disk usage:  {}", format_bytes(storage.total_bytes));
        println!("  TTL:         {}s", config.cache.ttl_seconds);
        println!("  Compression: {}", if config.cache.compression { "on" } else { "off" });
        Ok(())
    })
}

/// Remove every entry
pub fn cmd_cache_clear(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    rt.block_on(async {
        let cache = open_cache(config).await?;
        let removed = cache.clear().await.with_context("failed to clear cache")?;
        println!("✓ Removed {} cache entries", removed);
        Ok(())
    })
}

/// Remove old entries and reconcile the index with the files on disk
pub fn cmd_cache_cleanup(rt: &Runtime, config: &Config, max_age: Option<u64>) -> anyhow::Result<()> {
    let max_age = max_age
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.cache.max_age());

    rt.block_on(async {
        let cache = open_cache(config).await?;
        let removed = cache
            .cleanup(max_age)
            .await
            .with_context("failed to clean up cache")?;
        let storage = cache.storage_stats().await;
        println!(
            "✓ Removed {} entries older than {}s ({} remaining, {})",
            removed,
            max_age.as_secs(),
            storage.entries,
            format_bytes(storage.total_bytes)
        );
        Ok(())
    })
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
