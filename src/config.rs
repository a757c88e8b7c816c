//! Runtime configuration loaded from environment variables.
//!
//! DESIGN
//! ======
//! Every tunable has a `DEFAULT_*` constant and an environment override.
//! Config is read once at startup into an immutable struct that is shared
//! through `AppState`; components never consult the environment themselves.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;

/// World-space side length of a chunk, in pixels.
const DEFAULT_CHUNK_SIZE: u32 = 256;

/// Chunks per side of a broadcast region.
const DEFAULT_REGION_SPAN: i32 = 4;

/// Log length at which a chunk composites its operations into the raster.
const DEFAULT_CONSOLIDATE_THRESHOLD: usize = 64;

const DEFAULT_BATCH_MAX_SIZE: usize = 100;
const DEFAULT_BATCH_FLUSH_MS: u64 = 50;

const DEFAULT_ADMISSION_CAPACITY: usize = 64;
const DEFAULT_ADMISSION_TIMEOUT_MS: u64 = 10_000;

const DEFAULT_SPACE_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RECLAIM_INTERVAL_SECS: u64 = 30;
const DEFAULT_SPIRAL_MAX_STEPS: usize = 10_000;

const DEFAULT_CHUNK_FLUSH_INTERVAL_MS: u64 = 2_000;

const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;
const DEFAULT_HEARTBEAT_MISSED_LIMIT: u32 = 3;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Server-wide tunables. Built once in `main`, shared via `AppState`.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Side length of a chunk in world pixels.
    pub chunk_size: u32,
    /// Chunks per side of a broadcast region.
    pub region_span: i32,
    /// Operation-log length that triggers consolidation.
    pub consolidate_threshold: usize,
    /// Maximum messages per outbound batch envelope.
    pub batch_max_size: usize,
    /// Maximum time a message waits before its batch is flushed.
    pub batch_flush_interval: Duration,
    /// Maximum simultaneously admitted connections.
    pub admission_capacity: usize,
    /// How long a connection may wait in the admission queue.
    pub admission_timeout: Duration,
    /// Idle age after which an uncontributed space may be reclaimed.
    pub space_idle_timeout: Duration,
    /// Cadence of the space reclaim sweep.
    pub reclaim_interval: Duration,
    /// Upper bound on spiral-search steps before the fallback cell is used.
    pub spiral_max_steps: usize,
    /// Cadence of the dirty-chunk persistence flush.
    pub chunk_flush_interval: Duration,
    /// Expected client ping cadence.
    pub heartbeat_interval: Duration,
    /// Silent heartbeat intervals tolerated before termination.
    pub heartbeat_missed_limit: u32,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            chunk_size: env_parse("CHUNK_SIZE", DEFAULT_CHUNK_SIZE).max(1),
            region_span: env_parse("REGION_SPAN", DEFAULT_REGION_SPAN).max(1),
            consolidate_threshold: env_parse("CONSOLIDATE_THRESHOLD", DEFAULT_CONSOLIDATE_THRESHOLD).max(1),
            batch_max_size: env_parse("BATCH_MAX_SIZE", DEFAULT_BATCH_MAX_SIZE).max(1),
            batch_flush_interval: Duration::from_millis(env_parse("BATCH_FLUSH_MS", DEFAULT_BATCH_FLUSH_MS)),
            admission_capacity: env_parse("ADMISSION_CAPACITY", DEFAULT_ADMISSION_CAPACITY).max(1),
            admission_timeout: Duration::from_millis(env_parse("ADMISSION_TIMEOUT_MS", DEFAULT_ADMISSION_TIMEOUT_MS)),
            space_idle_timeout: Duration::from_secs(env_parse(
                "SPACE_IDLE_TIMEOUT_SECS",
                DEFAULT_SPACE_IDLE_TIMEOUT_SECS,
            )),
            reclaim_interval: Duration::from_secs(env_parse("RECLAIM_INTERVAL_SECS", DEFAULT_RECLAIM_INTERVAL_SECS)),
            spiral_max_steps: env_parse("SPIRAL_MAX_STEPS", DEFAULT_SPIRAL_MAX_STEPS).max(1),
            chunk_flush_interval: Duration::from_millis(env_parse(
                "CHUNK_FLUSH_INTERVAL_MS",
                DEFAULT_CHUNK_FLUSH_INTERVAL_MS,
            )),
            heartbeat_interval: Duration::from_secs(env_parse(
                "HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )),
            heartbeat_missed_limit: env_parse("HEARTBEAT_MISSED_LIMIT", DEFAULT_HEARTBEAT_MISSED_LIMIT).max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            region_span: DEFAULT_REGION_SPAN,
            consolidate_threshold: DEFAULT_CONSOLIDATE_THRESHOLD,
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            batch_flush_interval: Duration::from_millis(DEFAULT_BATCH_FLUSH_MS),
            admission_capacity: DEFAULT_ADMISSION_CAPACITY,
            admission_timeout: Duration::from_millis(DEFAULT_ADMISSION_TIMEOUT_MS),
            space_idle_timeout: Duration::from_secs(DEFAULT_SPACE_IDLE_TIMEOUT_SECS),
            reclaim_interval: Duration::from_secs(DEFAULT_RECLAIM_INTERVAL_SECS),
            spiral_max_steps: DEFAULT_SPIRAL_MAX_STEPS,
            chunk_flush_interval: Duration::from_millis(DEFAULT_CHUNK_FLUSH_INTERVAL_MS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            heartbeat_missed_limit: DEFAULT_HEARTBEAT_MISSED_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.chunk_size > 0);
        assert!(cfg.region_span > 0);
        assert!(cfg.batch_max_size > 0);
        assert!(cfg.admission_capacity > 0);
        assert!(cfg.batch_flush_interval < cfg.admission_timeout);
    }
}
