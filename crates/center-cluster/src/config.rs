//! Cluster driver options.
//!
//! Option validation happens here, at configuration time: an overcommit
//! ratio at or below −1 is rejected outright, a ratio in (−1, 0) is
//! accepted with a warning since it makes the center offer less than the
//! engines report.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::{ClusterError, ClusterResult};

/// Default overcommit ratio applied to reported free resources.
pub const DEFAULT_OVERCOMMIT_RATIO: f64 = 0.05;
/// Default per-slot create retry count.
pub const DEFAULT_CREATE_RETRY: u32 = 0;
/// Default upgrade coalescing delay.
pub const DEFAULT_UPGRADE_DELAY: Duration = Duration::from_secs(10);
/// Default migration debounce window.
pub const DEFAULT_MIGRATE_DELAY: Duration = Duration::from_secs(30);

/// Validated cluster options.
#[derive(Debug, Clone)]
pub struct ClusterOpts {
    pub overcommit_ratio: f64,
    pub create_retry: u32,
    pub upgrade_delay: Duration,
    pub migrate_delay: Duration,
    /// Root directory for the meta catalog; required for persistence.
    pub cache_root: PathBuf,
    /// Fixed scheduler PRNG seed; entropy-seeded when unset.
    pub scheduler_seed: Option<u64>,
}

impl ClusterOpts {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            overcommit_ratio: DEFAULT_OVERCOMMIT_RATIO,
            create_retry: DEFAULT_CREATE_RETRY,
            upgrade_delay: DEFAULT_UPGRADE_DELAY,
            migrate_delay: DEFAULT_MIGRATE_DELAY,
            cache_root: cache_root.into(),
            scheduler_seed: None,
        }
    }

    /// Set the overcommit ratio, enforcing the validity window.
    pub fn with_overcommit(mut self, ratio: f64) -> ClusterResult<Self> {
        if ratio <= -1.0 {
            return Err(ClusterError::InvalidOption(format!(
                "overcommit should be larger than -1, {ratio} is invalid"
            )));
        }
        if ratio < 0.0 {
            warn!(ratio, "-1 < overcommit < 0 makes the center take less resource than engines offer");
        }
        self.overcommit_ratio = ratio;
        Ok(self)
    }

    pub fn with_create_retry(mut self, retries: u32) -> Self {
        self.create_retry = retries;
        self
    }

    pub fn with_upgrade_delay(mut self, delay: Duration) -> Self {
        self.upgrade_delay = delay;
        self
    }

    pub fn with_migrate_delay(mut self, delay: Duration) -> Self {
        self.migrate_delay = delay;
        self
    }

    pub fn with_scheduler_seed(mut self, seed: u64) -> Self {
        self.scheduler_seed = Some(seed);
        self
    }
}

/// Parse a human duration string: `"500ms"`, `"10s"`, `"2m"`, `"1h"`.
pub fn parse_duration(s: &str) -> ClusterResult<Duration> {
    let s = s.trim();
    let (number, unit) = s
        .find(|c: char| !c.is_ascii_digit())
        .map(|pos| s.split_at(pos))
        .ok_or_else(|| ClusterError::InvalidOption(format!("duration missing unit: {s:?}")))?;

    let value: u64 = number
        .parse()
        .map_err(|_| ClusterError::InvalidOption(format!("invalid duration: {s:?}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(ClusterError::InvalidOption(format!(
            "unknown duration unit: {s:?}"
        ))),
    }
}
