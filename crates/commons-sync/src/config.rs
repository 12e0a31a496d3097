use std::time::Duration;

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How far apart a pending send and an incoming message may be and
    /// still be treated as the same message when no correlation id is echoed.
    pub supersede_window: Duration,
    /// Distance from the bottom of a thread, in pixels, that counts as
    /// "scrolled to the bottom" for read acknowledgements.
    pub scroll_threshold_px: f64,
    /// Re-fetch period for threads that have no push subscription.
    pub poll_interval: Duration,
    /// Number of recently used emoji kept.
    pub recent_reactions_max: usize,
    /// Number of recent emoji offered in the quick-reaction bar.
    pub quick_reactions: usize,
    /// Messages fetched per snapshot.
    pub snapshot_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            supersede_window: Duration::from_secs(30),
            scroll_threshold_px: 100.0,
            poll_interval: Duration::from_millis(3000),
            recent_reactions_max: 20,
            quick_reactions: 3,
            snapshot_limit: 50,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `COMMONS_*` environment variables. Unparseable
    /// values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            supersede_window: env_parse("COMMONS_SUPERSEDE_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.supersede_window),
            scroll_threshold_px: env_parse("COMMONS_SCROLL_THRESHOLD_PX")
                .unwrap_or(defaults.scroll_threshold_px),
            poll_interval: env_parse("COMMONS_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            recent_reactions_max: env_parse("COMMONS_RECENT_REACTIONS_MAX")
                .unwrap_or(defaults.recent_reactions_max),
            quick_reactions: env_parse("COMMONS_QUICK_REACTIONS")
                .unwrap_or(defaults.quick_reactions),
            snapshot_limit: env_parse("COMMONS_SNAPSHOT_LIMIT")
                .map(|limit: u32| limit.min(200))
                .unwrap_or(defaults.snapshot_limit),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}
