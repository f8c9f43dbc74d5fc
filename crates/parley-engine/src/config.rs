//! Synchronization engine configuration.

use std::time::Duration;

use serde::Deserialize;

/// Timing and paging knobs of the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Messages per history page.
    #[serde(default = "SyncConfig::default_page_size")]
    pub page_size: u32,

    /// Interval of the poll fallback in milliseconds.
    #[serde(default = "SyncConfig::default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Whether the poll fallback runs at all.
    #[serde(default = "SyncConfig::default_poll_enabled")]
    pub poll_enabled: bool,

    /// How long an optimistic message stays pending before it resolves to sent.
    #[serde(default = "SyncConfig::default_send_timeout")]
    pub send_timeout_ms: u64,

    /// Delay between a send acknowledgment and the backfill fetch.
    #[serde(default = "SyncConfig::default_backfill_delay")]
    pub backfill_delay_ms: u64,

    /// Window in which repeated "reached top" triggers coalesce.
    #[serde(default = "SyncConfig::default_load_older_debounce")]
    pub load_older_debounce_ms: u64,

    /// Time given to layout before the scroll anchor is restored.
    #[serde(default = "SyncConfig::default_anchor_settle")]
    pub anchor_settle_ms: u64,

    /// Language tag attached to outgoing messages.
    #[serde(default = "SyncConfig::default_lang")]
    pub lang: String,
}

impl SyncConfig {
    const fn default_page_size() -> u32 {
        20
    }

    const fn default_poll_interval() -> u64 {
        10_000
    }

    const fn default_poll_enabled() -> bool {
        true
    }

    const fn default_send_timeout() -> u64 {
        30_000
    }

    const fn default_backfill_delay() -> u64 {
        300
    }

    const fn default_load_older_debounce() -> u64 {
        500
    }

    const fn default_anchor_settle() -> u64 {
        50
    }

    fn default_lang() -> String {
        "en".to_string()
    }

    /// Get the poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Get the send timeout as a `Duration`.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Get the backfill delay as a `Duration`.
    #[must_use]
    pub const fn backfill_delay(&self) -> Duration {
        Duration::from_millis(self.backfill_delay_ms)
    }

    /// Get the load-older debounce as a `Duration`.
    #[must_use]
    pub const fn load_older_debounce(&self) -> Duration {
        Duration::from_millis(self.load_older_debounce_ms)
    }

    /// Get the anchor settle delay as a `Duration`.
    #[must_use]
    pub const fn anchor_settle(&self) -> Duration {
        Duration::from_millis(self.anchor_settle_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: Self::default_page_size(),
            poll_interval_ms: Self::default_poll_interval(),
            poll_enabled: Self::default_poll_enabled(),
            send_timeout_ms: Self::default_send_timeout(),
            backfill_delay_ms: Self::default_backfill_delay(),
            load_older_debounce_ms: Self::default_load_older_debounce(),
            anchor_settle_ms: Self::default_anchor_settle(),
            lang: Self::default_lang(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.send_timeout(), Duration::from_secs(30));
        assert_eq!(config.backfill_delay(), Duration::from_millis(300));
        assert_eq!(config.load_older_debounce(), Duration::from_millis(500));
        assert_eq!(config.anchor_settle(), Duration::from_millis(50));
        assert!(config.poll_enabled);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"page_size": 50, "poll_enabled": false}"#).unwrap();
        assert_eq!(config.page_size, 50);
        assert!(!config.poll_enabled);
        assert_eq!(config.send_timeout_ms, 30_000);
        assert_eq!(config.lang, "en");
    }
}
