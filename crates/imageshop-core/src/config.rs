use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the engine. Durations serialize as whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Public URL of the site. Its host feeds the permalink token.
    pub site_url: String,
    /// Pause between items of a sync chunk.
    #[serde(with = "secs")]
    pub sync_item_delay: Duration,
    pub push_chunk_size: usize,
    pub pull_chunk_size: usize,
    /// How long an attachment stuck at 0x0 is left alone.
    #[serde(with = "secs")]
    pub processing_cooldown: Duration,
    #[serde(with = "secs")]
    pub permalink_cache_ttl: Duration,
    #[serde(with = "secs")]
    pub caption_ttl: Duration,
    #[serde(with = "secs")]
    pub interfaces_ttl: Duration,
    /// Queue permalink creation and send it in one call per session instead
    /// of one call per size.
    pub batch_permalinks: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            site_url: "http://localhost/".to_owned(),
            sync_item_delay: Duration::from_secs(2),
            push_chunk_size: 20,
            pull_chunk_size: 5,
            processing_cooldown: Duration::from_secs(5 * 60),
            permalink_cache_ttl: Duration::from_secs(60 * 60),
            caption_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            interfaces_ttl: Duration::from_secs(60 * 60),
            batch_permalinks: true,
        }
    }
}

impl LibraryConfig {
    #[must_use]
    pub fn with_site_url(mut self, site_url: &str) -> Self {
        site_url.clone_into(&mut self.site_url);
        self
    }

    #[must_use]
    pub fn with_sync_item_delay(mut self, delay: Duration) -> Self {
        self.sync_item_delay = delay;
        self
    }

    #[must_use]
    pub fn with_batch_permalinks(mut self, batch: bool) -> Self {
        self.batch_permalinks = batch;
        self
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = LibraryConfig::default();
        assert_eq!(c.push_chunk_size, 20);
        assert_eq!(c.pull_chunk_size, 5);
        assert_eq!(c.sync_item_delay, Duration::from_secs(2));
        assert_eq!(c.processing_cooldown, Duration::from_secs(300));
        assert!(c.batch_permalinks);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: LibraryConfig =
            serde_json::from_str(r#"{"site_url": "https://example.com", "sync_item_delay": 0}"#)
                .unwrap();
        assert_eq!(c.site_url, "https://example.com");
        assert_eq!(c.sync_item_delay, Duration::ZERO);
        assert_eq!(c.caption_ttl, Duration::from_secs(604_800));
    }
}
