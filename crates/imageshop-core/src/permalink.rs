//! The network side of the permalink cache.
//!
//! The durable layer lives on the attachment record and is handled by the
//! resolver. This module owns the token every permalink of an attachment is
//! namespaced under, the short-lived generic cache in front of single
//! permalink creation, and the queue of batched creations.

use crate::CoreError;
use imageshop_remote::{DamApi, PermalinkRequest};
use imageshop_schema::AttachmentRecord;
use imageshop_store::GenericCache;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::time::Duration;
use tracing::{debug, warn};

/// Characters left alone when a file name is placed in a delivery URL.
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// First label of the site host: `https://www.example.com:8080/` is `example`.
pub fn site_domain(site_url: &str) -> String {
    let host = site_url
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.strip_prefix("www.").unwrap_or(host);
    let host = host.split(['/', ':']).next().unwrap_or(host);
    host.split('.').next().unwrap_or(host).to_owned()
}

/// Stable namespace for the permalinks of one attachment:
/// `{domain}-{id}-{hash}` where the hash covers upload date and title.
pub fn permalink_token(site_url: &str, record: &AttachmentRecord) -> String {
    let seed = format!(
        "{}-{}",
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
        record.title
    );
    let hash = blake3::hash(seed.as_bytes()).to_hex();
    format!("{}-{}-{}", site_domain(site_url), record.id, &hash[..32])
}

/// Per unit-of-work permalink creation.
///
/// In batched mode a request with a token gets its delivery URL immediately
/// (it is a pure function of the token, box and file name) and the creation
/// call is queued until [`flush`](Self::flush). Otherwise each request goes
/// through the generic cache and then `CreatePermaLink2`.
pub struct PermalinkSession<'a> {
    dam: &'a dyn DamApi,
    cache: &'a dyn GenericCache,
    ttl: Duration,
    batch: bool,
    pending: Vec<PermalinkRequest>,
}

impl<'a> PermalinkSession<'a> {
    pub fn new(dam: &'a dyn DamApi, cache: &'a dyn GenericCache, ttl: Duration, batch: bool) -> Self {
        Self {
            dam,
            cache,
            ttl,
            batch,
            pending: Vec::new(),
        }
    }

    /// Number of queued creations not yet sent.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Delivery URL for `request`, serving `file_name` (a path or base name).
    pub fn url_for(&mut self, request: PermalinkRequest, file_name: &str) -> Result<String, CoreError> {
        if self.batch {
            if let Some(url) = self.preloaded_url(&request, file_name) {
                if !self.pending.contains(&request) {
                    self.pending.push(request);
                }
                return Ok(url);
            }
        }
        self.direct(&request)
    }

    /// `{cdn}/{token}-{w}x{h}/{file}`, known before the permalink exists.
    fn preloaded_url(&self, request: &PermalinkRequest, file_name: &str) -> Option<String> {
        let segment = request.permalink_token()?;
        let base = file_name.rsplit('/').next().unwrap_or(file_name);
        Some(format!(
            "{}/{segment}/{}",
            self.dam.cdn_prefix(),
            utf8_percent_encode(base, FILE_NAME)
        ))
    }

    /// Create one permalink now, deduplicated through the generic cache.
    pub fn direct(&self, request: &PermalinkRequest) -> Result<String, CoreError> {
        let payload = request.payload(&self.dam.language(), &self.dam.url_hint());
        let key = payload.cache_key().map_err(imageshop_remote::RemoteError::from)?;

        match self.cache.get(&key) {
            Ok(Some(serde_json::Value::String(url))) => {
                debug!("permalink cache hit for document {}", request.document_id);
                return Ok(url);
            }
            Ok(_) => {}
            Err(e) => warn!("permalink cache read failed: {e}"),
        }

        let url = self.dam.get_permalink(request)?;
        if let Err(e) = self
            .cache
            .set(&key, serde_json::Value::String(url.clone()), Some(self.ttl))
        {
            warn!("permalink cache write failed: {e}");
        }
        Ok(url)
    }

    /// Send every queued creation in one call. On failure the queue is kept
    /// so the caller may retry.
    pub fn flush(&mut self) -> Result<usize, CoreError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let requests = std::mem::take(&mut self.pending);
        debug!("creating {} permalinks in one batch", requests.len());
        match self.dam.create_permalinks(&requests) {
            Ok(()) => Ok(requests.len()),
            Err(e) => {
                self.pending = requests;
                Err(e.into())
            }
        }
    }
}

impl Drop for PermalinkSession<'_> {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                "permalink session dropped with {} unsent creations",
                self.pending.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageshop_remote::mock::MockDam;
    use imageshop_remote::RemoteError;
    use imageshop_schema::{AttachmentId, Document, DocumentId};
    use imageshop_store::MemoryCache;

    fn request(token: Option<&str>) -> PermalinkRequest {
        PermalinkRequest {
            document_id: DocumentId::new(7),
            width: 300,
            height: 200,
            token: token.map(str::to_owned),
        }
    }

    fn dam() -> MockDam {
        let dam = MockDam::new().with_cdn_prefix("https://cdn.test");
        dam.add_document(Document {
            document_id: DocumentId::new(7),
            ..Document::default()
        });
        dam
    }

    #[test]
    fn domain_extraction() {
        assert_eq!(site_domain("https://www.example.com/"), "example");
        assert_eq!(site_domain("http://blog.example.org:8080/path"), "blog");
        assert_eq!(site_domain("http://localhost:8000/"), "localhost");
        assert_eq!(site_domain("example.com"), "example");
    }

    #[test]
    fn token_is_stable_and_namespaced() {
        let record = AttachmentRecord::new(AttachmentId::new(42), "Boat", "boat.jpg");
        let a = permalink_token("https://www.example.com", &record);
        let b = permalink_token("https://www.example.com", &record);
        assert_eq!(a, b);
        assert!(a.starts_with("example-42-"));
        assert_eq!(a.len(), "example-42-".len() + 32);

        let mut renamed = record.clone();
        renamed.title = "Ship".into();
        assert_ne!(a, permalink_token("https://www.example.com", &renamed));
    }

    #[test]
    fn batched_requests_are_queued_with_preloaded_urls() {
        let dam = dam();
        let cache = MemoryCache::new();
        let mut session = PermalinkSession::new(&dam, &cache, Duration::from_secs(60), true);

        let url = session
            .url_for(request(Some("site-1-abc")), "2024/05/my boat.jpg")
            .unwrap();
        assert_eq!(url, "https://cdn.test/site-1-abc-300x200/my%20boat.jpg");
        session.url_for(request(Some("site-1-abc")), "my boat.jpg").unwrap();
        assert_eq!(session.pending(), 1);
        assert_eq!(dam.calls("get_permalink"), 0);

        assert_eq!(session.flush().unwrap(), 1);
        assert_eq!(session.pending(), 0);
        assert_eq!(session.flush().unwrap(), 0);
        assert_eq!(dam.permalink_batches().len(), 1);
    }

    #[test]
    fn failed_flush_keeps_queue() {
        let dam = dam();
        let cache = MemoryCache::new();
        let mut session = PermalinkSession::new(&dam, &cache, Duration::from_secs(60), true);
        session.url_for(request(Some("t")), "a.jpg").unwrap();
        dam.fail_next("create_permalinks", RemoteError::Transport("down".into()));
        assert!(session.flush().is_err());
        assert_eq!(session.pending(), 1);
        assert_eq!(session.flush().unwrap(), 1);
    }

    #[test]
    fn direct_requests_hit_generic_cache() {
        let dam = dam();
        let cache = MemoryCache::new();
        let mut session = PermalinkSession::new(&dam, &cache, Duration::from_secs(60), false);

        let first = session.url_for(request(Some("t")), "a.jpg").unwrap();
        let second = session.url_for(request(Some("t")), "a.jpg").unwrap();
        assert_eq!(first, second);
        assert_eq!(dam.calls("get_permalink"), 1);
        assert_eq!(session.pending(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn untokened_requests_bypass_batching() {
        let dam = dam();
        let cache = MemoryCache::new();
        let mut session = PermalinkSession::new(&dam, &cache, Duration::from_secs(60), true);
        session.url_for(request(None), "a.jpg").unwrap();
        assert_eq!(session.pending(), 0);
        assert_eq!(dam.calls("get_permalink"), 1);
    }
}
