//! Conditional-request response cache.
//!
//! One [`HttpCache`] is built at startup and injected into the router as
//! middleware state. Entries are keyed by path, normalized query and the
//! configured request headers, and carry a strong ETag computed from the
//! response body.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// `Last-Modified` / `If-Modified-Since` wire format.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub etag: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub stored_at: Instant,
    pub last_modified: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            etag: etag_for(&body),
            status,
            headers,
            body,
            stored_at: Instant::now(),
            last_modified: Utc::now(),
        }
    }

    /// Whether a conditional request with these headers can be answered with 304.
    ///
    /// `If-None-Match` takes precedence: when present, `If-Modified-Since`
    /// is not consulted.
    pub fn is_fresh_for(&self, request: &HeaderMap) -> bool {
        if let Some(if_none_match) = request.get(header::IF_NONE_MATCH) {
            return if_none_match
                .to_str()
                .map(|v| etag_matches(v, &self.etag))
                .unwrap_or(false);
        }

        request
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
            .is_some_and(|since| since >= truncate_to_seconds(self.last_modified))
    }
}

struct Inner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_age: Duration,
    vary: Vec<HeaderName>,
    shutdown: CancellationToken,
}

/// Process-scoped response cache.
#[derive(Clone)]
pub struct HttpCache {
    inner: Arc<Inner>,
}

impl HttpCache {
    /// Builds a cache whose entries are served for `ttl` and swept after `max_age`.
    ///
    /// `Accept` is always part of the key, whatever `vary` lists.
    pub fn new(ttl: Duration, max_age: Duration, vary: Vec<HeaderName>) -> Self {
        let mut headers = vec![header::ACCEPT];
        for name in vary {
            if !headers.contains(&name) {
                headers.push(name);
            }
        }

        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                ttl,
                max_age: max_age.max(ttl),
                vary: headers,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn vary(&self) -> &[HeaderName] {
        &self.inner.vary
    }

    /// Key for a request under this cache's vary list.
    pub fn key_for(&self, path: &str, query: Option<&str>, headers: &HeaderMap, viewer: &str) -> String {
        let mut key = cache_key(path, query, headers, &self.inner.vary);
        key.push_str("|viewer=");
        key.push_str(viewer);
        key
    }

    /// Returns the entry for `key` if it is younger than the TTL.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.inner.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.stored_at.elapsed() < self.inner.ttl)
            .cloned()
    }

    pub async fn store(&self, key: String, entry: CacheEntry) {
        self.inner.entries.write().await.insert(key, entry);
    }

    /// Drops every entry for exactly `path`.
    pub async fn invalidate_path(&self, path: &str) -> usize {
        self.remove_where(|entry_path| entry_path == path).await
    }

    /// Drops every entry whose path starts with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.remove_where(|entry_path| entry_path.starts_with(prefix)).await
    }

    async fn remove_where<F: Fn(&str) -> bool>(&self, matches: F) -> usize {
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !matches(path_of(key)));
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!("Cache invalidated {} entries", removed);
        }
        removed
    }

    /// Evicts entries older than the absolute ceiling.
    pub async fn sweep(&self) -> usize {
        let max_age = self.inner.max_age;
        let mut entries = self.inner.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < max_age);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.inner.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Starts the periodic sweep. Runs until [`HttpCache::shutdown`].
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        let token = self.inner.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("🧹 Cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = cache.sweep().await;
                        if evicted > 0 {
                            tracing::debug!("🧹 Cache sweep evicted {} entries", evicted);
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

/// `path | sorted query | header=digest ...`.
///
/// Header values are hashed so credentials used for keying never sit in memory verbatim.
pub fn cache_key(path: &str, query: Option<&str>, headers: &HeaderMap, vary: &[HeaderName]) -> String {
    let mut params: Vec<&str> = query
        .unwrap_or_default()
        .split('&')
        .filter(|p| !p.is_empty())
        .collect();
    params.sort_unstable();

    let mut key = format!("{}|{}", path, params.join("&"));
    for name in vary {
        let digest = headers
            .get(name)
            .map(|v| blake3::hash(v.as_bytes()).to_hex().to_string())
            .unwrap_or_default();
        key.push('|');
        key.push_str(name.as_str());
        key.push('=');
        key.push_str(&digest);
    }
    key
}

fn path_of(key: &str) -> &str {
    key.split('|').next().unwrap_or_default()
}

/// Strong ETag: quoted BLAKE3 hex digest of the body.
pub fn etag_for(body: &[u8]) -> String {
    format!("\"{}\"", blake3::hash(body).to_hex())
}

/// Evaluates an `If-None-Match` value (list, weak validators, `*`) against `etag`.
pub fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE).to_string()
}

pub fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), HTTP_DATE)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
        .or_else(|| {
            DateTime::parse_from_rfc2822(raw.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(at.timestamp(), 0).single().unwrap_or(at)
}

/// Headers attached to every cacheable response.
pub fn validator_headers(cache: &HttpCache, entry: &CacheEntry) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&entry.etag) {
        headers.insert(header::ETAG, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format_http_date(entry.last_modified)) {
        headers.insert(header::LAST_MODIFIED, v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!(
        "private, max-age={}, must-revalidate",
        cache.ttl().as_secs()
    )) {
        headers.insert(header::CACHE_CONTROL, v);
    }

    let mut vary: Vec<&str> = cache.vary().iter().map(HeaderName::as_str).collect();
    for credential in ["authorization", "cookie"] {
        if !vary.contains(&credential) {
            vary.push(credential);
        }
    }
    if let Ok(v) = HeaderValue::from_str(&vary.join(", ")) {
        headers.insert(header::VARY, v);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn cache() -> HttpCache {
        HttpCache::new(Duration::from_secs(300), Duration::from_secs(3600), Vec::new())
    }

    #[test]
    fn test_query_order_is_normalized() {
        let h = headers(&[]);
        let vary = [header::ACCEPT];
        assert_eq!(
            cache_key("/users", Some("b=2&a=1"), &h, &vary),
            cache_key("/users", Some("a=1&b=2"), &h, &vary),
        );
        assert_ne!(
            cache_key("/users", Some("a=1"), &h, &vary),
            cache_key("/users", Some("a=2"), &h, &vary),
        );
    }

    #[test]
    fn test_accept_is_always_varied() {
        let cache = HttpCache::new(Duration::from_secs(1), Duration::from_secs(1), vec![header::AUTHORIZATION]);
        assert_eq!(cache.vary()[0], header::ACCEPT);

        let json = headers(&[("accept", "application/json")]);
        let hal = headers(&[("accept", "application/hal+json")]);
        assert_ne!(
            cache.key_for("/", None, &json, "-"),
            cache.key_for("/", None, &hal, "-"),
        );
    }

    #[test]
    fn test_credentials_are_hashed_in_key() {
        let h = headers(&[("authorization", "Bearer secret-token")]);
        let key = cache_key("/", None, &h, &[header::AUTHORIZATION]);
        assert!(!key.contains("secret-token"));
    }

    #[test]
    fn test_etag_matching() {
        let etag = etag_for(b"hello");
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag, etag_for(b"hello"));
        assert_ne!(etag, etag_for(b"hello!"));

        assert!(etag_matches(&etag, &etag));
        assert!(etag_matches(&format!("\"other\", W/{}", etag), &etag));
        assert!(etag_matches("*", &etag));
        assert!(!etag_matches("\"other\"", &etag));
    }

    #[test]
    fn test_http_date_round_trip() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        let formatted = format_http_date(at);
        assert_eq!(formatted, "Sun, 01 Mar 2026 12:30:05 GMT");
        assert_eq!(parse_http_date(&formatted), Some(at));
        assert!(parse_http_date("yesterday").is_none());
    }

    #[test]
    fn test_if_modified_since() {
        let entry = CacheEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"));
        let later = format_http_date(entry.last_modified + chrono::Duration::seconds(10));
        let earlier = format_http_date(entry.last_modified - chrono::Duration::seconds(10));

        let mut request = HeaderMap::new();
        request.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_str(&later).unwrap());
        assert!(entry.is_fresh_for(&request));

        request.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_str(&earlier).unwrap());
        assert!(!entry.is_fresh_for(&request));
    }

    #[test]
    fn test_if_none_match_overrides_if_modified_since() {
        let entry = CacheEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"));
        let later = format_http_date(entry.last_modified + chrono::Duration::seconds(10));

        let mut request = HeaderMap::new();
        request.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_str(&later).unwrap());
        request.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"stale\""));
        assert!(!entry.is_fresh_for(&request));

        request.insert(header::IF_NONE_MATCH, HeaderValue::from_str(&entry.etag).unwrap());
        assert!(entry.is_fresh_for(&request));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_hides_entries_and_sweep_evicts() {
        let cache = HttpCache::new(Duration::from_secs(10), Duration::from_secs(60), Vec::new());
        let entry = CacheEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"));
        cache.store("k".to_string(), entry).await;

        assert!(cache.lookup("k").await.is_some());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.lookup("k").await.is_none());
        assert_eq!(cache.sweep().await, 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.sweep().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalidation_by_path() {
        let cache = cache();
        let h = HeaderMap::new();
        for path in ["/users/1/sessions", "/users/1/api-keys", "/"] {
            let entry = CacheEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"));
            cache.store(cache.key_for(path, None, &h, "-"), entry).await;
        }

        assert_eq!(cache.invalidate_prefix("/users/1/sessions").await, 1);
        assert_eq!(cache.invalidate_path("/").await, 1);
        assert_eq!(cache.len().await, 1);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let cache = cache();
        let handle = cache.spawn_sweeper(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(3)).await;

        cache.shutdown();
        handle.await.unwrap();
    }
}
