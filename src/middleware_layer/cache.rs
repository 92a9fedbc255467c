use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{
    cache::{CacheEntry, HttpCache, validator_headers},
    error::AppError,
    middleware_layer::auth::Principal,
};

/// Largest response body the cache will buffer.
const MAX_CACHED_BODY: usize = 4 * 1024 * 1024;

/// Response extension: extra paths whose cached representations a handler invalidated.
#[derive(Debug, Clone, Default)]
pub struct CacheInvalidation(pub Vec<String>);

/// Response headers worth replaying from a snapshot.
const REPLAYED: [header::HeaderName; 2] = [header::CONTENT_TYPE, header::CONTENT_LANGUAGE];

/// Serves GETs from the cache with ETag / Last-Modified validation and
/// invalidates cached representations after successful writes.
pub async fn conditional_get(
    State(cache): State<HttpCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return invalidate_after(&cache, request, next).await;
    }

    let viewer = request
        .extensions()
        .get::<Principal>()
        .map(Principal::viewer_key)
        .unwrap_or_else(|| "-".to_string());
    let key = cache.key_for(
        request.uri().path(),
        request.uri().query(),
        request.headers(),
        &viewer,
    );
    let conditional = request.headers().clone();

    if let Some(entry) = cache.lookup(&key).await {
        if entry.is_fresh_for(&conditional) {
            tracing::debug!("Cache 304 for {}", request.uri().path());
            return not_modified(&cache, &entry);
        }
        tracing::debug!("Cache HIT for {}", request.uri().path());
        return replay(&cache, &entry, "HIT");
    }

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    if response.body().size_hint().lower() > MAX_CACHED_BODY as u64 {
        tracing::debug!("Response too large to cache, passing through");
        let mut response = response;
        response
            .headers_mut()
            .insert("x-cache", HeaderValue::from_static("BYPASS"));
        return response;
    }

    let (parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return AppError::Internal(format!("failed to buffer response for caching: {}", e)).into_response();
        }
    };

    let mut snapshot = HeaderMap::new();
    for name in REPLAYED {
        if let Some(value) = parts.headers.get(&name) {
            snapshot.insert(name, value.clone());
        }
    }

    let entry = CacheEntry::new(parts.status, snapshot, body);
    cache.store(key, entry.clone()).await;

    if entry.is_fresh_for(&conditional) {
        return not_modified(&cache, &entry);
    }
    replay(&cache, &entry, "MISS")
}

async fn invalidate_after(cache: &HttpCache, request: Request<Body>, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    if response.status().is_success() {
        cache.invalidate_prefix(&path).await;
        if let Some(CacheInvalidation(paths)) = response.extensions().get::<CacheInvalidation>() {
            for extra in paths {
                cache.invalidate_path(extra).await;
            }
        }
    }
    response
}

fn replay(cache: &HttpCache, entry: &CacheEntry, outcome: &'static str) -> Response {
    let mut response = Response::new(Body::from(entry.body.clone()));
    *response.status_mut() = entry.status;
    copy_headers(response.headers_mut(), &entry.headers);
    copy_headers(response.headers_mut(), &validator_headers(cache, entry));
    response
        .headers_mut()
        .insert("x-cache", HeaderValue::from_static(outcome));
    response
}

/// 304: validators only, no body.
fn not_modified(cache: &HttpCache, entry: &CacheEntry) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    copy_headers(response.headers_mut(), &validator_headers(cache, entry));
    response
        .headers_mut()
        .insert("x-cache", HeaderValue::from_static("HIT"));
    response
}

fn copy_headers(target: &mut HeaderMap, source: &HeaderMap) {
    for (name, value) in source {
        target.insert(name.clone(), value.clone());
    }
}
