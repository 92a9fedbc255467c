use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::Request,
    response::{IntoResponse, Response},
};
use tower_governor::{GovernorError, GovernorLayer, governor::GovernorConfigBuilder, key_extractor::KeyExtractor};

use crate::config::{RateLimit, TrustedProxies};
use crate::error::{AppError, Result};
use crate::negotiation::client_ip;

/// Keys the bucket by the same client address sessions are bound to.
#[derive(Debug, Clone)]
pub struct ClientIpKeyExtractor {
    trusted: TrustedProxies,
}

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn name(&self) -> &'static str {
        "client IP"
    }

    fn extract<T>(&self, req: &Request<T>) -> std::result::Result<Self::Key, GovernorError> {
        client_ip(req.headers(), req.extensions(), &self.trusted).ok_or(GovernorError::UnableToExtractKey)
    }

    fn key_name(&self, key: &Self::Key) -> Option<String> {
        Some(key.to_string())
    }
}

/// Wraps `router` in a per-client-IP token bucket.
pub fn limit_per_ip<S>(router: Router<S>, limit: &RateLimit, trusted: &TrustedProxies) -> Result<Router<S>>
where
    S: Clone + Send + Sync + 'static,
{
    let config = GovernorConfigBuilder::default()
        .key_extractor(ClientIpKeyExtractor {
            trusted: trusted.clone(),
        })
        .per_second(limit.replenish_secs)
        .burst_size(limit.burst)
        .use_headers()
        .finish()
        .ok_or_else(|| AppError::Internal("invalid rate limit configuration".to_string()))?;

    tracing::info!(
        "✅ Rate limit: burst {} per IP, one request replenished every {}s",
        limit.burst,
        limit.replenish_secs
    );

    Ok(router.layer(GovernorLayer::new(Arc::new(config)).error_handler(rejection)))
}

/// Renders governor rejections as HAL errors, keeping its rate-limit headers.
fn rejection(error: GovernorError) -> Response {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut response =
                AppError::RateLimitExceeded(format!("Retry in {}s", wait_time)).into_response();
            if let Some(headers) = headers {
                response.headers_mut().extend(headers);
            }
            response
        }
        GovernorError::UnableToExtractKey => {
            AppError::Internal("no client address to rate limit on".to_string()).into_response()
        }
        GovernorError::Other { code, msg, .. } => AppError::http(
            code,
            code.canonical_reason().unwrap_or("Error"),
            msg.unwrap_or_default(),
        )
        .into_response(),
    }
}
