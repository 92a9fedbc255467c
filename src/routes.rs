use std::time::Duration;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    error::{AppError, Result},
    handlers,
    middleware_layer::{
        auth::{attach_principal, require_session},
        cache::conditional_get,
        rate_limit::limit_per_ip,
    },
    state::AppState,
};

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://[::1]:3000"),
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::COOKIE,
            header::IF_NONE_MATCH,
            header::IF_MODIFIED_SINCE,
        ])
        .allow_credentials(true)
        .expose_headers([
            header::ETAG,
            header::LAST_MODIFIED,
            HeaderName::from_static("x-cache"),
        ])
        .max_age(Duration::from_secs(86400))
}

async fn not_found() -> AppError {
    AppError::NotFound
}

/// Builds the application router.
///
/// Layers, outermost first: CORS, cookies, tracing, principal resolution,
/// conditional-request cache. Routes under `/users` additionally require a
/// session.
pub fn app(state: AppState) -> Result<Router> {
    let authorize_routes = Router::new().route("/auth/authorize", post(handlers::auth::authorize));
    let authorize_routes = match &state.config.authorize_rate_limit {
        Some(limit) => limit_per_ip(authorize_routes, limit, &state.config.trusted_proxies)?,
        None => authorize_routes,
    };

    let public_routes = Router::new()
        .route("/", get(handlers::entry::index))
        .route("/auth/reauthorize", post(handlers::auth::reauthorize))
        .route("/auth/revoke", post(handlers::auth::revoke))
        .merge(authorize_routes);

    let protected_routes = Router::new()
        .route(
            "/users/{user_id}/sessions",
            get(handlers::sessions::list_sessions).post(handlers::sessions::post_sessions),
        )
        .route(
            "/users/{user_id}/sessions/{session_id}",
            get(handlers::sessions::show_session)
                .delete(handlers::sessions::delete_session)
                .post(handlers::sessions::delete_session),
        )
        .route(
            "/users/{user_id}/api-keys",
            get(handlers::api_keys::list_api_keys).post(handlers::api_keys::post_api_keys),
        )
        .route(
            "/users/{user_id}/api-keys/{api_key_id}",
            post(handlers::api_keys::delete_api_key).delete(handlers::api_keys::delete_api_key),
        )
        .route_layer(from_fn(require_session));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(not_found)
        .layer(from_fn_with_state(state.cache.clone(), conditional_get))
        .layer(from_fn_with_state(state.clone(), attach_principal))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(cors())
        .with_state(state);

    Ok(app)
}
