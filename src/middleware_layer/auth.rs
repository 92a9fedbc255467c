use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use tower_cookies::Cookies;

use crate::{
    error::AppError,
    models::{session::Session, user::User},
    negotiation::Caller,
    state::AppState,
};

/// The session and account a request was attributed to.
#[derive(Debug, Clone)]
pub struct Principal {
    pub session: Session,
    pub user: User,
}

impl Principal {
    /// Stable identity of the viewer, used to key cached representations.
    pub fn viewer_key(&self) -> String {
        self.session.session_id.to_string()
    }
}

/// Extracts the principal when one was attributed, `None` for anonymous callers.
#[derive(Debug, Clone)]
pub struct MaybePrincipal(pub Option<Principal>);

impl<S> FromRequestParts<S> for MaybePrincipal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybePrincipal(parts.extensions.get::<Principal>().cloned()))
    }
}

/// Attributes the request to a session when a valid token is presented.
///
/// Invalid, expired or mismatched tokens leave the request anonymous; routes
/// that need a session reject it in [`require_session`]. Infrastructure
/// failures (timeouts, store errors) are returned to the caller.
pub async fn attach_principal(
    State(state): State<AppState>,
    cookies: Cookies,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let caller = Caller::from_parts(&parts, Some(&cookies), &state.config.trusted_proxies);

    if let Some(token) = caller.token.as_deref() {
        match state.authority.resolve(token, &caller.context).await {
            Ok((session, user)) => {
                tracing::debug!("✅ Request attributed to session {}", session.session_id);
                parts.extensions.insert(Principal { session, user });
            }
            Err(AppError::InvalidSession) => {
                tracing::debug!("Presented session token is not valid, continuing anonymously");
            }
            Err(e) => return e.into_response(),
        }
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Rejects requests that were not attributed to a session.
pub async fn require_session(request: Request<Body>, next: Next) -> Response {
    if request.extensions().get::<Principal>().is_none() {
        tracing::warn!("❌ Protected route requested without a valid session: {}", request.uri().path());
        return AppError::InvalidSession.into_response();
    }

    next.run(request).await
}
