use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
};
use garde::Validate;
use serde::{Deserialize, Serialize};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};
use zeroize::Zeroizing;

use crate::{
    error::Result,
    hal::{self, HalResource, Link},
    models::{
        session::SessionView,
        user::{Features, User, UserProfile},
    },
    negotiation::{Caller, RequestData, SESSION_COOKIE},
    services::IdentityProof,
    state::AppState,
    validation::validate,
};

use super::{authorize_template, revoke_template, verify_template};

/// The request payload for signing in.
#[derive(Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthorizeRequest {
    #[garde(length(min = 1))]
    pub access_token: String,
    #[garde(email)]
    pub email: String,
    #[garde(length(min = 1, max = 255))]
    pub first_name: String,
    #[garde(length(min = 1, max = 255))]
    pub last_name: String,
    #[garde(length(chars, min = 32))]
    pub session_key: String,
}

impl std::fmt::Debug for AuthorizeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub session_token: String,
    pub session: SessionView,
    pub user: User,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub active: bool,
}

/// Creates a secure cookie with the given name, value, and max age.
fn create_secure_cookie(name: &str, value: String, max_age_days: i64, is_production: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), value);

    cookie.set_http_only(true);
    if is_production {
        cookie.set_secure(true);
    }

    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age_days * 86400));
    cookie.set_path("/");

    cookie
}

fn clear_session_cookie(cookies: &Cookies) {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_max_age(Duration::seconds(0));
    cookie.set_path("/");
    cookies.remove(cookie);
}

/// Signs in: verifies the identity proof and opens a session bound to the caller's context.
pub async fn authorize(
    State(state): State<AppState>,
    cookies: Cookies,
    caller: Caller,
    data: RequestData,
) -> Result<Response> {
    let payload: AuthorizeRequest = data.payload()?;
    tracing::info!("🔐 Authorize attempt - Payload: {:?}", payload);
    validate(&payload)?;

    let proof = IdentityProof {
        access_token: Zeroizing::new(payload.access_token),
        profile: UserProfile {
            email: payload.email.trim().to_lowercase(),
            first_name: payload.first_name.trim().to_string(),
            last_name: payload.last_name.trim().to_string(),
        },
    };
    let session_key = Zeroizing::new(payload.session_key);

    let authorization = state
        .authority
        .authorize(proof, &caller.context, &session_key)
        .await?;

    cookies.add(create_secure_cookie(
        SESSION_COOKIE,
        authorization.token.clone(),
        state.config.session_duration_days,
        state.config.is_production(),
    ));
    tracing::info!("✅ Session cookie added: session={}", authorization.session.session_id);

    let user = authorization.user;
    let base = format!("/users/{}", user.user_id);
    let self_href = format!("{base}/sessions/{}", authorization.session.session_id);

    let resource = HalResource::new(
        self_href,
        AuthorizeResponse {
            session_token: authorization.token,
            session: authorization.session.view(true),
            user: user.clone(),
        },
    )
    .link("index", Link::new("/"))
    .link_if(
        user.has_feature(Features::SESSION_MANAGEMENT),
        "sessions",
        Link::new(format!("{base}/sessions")),
    )
    .template("verify", verify_template())
    .template("revoke", revoke_template());

    Ok(hal::render(StatusCode::CREATED, &resource))
}

/// Verifies the presented session against the caller's context and extends it.
pub async fn reauthorize(
    State(state): State<AppState>,
    cookies: Cookies,
    caller: Caller,
) -> Result<Response> {
    let token = caller.require_token()?;
    let active = state.authority.reauthorize(token, &caller.context).await?;

    if cookies.get(SESSION_COOKIE).is_some() {
        cookies.add(create_secure_cookie(
            SESSION_COOKIE,
            token.to_string(),
            state.config.session_duration_days,
            state.config.is_production(),
        ));
    }

    let resource = HalResource::new(
        "/auth/reauthorize",
        SessionStatus { active },
    )
    .link("index", Link::new("/"))
    .template("verify", verify_template())
    .template("revoke", revoke_template());

    Ok(hal::render(StatusCode::OK, &resource))
}

/// Signs out of the presented session. Succeeds when the session is already gone.
pub async fn revoke(
    State(state): State<AppState>,
    cookies: Cookies,
    caller: Caller,
) -> Result<Response> {
    let token = caller.require_token()?;
    let revoked = state.authority.unauthorize(token, &caller.context).await?;

    clear_session_cookie(&cookies);
    tracing::info!("👋 Sign out processed (session removed: {})", revoked);

    let resource = HalResource::new(
        "/auth/revoke",
        SessionStatus { active: false },
    )
    .link("index", Link::new("/"))
    .template("authorize", authorize_template());

    Ok(hal::render(StatusCode::OK, &resource))
}
