use axum::{
    Extension,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    hal::{HalResource, Link, Page},
    middleware_layer::{auth::Principal, cache::CacheInvalidation},
    models::{
        outcome::BulkOutcome,
        session::{Session, SessionView},
        user::Features,
    },
    negotiation::RequestData,
    state::AppState,
};

use super::{delete_template, ensure_access, page_request, parse_id};

/// Body field listing the sessions to revoke in bulk.
pub const SESSION_IDS_FIELD: &str = "sessionIds";

#[derive(Serialize, Default)]
pub struct SessionListing {}

fn collection_href(user_id: &Uuid) -> String {
    format!("/users/{}/sessions", user_id)
}

fn render_session(session: Session, current: &Uuid) -> HalResource<SessionView> {
    let href = format!("{}/{}", collection_href(&session.user_id), session.session_id);
    let is_current = session.session_id == *current;

    HalResource::new(href.clone(), session.view(is_current))
        .link("collection", Link::new(collection_href(&session.user_id)))
        .template("delete", delete_template(href, "Revoke session", None))
}

async fn list(state: &AppState, principal: &Principal, user_id: Uuid, data: &RequestData) -> Result<Response> {
    let page = page_request(data)?;
    let sessions = state.authority.get_sessions(&user_id, &page).await?;
    let current = principal.session.session_id;
    let href = collection_href(&user_id);

    let resource = HalResource::<Page<SessionListing>>::collection(&href, "sessions", sessions, |s| {
        render_session(s, &current)
    })?
    .link("index", Link::new("/"))
    .template(
        "bulkRevoke",
        delete_template(href.clone(), "Revoke sessions", Some(SESSION_IDS_FIELD)),
    );

    Ok(resource.into_response())
}

async fn bulk_revoke(state: &AppState, user_id: Uuid, data: &RequestData) -> Result<Response> {
    let ids = data.ids(SESSION_IDS_FIELD)?;
    let outcome = state.authority.revoke_sessions(&user_id, &ids).await?;

    let resource = HalResource::new(collection_href(&user_id), outcome)
        .link("index", Link::new("/"));
    Ok(resource.into_response())
}

/// `GET /users/{user_id}/sessions`.
pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
    data: RequestData,
) -> Result<Response> {
    let user_id = parse_id(&user_id)?;
    ensure_access(&principal.user, &user_id, Features::SESSION_MANAGEMENT)?;

    list(&state, &principal, user_id, &data).await
}

/// `POST /users/{user_id}/sessions`: body-carried paging, or bulk revoke with `_method=DELETE`.
pub async fn post_sessions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
    data: RequestData,
) -> Result<Response> {
    let user_id = parse_id(&user_id)?;
    ensure_access(&principal.user, &user_id, Features::SESSION_MANAGEMENT)?;

    if data.is_delete(&Method::POST) {
        tracing::info!("🗑️ Bulk session revoke for user {} by {}", user_id, principal.user.user_id);
        return bulk_revoke(&state, user_id, &data).await;
    }

    list(&state, &principal, user_id, &data).await
}

async fn owned_session(state: &AppState, principal: &Principal, user_id: &str, session_id: &str) -> Result<Session> {
    let user_id = parse_id(user_id)?;
    let session_id = parse_id(session_id)?;
    ensure_access(&principal.user, &user_id, Features::SESSION_MANAGEMENT)?;

    match state.authority.get_session(&session_id).await? {
        Some(session) if session.user_id == user_id => Ok(session),
        _ => Err(AppError::NotFound),
    }
}

/// `GET /users/{user_id}/sessions/{session_id}`.
pub async fn show_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((user_id, session_id)): Path<(String, String)>,
) -> Result<Response> {
    let session = owned_session(&state, &principal, &user_id, &session_id).await?;
    Ok(render_session(session, &principal.session.session_id).into_response())
}

/// `DELETE /users/{user_id}/sessions/{session_id}`, also reachable as a POST with `_method=DELETE`.
pub async fn delete_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((user_id, session_id)): Path<(String, String)>,
    method: Method,
    data: RequestData,
) -> Result<Response> {
    if !data.is_delete(&method) {
        return Err(AppError::http(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
            "Submit with _method=DELETE to revoke this session",
        ));
    }

    let session = owned_session(&state, &principal, &user_id, &session_id).await?;
    let revoked = state.authority.revoke_session(&session.session_id).await?;

    let mut outcome = BulkOutcome::default();
    outcome.record(session.session_id, revoked);

    let collection = collection_href(&session.user_id);
    let mut response = HalResource::new(collection.clone(), outcome)
        .link("index", Link::new("/"))
        .into_response();
    response
        .extensions_mut()
        .insert(CacheInvalidation(vec![collection]));

    Ok(response)
}
