use axum::{
    Extension,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    hal::{self, HalResource, Link, Page, Property, Template},
    middleware_layer::{auth::Principal, cache::CacheInvalidation},
    models::{
        api_key::{ApiKey, ApiKeyView},
        outcome::BulkOutcome,
        user::Features,
    },
    negotiation::RequestData,
    services::api_keys::{self as api_key_service, MAX_LABEL_LEN},
    state::AppState,
    validation::validate,
};

use super::{delete_template, ensure_access, page_request, parse_id};

/// Body field listing the keys to delete in bulk.
pub const API_KEY_IDS_FIELD: &str = "apiKeyIds";

/// The request payload for creating an API key.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct CreateApiKeyRequest {
    #[garde(length(chars, min = 1, max = 255))]
    pub label: String,
}

/// A freshly issued key. The only rendering that carries the secret.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedApiKey {
    pub api_key_id: Uuid,
    pub api_key: String,
    pub label: String,
    pub date_created: DateTime<Utc>,
}

#[derive(Serialize, Default)]
pub struct ApiKeyListing {}

fn collection_href(user_id: &Uuid) -> String {
    format!("/users/{}/api-keys", user_id)
}

fn create_template(href: &str) -> Template {
    Template::new(Method::POST, href)
        .titled("Create API key")
        .property(
            Property::new("label")
                .prompt("Label")
                .required()
                .max_length(MAX_LABEL_LEN)
                .kind("text"),
        )
}

fn render_key(key: ApiKey) -> HalResource<ApiKeyView> {
    let collection = collection_href(&key.user_id);
    let href = format!("{}/{}", collection, key.api_key_id);

    HalResource::new(href.clone(), key.view())
        .link("collection", Link::new(collection))
        .template("delete", delete_template(href, "Delete API key", None))
}

async fn list(state: &AppState, user_id: Uuid, data: &RequestData) -> Result<Response> {
    let page = page_request(data)?;
    let keys = api_key_service::list(state.api_keys.as_ref(), &user_id, &page).await?;
    let href = collection_href(&user_id);

    let resource = HalResource::<Page<ApiKeyListing>>::collection(&href, "apiKeys", keys, render_key)?
        .link("index", Link::new("/"))
        .template("create", create_template(&href))
        .template(
            "bulkDelete",
            delete_template(href.clone(), "Delete API keys", Some(API_KEY_IDS_FIELD)),
        );

    Ok(resource.into_response())
}

async fn create(state: &AppState, user_id: Uuid, data: &RequestData) -> Result<Response> {
    let payload: CreateApiKeyRequest = data.payload()?;
    validate(&payload)?;

    let key = api_key_service::issue(state.api_keys.as_ref(), user_id, &payload.label).await?;
    let href = format!("{}/{}", collection_href(&user_id), key.api_key_id);

    let resource = HalResource::new(
        href.clone(),
        IssuedApiKey {
            api_key_id: key.api_key_id,
            api_key: key.api_key,
            label: key.label,
            date_created: key.date_created,
        },
    )
    .link("collection", Link::new(collection_href(&user_id)))
    .template("delete", delete_template(href, "Delete API key", None));

    Ok(hal::render(StatusCode::CREATED, &resource))
}

/// `GET /users/{user_id}/api-keys`.
pub async fn list_api_keys(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
    data: RequestData,
) -> Result<Response> {
    let user_id = parse_id(&user_id)?;
    ensure_access(&principal.user, &user_id, Features::API_KEYS)?;

    list(&state, user_id, &data).await
}

/// `POST /users/{user_id}/api-keys`: create, or bulk delete with `_method=DELETE`.
pub async fn post_api_keys(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
    data: RequestData,
) -> Result<Response> {
    let user_id = parse_id(&user_id)?;
    ensure_access(&principal.user, &user_id, Features::API_KEYS)?;

    if data.is_delete(&Method::POST) {
        let ids = data.ids(API_KEY_IDS_FIELD)?;
        tracing::info!("🗑️ Bulk API key delete for user {} ({} ids)", user_id, ids.len());
        let outcome = api_key_service::revoke_many(state.api_keys.as_ref(), &user_id, &ids).await;

        let resource = HalResource::new(collection_href(&user_id), outcome)
            .link("index", Link::new("/"));
        return Ok(resource.into_response());
    }

    create(&state, user_id, &data).await
}

/// `DELETE /users/{user_id}/api-keys/{api_key_id}`, also reachable as a POST with `_method=DELETE`.
pub async fn delete_api_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((user_id, api_key_id)): Path<(String, String)>,
    method: Method,
    data: RequestData,
) -> Result<Response> {
    if !data.is_delete(&method) {
        return Err(AppError::http(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
            "Submit with _method=DELETE to delete this API key",
        ));
    }

    let user_id = parse_id(&user_id)?;
    let api_key_id = parse_id(&api_key_id)?;
    ensure_access(&principal.user, &user_id, Features::API_KEYS)?;

    if !api_key_service::revoke(state.api_keys.as_ref(), &user_id, &api_key_id).await? {
        return Err(AppError::NotFound);
    }

    let mut outcome = BulkOutcome::default();
    outcome.record(api_key_id, true);

    let collection = collection_href(&user_id);
    let mut response = HalResource::new(collection.clone(), outcome)
        .link("index", Link::new("/"))
        .into_response();
    response
        .extensions_mut()
        .insert(CacheInvalidation(vec![collection]));

    Ok(response)
}
