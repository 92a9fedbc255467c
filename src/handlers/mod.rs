pub mod api_keys;
pub mod auth;
pub mod entry;
pub mod sessions;

use axum::http::Method;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    hal::{Property, Template},
    models::{paging::PageRequest, user::{Features, User}},
    negotiation::{METHOD_FIELD, RequestData},
};

/// Checks that `viewer` may address resources of `owner` and holds `feature`.
pub(crate) fn ensure_access(viewer: &User, owner: &Uuid, feature: Features) -> Result<()> {
    if !viewer.can_manage(owner) {
        tracing::warn!("User {} denied access to resources of {}", viewer.user_id, owner);
        return Err(AppError::Forbidden);
    }
    if !viewer.has_feature(feature) {
        tracing::warn!("User {} lacks feature {:#b}", viewer.user_id, feature.bits());
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Path ids that do not parse name no resource.
pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound)
}

/// Cursor and limit from the body or the query string.
pub(crate) fn page_request(data: &RequestData) -> Result<PageRequest> {
    let limit = match data.text("limit") {
        Some(raw) => Some(
            raw.trim()
                .parse::<usize>()
                .map_err(|_| AppError::validation("limit", "limit must be a positive integer"))?,
        ),
        None => None,
    };
    PageRequest::from_raw(data.text("cursor").as_deref(), limit)
}

/// A DELETE affordance submitted as a form POST carrying `_method`.
pub(crate) fn delete_template(target: impl Into<String>, title: &str, ids_field: Option<&str>) -> Template {
    let mut template = Template::new(Method::POST, target)
        .titled(title)
        .property(Property {
            value: Some(Method::DELETE.to_string()),
            read_only: true,
            ..Property::new(METHOD_FIELD)
        });
    if let Some(field) = ids_field {
        template = template.property(Property::new(field).required().kind("text"));
    }
    template
}

pub(crate) fn authorize_template() -> Template {
    Template::new(Method::POST, "/auth/authorize")
        .titled("Sign in")
        .property(Property::new("accessToken").required().kind("text"))
        .property(Property::new("email").required().kind("email"))
        .property(Property::new("firstName").required().max_length(255).kind("text"))
        .property(Property::new("lastName").required().max_length(255).kind("text"))
        .property(
            Property::new("sessionKey")
                .required()
                .min_length(crate::crypto::signature::SESSION_KEY_LEN)
                .kind("text"),
        )
}

pub(crate) fn verify_template() -> Template {
    Template::new(Method::POST, "/auth/reauthorize").titled("Verify session")
}

pub(crate) fn revoke_template() -> Template {
    Template::new(Method::POST, "/auth/revoke").titled("Sign out")
}
