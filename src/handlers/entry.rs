use serde::Serialize;
use uuid::Uuid;

use crate::{
    hal::{HalResource, Link},
    middleware_layer::auth::MaybePrincipal,
    models::user::{Features, Role},
};

use super::{authorize_template, revoke_template, verify_template};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// The entry point. Its links and templates are the caller's capabilities.
pub async fn index(MaybePrincipal(principal): MaybePrincipal) -> HalResource<EntryPoint> {
    let Some(principal) = principal else {
        return HalResource::new(
            "/",
            EntryPoint {
                authenticated: false,
                user_id: None,
                email: None,
                role: None,
            },
        )
        .template("authorize", authorize_template());
    };

    let user = principal.user;
    let base = format!("/users/{}", user.user_id);

    HalResource::new(
        "/",
        EntryPoint {
            authenticated: true,
            user_id: Some(user.user_id),
            email: Some(user.email.clone()),
            role: Some(user.role),
        },
    )
    .link_if(
        user.has_feature(Features::SESSION_MANAGEMENT),
        "sessions",
        Link::new(format!("{base}/sessions")).titled("Sessions"),
    )
    .link_if(
        user.has_feature(Features::API_KEYS),
        "api-keys",
        Link::new(format!("{base}/api-keys")).titled("API keys"),
    )
    .template("verify", verify_template())
    .template("revoke", revoke_template())
}
