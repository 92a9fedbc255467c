use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A long-lived bearer credential. Never bound to a network context.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKey {
    pub api_key_id: Uuid,
    pub api_key: String,
    pub user_id: Uuid,
    pub label: String,
    pub date_created: DateTime<Utc>,
}

impl ApiKey {
    /// Listing view: only the first characters of the secret are shown.
    pub fn view(&self) -> ApiKeyView {
        ApiKeyView {
            api_key_id: self.api_key_id,
            label: self.label.clone(),
            hint: self.api_key.chars().take(4).collect(),
            date_created: self.date_created,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyView {
    pub api_key_id: Uuid,
    pub label: String,
    pub hint: String,
    pub date_created: DateTime<Utc>,
}
