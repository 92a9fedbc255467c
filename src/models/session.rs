use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One authenticated device/browser context.
///
/// `session_signature` binds the record to the context it was issued under.
/// It is only ever compared against a signature recomputed from an incoming
/// request, and it never leaves the service: HAL renderings go through
/// [`SessionView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub session_signature: String,
    pub ip_address: String,
    pub user_agent: String,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub date_expires: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.date_expires
    }

    pub fn view(&self, current: bool) -> SessionView {
        SessionView {
            session_id: self.session_id,
            user_id: self.user_id,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            date_created: self.date_created,
            date_modified: self.date_modified,
            date_expires: self.date_expires,
            current,
        }
    }
}

/// The public rendering of a [`Session`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub date_expires: DateTime<Utc>,
    /// Whether this is the session the request was made with.
    pub current: bool,
}
