use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Privilege level of an account. Variants are ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "user_role")]
pub enum Role {
    #[default]
    #[postgres(name = "base")]
    Base,
    #[postgres(name = "support")]
    Support,
    #[postgres(name = "account_manager")]
    AccountManager,
    #[postgres(name = "admin")]
    Admin,
}

/// Independently togglable capabilities of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(u32);

impl Features {
    pub const NONE: Features = Features(0);
    /// May list and revoke its own sessions.
    pub const SESSION_MANAGEMENT: Features = Features(1 << 0);
    /// May issue and revoke API keys.
    pub const API_KEYS: Features = Features(1 << 1);

    pub const fn from_bits(bits: u32) -> Self {
        Features(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Features) -> Self {
        Features(self.0 | other.0)
    }

    pub const fn without(self, other: Features) -> Self {
        Features(self.0 & !other.0)
    }
}

/// Features granted to an account when it is first created.
impl Default for Features {
    fn default() -> Self {
        Features::SESSION_MANAGEMENT.union(Features::API_KEYS)
    }
}

/// Represents an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub features: Features,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

/// The identity fields the authority upserts on every sign-in.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    /// A fresh account for `profile` with the default role and features.
    pub fn from_profile(profile: &UserProfile) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::now_v7(),
            email: profile.email.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            role: Role::default(),
            features: Features::default(),
            date_created: now,
            date_modified: now,
        }
    }

    pub fn has_feature(&self, feature: Features) -> bool {
        self.features.contains(feature)
    }

    /// Whether this user may address resources owned by `owner`.
    pub fn can_manage(&self, owner: &Uuid) -> bool {
        self.user_id == *owner || self.role >= Role::AccountManager
    }
}
