use chrono::Utc;
use futures::future::join_all;
use uuid::Uuid;

use crate::crypto::api_key::generate_api_key;
use crate::error::{AppError, Result};
use crate::models::api_key::ApiKey;
use crate::models::outcome::BulkOutcome;
use crate::models::paging::{PageRequest, Paginated};
use crate::repositories::ApiKeyStore;

/// Longest label a key may carry.
pub const MAX_LABEL_LEN: usize = 255;

/// Issues a new API key for `user_id`.
///
/// The returned record is the only place the full secret is exposed; listings
/// render a hint.
pub async fn issue(store: &dyn ApiKeyStore, user_id: Uuid, label: &str) -> Result<ApiKey> {
    let label = label.trim();
    if label.is_empty() {
        return Err(AppError::validation("label", "label is required"));
    }
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(AppError::validation(
            "label",
            format!("label must be at most {} characters", MAX_LABEL_LEN),
        ));
    }

    let api_key = ApiKey {
        api_key_id: Uuid::now_v7(),
        api_key: generate_api_key(),
        user_id,
        label: label.to_string(),
        date_created: Utc::now(),
    };

    store.create(&api_key).await?;
    tracing::info!("🔑 API key {} issued for user {}", api_key.api_key_id, user_id);

    Ok(api_key)
}

pub async fn list(store: &dyn ApiKeyStore, user_id: &Uuid, page: &PageRequest) -> Result<Paginated<ApiKey>> {
    let slice = store.list(user_id, page).await?;
    let total = store.count(user_id).await?;

    Ok(Paginated::from_slice(page, slice, Some(total), |k| {
        k.api_key_id.to_string()
    }))
}

/// Revokes one key owned by `user_id`. `false` when no such key exists.
pub async fn revoke(store: &dyn ApiKeyStore, user_id: &Uuid, api_key_id: &Uuid) -> Result<bool> {
    match store.get(api_key_id).await? {
        Some(key) if key.user_id == *user_id => {
            let deleted = store.delete(api_key_id).await?;
            if deleted {
                tracing::info!("API key {} revoked for user {}", api_key_id, user_id);
            }
            Ok(deleted)
        }
        Some(_) => {
            tracing::warn!("API key {} is not owned by user {}", api_key_id, user_id);
            Ok(false)
        }
        None => Ok(false),
    }
}

/// Best-effort bulk revocation, reported per key.
pub async fn revoke_many(store: &dyn ApiKeyStore, user_id: &Uuid, api_key_ids: &[Uuid]) -> BulkOutcome {
    let attempts = api_key_ids.iter().map(|id| async move {
        match revoke(store, user_id, id).await {
            Ok(removed) => (*id, removed),
            Err(e) => {
                tracing::warn!("Bulk API key revoke failed for {}: {}", id, e);
                (*id, false)
            }
        }
    });

    let mut outcome = BulkOutcome::default();
    for (id, removed) in join_all(attempts).await {
        outcome.record(id, removed);
    }
    outcome
}
