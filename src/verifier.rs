//! Identity-provider access token verification.
//!
//! A token verifies only when the provider accepts it and it belongs to the
//! email the caller claims.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{AppError, Result};

#[async_trait]
pub trait AccessTokenVerifier: Send + Sync {
    /// Returns whether the provider accepts `access_token` as issued to `email`.
    async fn verify(&self, access_token: &str, email: &str) -> Result<bool>;
}

/// The part of a user-info response we check.
#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: Option<String>,
}

fn same_email(claimed: &str, actual: &str) -> bool {
    claimed.trim().eq_ignore_ascii_case(actual.trim())
}

/// Verifies tokens by presenting them to the provider's user-info endpoint.
///
/// A 2xx answer whose `email` claim matches verifies the token; 401/403
/// rejects it; anything else is a provider failure and surfaces as an error
/// rather than a rejection.
#[derive(Clone)]
pub struct UserInfoVerifier {
    client: reqwest::Client,
    endpoint: String,
}

impl UserInfoVerifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl AccessTokenVerifier for UserInfoVerifier {
    async fn verify(&self, access_token: &str, email: &str) -> Result<bool> {
        if access_token.trim().is_empty() || email.trim().is_empty() {
            return Ok(false);
        }

        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await?;
                let info: UserInfo = sonic_rs::from_slice(&body).map_err(|e| {
                    tracing::error!("Unreadable user-info response: {}", e);
                    AppError::Internal("identity provider sent an unreadable user-info response".to_string())
                })?;

                match info.email {
                    Some(actual) if same_email(email, &actual) => Ok(true),
                    Some(_) => {
                        tracing::warn!("Access token belongs to a different identity");
                        Ok(false)
                    }
                    None => {
                        tracing::warn!("User-info response carries no email claim");
                        Ok(false)
                    }
                }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            status => {
                tracing::error!("Identity provider answered {}", status);
                Err(response.error_for_status().err().map_or_else(
                    || AppError::Internal(format!("identity provider answered {status}")),
                    Into::into,
                ))
            }
        }
    }
}

/// Accepts a fixed set of tokens, each issued to one email. For tests and
/// local development.
#[derive(Clone, Default)]
pub struct StaticVerifier {
    accepted: HashMap<String, String>,
}

impl StaticVerifier {
    pub fn new<I, T, E>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, E)>,
        T: Into<String>,
        E: Into<String>,
    {
        Self {
            accepted: tokens
                .into_iter()
                .map(|(token, email)| (token.into(), email.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl AccessTokenVerifier for StaticVerifier {
    async fn verify(&self, access_token: &str, email: &str) -> Result<bool> {
        Ok(self
            .accepted
            .get(access_token)
            .is_some_and(|owner| same_email(email, owner)))
    }
}
