//! A HAL-FORMS client that only ever does what the server advertises.
//!
//! The client fetches the entry point, records its links and templates as
//! the current capabilities, and executes templates by name. A template the
//! server did not advertise is never sent; data that fails the template's
//! own constraints is rejected locally.

pub mod transport;
pub mod validate;

use http::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use zeroize::Zeroizing;

use crate::hal::{HAL_JSON, Link, Links, Template, Templates};

pub use transport::{ClientRequest, ClientResponse, ReqwestTransport, Transport};
pub use validate::{FieldErrors, FieldValue, Fields};

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server does not currently advertise the named template.
    #[error("Action not available: {0}")]
    Unavailable(String),

    /// The submitted data failed the template's constraints.
    #[error("Invalid input: {0}")]
    Invalid(FieldErrors),

    #[error("Unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Malformed response: {0}")]
    Decode(#[from] sonic_rs::Error),
}

/// What the caller may currently do: the entry point's links and templates.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "_links", default)]
    pub links: Links,
    #[serde(rename = "_templates", default)]
    pub templates: Templates,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Authorized {
    session_token: String,
}

pub struct HalClient<T: Transport> {
    transport: T,
    base_url: Url,
    token: Option<Zeroizing<String>>,
    /// The resource the current capabilities were read from.
    location: String,
    capabilities: Capabilities,
}

impl<T: Transport> HalClient<T> {
    pub fn new(transport: T, base_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            transport,
            base_url: Url::parse(base_url)?,
            token: None,
            location: "/".to_string(),
            capabilities: Capabilities::default(),
        })
    }

    /// Uses an existing session token, e.g. one persisted by the caller.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(Zeroizing::new(token.into()));
        self
    }

    pub fn is_signed_in(&self) -> bool {
        self.token.is_some()
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn can(&self, name: &str) -> bool {
        self.capabilities.templates.contains_key(name)
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.capabilities.templates.get(name)
    }

    pub fn link(&self, rel: &str) -> Option<&Link> {
        self.capabilities.links.get(rel)
    }

    /// Fetches the entry point and replaces the current capabilities.
    pub async fn discover(&mut self) -> Result<&Capabilities, ClientError> {
        self.location = "/".to_string();
        self.refresh().await
    }

    /// Moves to the resource linked as `rel` and adopts its capabilities.
    pub async fn follow(&mut self, rel: &str) -> Result<&Capabilities, ClientError> {
        let href = self
            .link(rel)
            .map(|link| link.href.clone())
            .ok_or_else(|| ClientError::Unavailable(rel.to_string()))?;
        self.location = href;
        self.refresh().await
    }

    /// Re-reads the capabilities of the current resource.
    pub async fn refresh(&mut self) -> Result<&Capabilities, ClientError> {
        let request = ClientRequest {
            method: Method::GET,
            url: self.base_url.join(&self.location)?.to_string(),
            content_type: None,
            body: None,
            bearer: self.bearer(),
        };

        let response = self.transport.send(request).await?;
        let response = ensure_success(response)?;
        self.capabilities = sonic_rs::from_str(&response.body)?;

        tracing::debug!(
            "Read {} links and {} templates from {}",
            self.capabilities.links.len(),
            self.capabilities.templates.len(),
            self.location
        );
        Ok(&self.capabilities)
    }

    /// Executes the advertised template `name` with `data`.
    ///
    /// The current resource's capabilities are re-read after every non-GET
    /// submission.
    pub async fn execute_template(&mut self, name: &str, data: &Fields) -> Result<ClientResponse, ClientError> {
        let template = self
            .template(name)
            .cloned()
            .ok_or_else(|| ClientError::Unavailable(name.to_string()))?;

        let response = self.submit(&template, data).await?;
        if template.http_method() != Method::GET {
            self.refresh().await?;
        }
        Ok(response)
    }

    /// Signs in through the `authorize` template and keeps the issued token.
    pub async fn sign_in(&mut self, data: &Fields) -> Result<(), ClientError> {
        let template = self
            .template("authorize")
            .cloned()
            .ok_or_else(|| ClientError::Unavailable("authorize".to_string()))?;

        let response = self.submit(&template, data).await?;
        let authorized: Authorized = sonic_rs::from_str(&response.body)?;
        self.token = Some(Zeroizing::new(authorized.session_token));

        self.discover().await?;
        Ok(())
    }

    /// Ends the session through the `revoke` template. Returns `false` when
    /// the server offered no way to sign out.
    pub async fn sign_out(&mut self) -> Result<bool, ClientError> {
        let Some(template) = self.template("revoke").cloned() else {
            return Ok(false);
        };

        self.submit(&template, &Fields::new()).await?;
        self.token = None;
        self.discover().await?;
        Ok(true)
    }

    /// Checks that the current session is still valid for this client.
    ///
    /// Without an advertised `verify` template nothing is sent. A rejected
    /// session drops the stored token and refreshes capabilities.
    pub async fn verify(&mut self) -> Result<bool, ClientError> {
        let Some(template) = self.template("verify").cloned() else {
            return Ok(false);
        };

        let result = self.submit(&template, &Fields::new()).await;
        match result {
            Ok(_) => Ok(true),
            Err(ClientError::Status { status, .. }) if status == StatusCode::UNAUTHORIZED => {
                tracing::info!("Session no longer valid, signing out locally");
                self.token = None;
                self.discover().await?;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|t| t.as_str().to_string())
    }

    async fn submit(&self, template: &Template, data: &Fields) -> Result<ClientResponse, ClientError> {
        validate::validate(template, data).map_err(ClientError::Invalid)?;

        let data = with_fixed_values(template, data);
        let method = template.http_method();
        let mut url = self.base_url.join(template.target.as_deref().unwrap_or("/"))?;

        let (content_type, body) = if method == Method::GET {
            if !data.is_empty() {
                let mut query = url.query_pairs_mut();
                for (name, value) in &data {
                    for v in value.texts() {
                        query.append_pair(name, &v);
                    }
                }
            }
            (None, None)
        } else {
            let content_type = template.content_type.clone().unwrap_or_else(|| HAL_JSON.to_string());
            let body = if content_type.starts_with(FORM_URLENCODED) {
                encode_form(&data)
            } else {
                sonic_rs::to_string(&data)?
            };
            (Some(content_type), Some(body))
        };

        let request = ClientRequest {
            method,
            url: url.to_string(),
            content_type,
            body,
            bearer: self.bearer(),
        };

        let response = self.transport.send(request).await?;
        ensure_success(response)
    }
}

fn ensure_success(response: ClientResponse) -> Result<ClientResponse, ClientError> {
    if response.status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status {
            status: response.status,
            body: response.body,
        })
    }
}

/// Fills in the values a template fixes itself, such as `_method`.
fn with_fixed_values(template: &Template, data: &Fields) -> Fields {
    let mut merged = data.clone();
    for property in &template.properties {
        if let Some(value) = &property.value {
            if property.read_only || !merged.contains_key(&property.name) {
                merged.insert(property.name.clone(), FieldValue::Text(value.clone()));
            }
        }
    }
    merged
}

fn encode_form(data: &Fields) -> String {
    let mut form = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in data {
        match value {
            FieldValue::List(items) => {
                let key = format!("{}[]", name);
                for item in items {
                    form.append_pair(&key, item);
                }
            }
            other => {
                for v in other.texts() {
                    form.append_pair(name, &v);
                }
            }
        }
    }
    form.finish()
}
