use async_trait::async_trait;
use http::{Method, StatusCode, header};

use super::ClientError;
use crate::hal::{HAL_FORMS_JSON, HAL_JSON};

/// One outgoing request, already resolved against the server's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    pub method: Method,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Option<String>,
    pub bearer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    pub status: StatusCode,
    pub body: String,
}

/// Carries client requests to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ClientRequest) -> Result<ClientResponse, ClientError>;
}

/// [`Transport`] over a shared `reqwest` client.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ClientRequest) -> Result<ClientResponse, ClientError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .header(header::ACCEPT, format!("{}, {}", HAL_JSON, HAL_FORMS_JSON));

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        Ok(ClientResponse { status, body })
    }
}
