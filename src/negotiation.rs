//! Request body negotiation and caller context extraction.
//!
//! Handlers never look at raw bodies: [`RequestData`] folds JSON, URL-encoded
//! forms and opaque payloads into one field map, and pulls the `_method`
//! override out of either the body or the query string.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, FromRef, FromRequest, FromRequestParts, Request},
    http::{Extensions, HeaderMap, Method, header, request::Parts},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sonic_rs::JsonValueTrait;
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::config::TrustedProxies;
use crate::error::{AppError, Result};
use crate::hal::HAL_FORMS_JSON;
use crate::services::ClientContext;

/// Largest body the negotiator will buffer.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Field that carries the HTTP method override.
pub const METHOD_FIELD: &str = "_method";

/// Field under which non-JSON, non-form bodies are passed through.
pub const RAW_FIELD: &str = "_raw";

/// Cookie carrying the session token for browser clients.
pub const SESSION_COOKIE: &str = "session_token";

/// A negotiated request body plus query parameters.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    /// `_method` override, upper-cased.
    pub method_override: Option<Method>,
    pub fields: BTreeMap<String, sonic_rs::Value>,
    pub query: BTreeMap<String, String>,
}

/// Intermediate form value before it becomes JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum FormValue {
    Text(String),
    List(Vec<String>),
}

impl FormValue {
    fn push(self, value: String) -> Self {
        match self {
            FormValue::Text(first) => FormValue::List(vec![first, value]),
            FormValue::List(mut values) => {
                values.push(value);
                FormValue::List(values)
            }
        }
    }
}

/// A field that may hold one value or several.
#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl RequestData {
    /// The method the handler should act on.
    pub fn effective_method(&self, actual: &Method) -> Method {
        self.method_override.clone().unwrap_or_else(|| actual.clone())
    }

    pub fn is_delete(&self, actual: &Method) -> bool {
        self.effective_method(actual) == Method::DELETE
    }

    /// A text field from the body, falling back to the query string.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .and_then(|v| {
                v.as_str()
                    .map(str::to_string)
                    .or_else(|| v.as_u64().map(|n| n.to_string()))
            })
            .or_else(|| self.query.get(name).cloned())
    }

    /// Parses a list of ids from `name`, accepting a single id, a
    /// comma-separated string of ids, or a list.
    pub fn ids(&self, name: &str) -> Result<Vec<Uuid>> {
        let Some(value) = self.fields.get(name) else {
            return Err(AppError::validation(name, format!("{} is required", name)));
        };

        let raw: OneOrMany = sonic_rs::from_str(&sonic_rs::to_string(value)?)
            .map_err(|_| AppError::validation(name, format!("{} must be a list of ids", name)))?;
        let raw: Vec<String> = match raw {
            OneOrMany::One(ids) => ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            OneOrMany::Many(ids) => ids,
        };

        let ids = raw
            .iter()
            .map(|id| Uuid::parse_str(id.trim()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| AppError::validation(name, format!("{} contains an invalid id", name)))?;

        if ids.is_empty() {
            return Err(AppError::validation(name, format!("{} must not be empty", name)));
        }
        Ok(ids)
    }

    /// Deserializes the body fields into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        let json = sonic_rs::to_string(&self.fields)?;
        sonic_rs::from_str(&json).map_err(|e| {
            tracing::debug!("Body does not match the expected payload: {}", e);
            malformed()
        })
    }

    fn from_parts(content_type: Option<&str>, body: &[u8], query: Option<&str>) -> Result<Self> {
        let query: BTreeMap<String, String> = query
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let mut fields = match content_type {
            _ if body.is_empty() => BTreeMap::new(),
            Some(mime) if is_json(mime) => parse_json(body)?,
            Some(mime) if is_form(mime) => parse_form(body)?,
            _ => {
                let mut fields = BTreeMap::new();
                fields.insert(
                    RAW_FIELD.to_string(),
                    sonic_rs::to_value(&String::from_utf8_lossy(body))?,
                );
                fields
            }
        };

        let raw_method = fields
            .remove(METHOD_FIELD)
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| query.get(METHOD_FIELD).cloned());

        let method_override = match raw_method {
            Some(raw) => Some(
                Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| AppError::validation(METHOD_FIELD, "Unknown method override"))?,
            ),
            None => None,
        };

        let mut query = query;
        query.remove(METHOD_FIELD);

        Ok(Self {
            method_override,
            fields,
            query,
        })
    }
}

fn mime_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(content_type: &str) -> bool {
    let mime = mime_of(content_type);
    mime == "application/json" || mime == HAL_FORMS_JSON || mime.ends_with("+json")
}

fn is_form(content_type: &str) -> bool {
    mime_of(content_type) == "application/x-www-form-urlencoded"
}

fn malformed() -> AppError {
    AppError::Validation {
        message: "Malformed request body".to_string(),
        violations: Vec::new(),
    }
}

fn parse_json(body: &[u8]) -> Result<BTreeMap<String, sonic_rs::Value>> {
    sonic_rs::from_slice(body).map_err(|e| {
        tracing::debug!("Body is not a JSON object: {}", e);
        malformed()
    })
}

/// `a[]=1&a[]=2` and repeated keys become lists. Other values stay text.
fn parse_form(body: &[u8]) -> Result<BTreeMap<String, sonic_rs::Value>> {
    let mut values: BTreeMap<String, FormValue> = BTreeMap::new();

    for (key, value) in url::form_urlencoded::parse(body) {
        let value = value.into_owned();

        if let Some(name) = key.strip_suffix("[]") {
            let entry = match values.remove(name) {
                Some(existing) => existing.push(value),
                None => FormValue::List(vec![value]),
            };
            values.insert(name.to_string(), entry);
            continue;
        }

        let key = key.into_owned();
        let entry = match values.remove(&key) {
            Some(existing) => existing.push(value),
            None => FormValue::Text(value),
        };
        values.insert(key, entry);
    }

    values
        .into_iter()
        .map(|(k, v)| -> Result<(String, sonic_rs::Value)> { Ok((k, sonic_rs::to_value(&v)?)) })
        .collect()
}

impl<S> FromRequest<S> for RequestData
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, _state: &S) -> Result<Self> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let query = req.uri().query().map(str::to_string);

        let body = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| AppError::http(
                axum::http::StatusCode::PAYLOAD_TOO_LARGE,
                "Payload Too Large",
                format!("Request body could not be read: {}", e),
            ))?;

        Self::from_parts(content_type.as_deref(), &body, query.as_deref())
    }
}

/// Who is calling: network context plus any presented session token.
#[derive(Debug, Clone)]
pub struct Caller {
    pub context: ClientContext,
    pub token: Option<String>,
}

impl Caller {
    pub fn from_parts(parts: &Parts, cookies: Option<&Cookies>, trusted: &TrustedProxies) -> Self {
        let token = bearer_token(&parts.headers).or_else(|| {
            cookies
                .and_then(|c| c.get(SESSION_COOKIE))
                .map(|c| c.value().to_string())
                .filter(|t| !t.is_empty())
        });

        Self {
            context: ClientContext {
                ip_address: client_ip(&parts.headers, &parts.extensions, trusted)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                user_agent: parts
                    .headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string(),
            },
            token,
        }
    }

    pub fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or(AppError::InvalidSession)
    }
}

impl<S> FromRequestParts<S> for Caller
where
    TrustedProxies: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let cookies = Cookies::from_request_parts(parts, state).await.ok();
        Ok(Caller::from_parts(parts, cookies.as_ref(), &TrustedProxies::from_ref(state)))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// The address a request came from.
///
/// The peer address, unless the peer is a trusted proxy: then the nearest
/// `X-Forwarded-For` hop that is not itself a trusted proxy. `None` when the
/// server was not started with connection info.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trusted: &TrustedProxies) -> Option<IpAddr> {
    let peer = extensions.get::<ConnectInfo<SocketAddr>>()?.0.ip();
    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let mut client = peer;
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    for hop in forwarded.rsplit(',') {
        match hop.trim().parse::<IpAddr>() {
            Ok(ip) => {
                client = ip;
                if !trusted.contains(&ip) {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    Some(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};

    fn form(body: &str) -> RequestData {
        RequestData::from_parts(Some("application/x-www-form-urlencoded"), body.as_bytes(), None).unwrap()
    }

    fn as_json(data: &RequestData) -> serde_json::Value {
        serde_json::from_str(&sonic_rs::to_string(&data.fields).unwrap()).unwrap()
    }

    #[test]
    fn test_bracket_arrays_and_repeated_keys() {
        let data = form("a%5B%5D=1&a%5B%5D=2&b=x&b=y&c=plain");
        let json = as_json(&data);

        assert_eq!(json["a"], serde_json::json!(["1", "2"]));
        assert_eq!(json["b"], serde_json::json!(["x", "y"]));
        assert_eq!(json["c"], "plain");
    }

    #[test]
    fn test_form_text_keeps_commas() {
        #[derive(Deserialize)]
        struct Create {
            label: String,
        }
        let data = form("label=Deploy%2C+staging");
        assert_eq!(as_json(&data)["label"], "Deploy, staging");
        assert_eq!(data.payload::<Create>().unwrap().label, "Deploy, staging");
    }

    #[test]
    fn test_method_override_is_stripped() {
        let data = form("_method=delete&sessionIds=0190b5a0-0000-7000-8000-000000000001");
        assert_eq!(data.method_override, Some(Method::DELETE));
        assert!(data.is_delete(&Method::POST));
        assert!(!data.fields.contains_key(METHOD_FIELD));

        let data = RequestData::from_parts(None, b"", Some("_method=PATCH&cursor=abc")).unwrap();
        assert_eq!(data.method_override, Some(Method::PATCH));
        assert_eq!(data.text("cursor").as_deref(), Some("abc"));
        assert!(!data.query.contains_key(METHOD_FIELD));
    }

    #[test]
    fn test_json_body_and_ids() {
        let body = r#"{"sessionIds":["0190b5a0-0000-7000-8000-000000000001","0190b5a0-0000-7000-8000-000000000002"],"_method":"DELETE"}"#;
        let data = RequestData::from_parts(Some("application/hal+json"), body.as_bytes(), None).unwrap();

        assert_eq!(data.ids("sessionIds").unwrap().len(), 2);
        assert!(data.is_delete(&Method::POST));
        assert!(matches!(data.ids("apiKeyIds"), Err(AppError::Validation { .. })));
    }

    #[test]
    fn test_single_form_id_is_a_list() {
        let data = form("apiKeyIds=0190b5a0-0000-7000-8000-000000000009");
        assert_eq!(data.ids("apiKeyIds").unwrap().len(), 1);

        let data = form("apiKeyIds=0190b5a0-0000-7000-8000-000000000009,+0190b5a0-0000-7000-8000-00000000000a");
        assert_eq!(data.ids("apiKeyIds").unwrap().len(), 2);

        let data = form("apiKeyIds=not-a-uuid");
        assert!(data.ids("apiKeyIds").is_err());

        let data = form("apiKeyIds=,");
        assert!(data.ids("apiKeyIds").is_err());
    }

    #[test]
    fn test_hal_forms_body_is_json() {
        let content_type = format!("{}; charset=utf-8", HAL_FORMS_JSON);
        let data = RequestData::from_parts(Some(&content_type), br#"{"label":"ci"}"#, None).unwrap();
        assert_eq!(data.text("label").as_deref(), Some("ci"));
    }

    #[test]
    fn test_unknown_content_type_is_raw() {
        let data = RequestData::from_parts(Some("text/plain"), b"hello", None).unwrap();
        assert_eq!(as_json(&data)[RAW_FIELD], "hello");
    }

    #[test]
    fn test_malformed_json_is_validation_error() {
        let result = RequestData::from_parts(Some("application/json"), b"[1,2", None);
        match result {
            Err(AppError::Validation { message, .. }) => assert_eq!(message, "Malformed request body"),
            other => panic!("expected a validation error, got {:?}", other.map(|d| d.fields)),
        }

        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Create {
            label: String,
        }
        let data = form("label%5B%5D=a&label%5B%5D=b");
        match data.payload::<Create>() {
            Err(AppError::Validation { message, .. }) => assert_eq!(message, "Malformed request body"),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_typed_payload() {
        #[derive(Deserialize)]
        struct Create {
            label: String,
        }
        let data = form("label=deploy+bot");
        assert_eq!(data.payload::<Create>().unwrap().label, "deploy bot");
    }

    fn from_peer(peer: [u8; 4], forwarded: Option<&str>) -> Parts {
        let mut builder = Request::builder()
            .extension(ConnectInfo(SocketAddr::from((peer, 40000))))
            .header(header::USER_AGENT, "agent/1.0")
            .header(header::AUTHORIZATION, "Bearer tok123");
        if let Some(forwarded) = forwarded {
            builder = builder.header("x-forwarded-for", forwarded);
        }
        builder.body(Body::empty()).unwrap().into_parts().0
    }

    fn proxies() -> TrustedProxies {
        TrustedProxies::new(["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()])
    }

    #[test]
    fn test_caller_uses_peer_and_bearer() {
        let parts = from_peer([198, 51, 100, 7], None);

        let caller = Caller::from_parts(&parts, None, &proxies());
        assert_eq!(caller.context.ip_address, "198.51.100.7");
        assert_eq!(caller.context.user_agent, "agent/1.0");
        assert_eq!(caller.require_token().unwrap(), "tok123");
    }

    #[test]
    fn test_forwarded_for_ignored_from_untrusted_peer() {
        let parts = from_peer([203, 0, 113, 99], Some("198.51.100.7"));
        let caller = Caller::from_parts(&parts, None, &proxies());
        assert_eq!(caller.context.ip_address, "203.0.113.99");

        let caller = Caller::from_parts(&parts, None, &TrustedProxies::default());
        assert_eq!(caller.context.ip_address, "203.0.113.99");
    }

    #[test]
    fn test_forwarded_for_honoured_from_trusted_proxy() {
        // The left-most hop was written by the client and is not believed.
        let parts = from_peer([10, 0, 0, 1], Some("192.0.2.66, 198.51.100.7, 10.0.0.2"));
        let caller = Caller::from_parts(&parts, None, &proxies());
        assert_eq!(caller.context.ip_address, "198.51.100.7");

        let parts = from_peer([10, 0, 0, 1], Some("garbage"));
        let caller = Caller::from_parts(&parts, None, &proxies());
        assert_eq!(caller.context.ip_address, "10.0.0.1");
    }

    #[test]
    fn test_caller_without_token() {
        let (parts, _) = Request::builder().body(Body::empty()).unwrap().into_parts();
        let caller = Caller::from_parts(&parts, None, &TrustedProxies::default());

        assert_eq!(caller.context.ip_address, "unknown");
        assert!(matches!(caller.require_token(), Err(AppError::InvalidSession)));
    }
}
