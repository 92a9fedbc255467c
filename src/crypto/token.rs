use base64::{Engine as _, engine::general_purpose};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};

use super::signature::session_key_prefix;

/// The opaque token handed to a client after a successful authorization.
///
/// It carries the session id and the session key material the signature is
/// recomputed from; the signature itself is never part of it.
pub struct SessionToken {
    session_id: Uuid,
    session_key: Zeroizing<String>,
}

impl SessionToken {
    pub fn new(session_id: Uuid, session_key: &str) -> Result<Self> {
        Ok(Self {
            session_id,
            session_key: Zeroizing::new(session_key_prefix(session_key)?.to_string()),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn encode(&self) -> String {
        let raw = Zeroizing::new(format!("{}.{}", self.session_id, self.session_key.as_str()));
        general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes())
    }

    /// Parses a presented token. Any malformation is an invalid session.
    pub fn parse(encoded: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            general_purpose::URL_SAFE_NO_PAD
                .decode(encoded.trim())
                .map_err(|_| AppError::InvalidSession)?,
        );
        let raw = std::str::from_utf8(&bytes).map_err(|_| AppError::InvalidSession)?;
        let (id, key) = raw.split_once('.').ok_or(AppError::InvalidSession)?;
        let session_id = Uuid::parse_str(id).map_err(|_| AppError::InvalidSession)?;

        Self::new(session_id, key).map_err(|_| AppError::InvalidSession)
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
