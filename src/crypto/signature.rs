//! Session signature derivation.
//!
//! A signature is the lower-case hex SHA-256 of
//! `{key32}_{ip}_{user_agent}_{salt}`, where `key32` is the first 32
//! characters of the client's raw session key. It is recomputed from every
//! incoming request and compared; a session replayed from another address or
//! client no longer matches.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{AppError, Result};

/// Number of leading characters of the raw session key that enter the signature.
pub const SESSION_KEY_LEN: usize = 32;

/// Returns the first [`SESSION_KEY_LEN`] characters of `raw_key`.
pub fn session_key_prefix(raw_key: &str) -> Result<&str> {
    match raw_key.char_indices().nth(SESSION_KEY_LEN) {
        Some((end, _)) => Ok(&raw_key[..end]),
        None if raw_key.chars().count() == SESSION_KEY_LEN => Ok(raw_key),
        None => Err(AppError::validation(
            "sessionKey",
            format!("Session key must be at least {SESSION_KEY_LEN} characters"),
        )),
    }
}

/// Derives the signature binding `session_key` to a client context.
///
/// `session_key` is truncated to its first [`SESSION_KEY_LEN`] characters.
pub fn derive_signature(session_key: &str, ip_address: &str, user_agent: &str, salt: &str) -> String {
    let truncated: String = session_key.chars().take(SESSION_KEY_LEN).collect();
    let mut material = format!("{truncated}_{ip_address}_{user_agent}_{salt}");

    let digest = Sha256::digest(material.as_bytes());
    material.zeroize();

    hex::encode(digest)
}

/// Constant-time signature comparison.
pub fn signatures_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0123456789abcdef0123456789abcdefTRAILING";
    const IP: &str = "203.0.113.7";
    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64)";
    const SALT: &str = "pepper-for-tests";

    #[test]
    fn test_deterministic() {
        let a = derive_signature(KEY, IP, UA, SALT);
        let b = derive_signature(KEY, IP, UA, SALT);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_matches_reference_construction() {
        let expected = hex::encode(Sha256::digest(
            format!("0123456789abcdef0123456789abcdef_{IP}_{UA}_{SALT}").as_bytes(),
        ));
        assert_eq!(derive_signature(KEY, IP, UA, SALT), expected);
    }

    #[test]
    fn test_only_first_32_characters_count() {
        let other_tail = "0123456789abcdef0123456789abcdefSOMETHING_ELSE";
        assert_eq!(
            derive_signature(KEY, IP, UA, SALT),
            derive_signature(other_tail, IP, UA, SALT)
        );
    }

    #[test]
    fn test_every_input_changes_output() {
        let base = derive_signature(KEY, IP, UA, SALT);

        assert_ne!(base, derive_signature("X123456789abcdef0123456789abcdef", IP, UA, SALT));
        assert_ne!(base, derive_signature(KEY, "203.0.113.8", UA, SALT));
        assert_ne!(base, derive_signature(KEY, IP, "curl/8.0", SALT));
        assert_ne!(base, derive_signature(KEY, IP, UA, "another-salt"));
    }

    #[test]
    fn test_session_key_prefix() {
        assert_eq!(session_key_prefix(KEY).unwrap(), "0123456789abcdef0123456789abcdef");
        assert_eq!(
            session_key_prefix("0123456789abcdef0123456789abcdef").unwrap().len(),
            SESSION_KEY_LEN
        );
        assert!(session_key_prefix("too-short").is_err());

        let multibyte = "é".repeat(40);
        assert_eq!(session_key_prefix(&multibyte).unwrap().chars().count(), SESSION_KEY_LEN);
    }

    #[test]
    fn test_signatures_match() {
        let sig = derive_signature(KEY, IP, UA, SALT);
        assert!(signatures_match(&sig, &sig.clone()));
        assert!(!signatures_match(&sig, &derive_signature(KEY, IP, "other", SALT)));
        assert!(!signatures_match(&sig, ""));
    }
}
