use rand::RngCore;
use rand::rngs::OsRng;

/// Length of every generated API key.
pub const API_KEY_LEN: usize = 43;
/// Bytes of randomness behind each key.
const API_KEY_BYTES: usize = 32;
const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generates a new API key: 32 bytes from the OS RNG as a 43-character
/// base62 string. 62^43 exceeds 2^256, so zero padding keeps the width fixed.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    encode_base62(&bytes)
}

fn encode_base62(bytes: &[u8; API_KEY_BYTES]) -> String {
    let mut number = *bytes;
    let mut digits = Vec::with_capacity(API_KEY_LEN);

    while number.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        for byte in number.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 62) as u8;
            remainder = acc % 62;
        }
        digits.push(ALPHABET[remainder as usize]);
    }

    while digits.len() < API_KEY_LEN {
        digits.push(ALPHABET[0]);
    }

    digits.iter().rev().map(|&d| char::from(d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fixed_width_alphanumeric() {
        for _ in 0..200 {
            let key = generate_api_key();
            assert_eq!(key.len(), API_KEY_LEN);
            assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_no_collisions() {
        let keys: HashSet<String> = (0..1_000).map(|_| generate_api_key()).collect();
        assert_eq!(keys.len(), 1_000);
    }

    #[test]
    fn test_encoding_is_zero_padded() {
        assert_eq!(encode_base62(&[0u8; 32]), "0".repeat(API_KEY_LEN));

        let mut one = [0u8; 32];
        one[31] = 1;
        assert_eq!(encode_base62(&one), format!("{}1", "0".repeat(API_KEY_LEN - 1)));

        let mut sixty_two = [0u8; 32];
        sixty_two[31] = 62;
        assert_eq!(encode_base62(&sixty_two), format!("{}10", "0".repeat(API_KEY_LEN - 2)));
    }

    #[test]
    fn test_max_value_fits() {
        let key = encode_base62(&[0xFF; 32]);
        assert_eq!(key.len(), API_KEY_LEN);
        assert_ne!(key.chars().next(), Some('0'));
    }
}
