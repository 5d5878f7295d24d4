//! Content-addressed payload naming.

use sha2::{Digest, Sha256};

/// Local reference for a payload of `canonical_key` written at `generation`.
///
/// The digest prefix keeps names unique per key without scanning the payload
/// directory; the generation suffix gives a refetched entry a fresh name so a
/// reader of the expired payload never sees it overwritten in place.
pub fn payload_ref(canonical_key: &str, generation: i64) -> String {
    format!("{}-{generation}", key_digest(canonical_key))
}

/// SHA-256 hex digest of a canonical key.
pub fn key_digest(canonical_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `name` looks like a reference produced by [`payload_ref`].
pub fn is_payload_ref(name: &str) -> bool {
    match name.split_once('-') {
        Some((digest, generation)) => {
            digest.len() == 64
                && digest.chars().all(|c| c.is_ascii_hexdigit())
                && !generation.is_empty()
                && generation.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = key_digest("https://example.com/?a=1");
        let hash2 = key_digest("https://example.com/?a=1");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_hash_different_keys() {
        let hash1 = key_digest("https://example.com/?a=1");
        let hash2 = key_digest("https://example.com/?a=2");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_generations_differ() {
        let first = payload_ref("https://example.com/", 1);
        let second = payload_ref("https://example.com/", 2);
        assert_ne!(first, second);
        assert!(first.starts_with(&key_digest("https://example.com/")));
    }

    #[test]
    fn test_ref_format() {
        assert!(is_payload_ref(&payload_ref("https://example.com/", 1_700_000_000)));
        assert!(!is_payload_ref("index.sqlite"));
        assert!(!is_payload_ref(&key_digest("https://example.com/")));
    }
}
