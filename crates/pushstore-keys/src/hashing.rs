//! Partition key pseudonymization.
//!
//! When a hash key is configured, the physical partition key of every row
//! is `hex(HMAC-SHA256(key, uaid))` instead of the UAID itself, so the store
//! never holds raw subscriber ids. The key is injected at construction; there
//! is no process-wide mutable key.

use std::fmt;

use hmac::{Hmac, Mac};
use pushstore_types::Uaid;
use sha2::Sha256;

use crate::{KeyError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Maps a UAID to its physical partition key.
#[derive(Clone, Default)]
pub struct UaidHasher {
    mac: Option<HmacSha256>,
}

impl UaidHasher {
    /// Identity mapping: the partition key is the UAID.
    pub fn disabled() -> Self {
        Self { mac: None }
    }

    /// HMAC-SHA256 keyed mapping. An empty key disables hashing.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.is_empty() {
            return Ok(Self::disabled());
        }
        let mac = HmacSha256::new_from_slice(key)
            .map_err(|e| KeyError::InvalidHashKey(e.to_string()))?;
        Ok(Self { mac: Some(mac) })
    }

    /// Build from hex key material, as carried in settings.
    pub fn from_hex(key: &str) -> Result<Self> {
        let key = hex::decode(key.trim()).map_err(|e| KeyError::InvalidHashKey(e.to_string()))?;
        Self::new(&key)
    }

    pub fn is_enabled(&self) -> bool {
        self.mac.is_some()
    }

    /// Hash an arbitrary partition value.
    pub fn hash_str(&self, value: &str) -> String {
        match &self.mac {
            Some(mac) => {
                let mut mac = mac.clone();
                mac.update(value.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            None => value.to_string(),
        }
    }

    /// Physical partition key for `uaid` (hash of its undashed form).
    pub fn partition_key(&self, uaid: &Uaid) -> String {
        self.hash_str(&uaid.simple())
    }
}

impl fmt::Debug for UaidHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UaidHasher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_disabled_is_identity() {
        let hasher = UaidHasher::disabled();
        let uaid = Uaid::parse("11111111-1111-1111-1111-111111111111").expect("uaid");
        assert_eq!(
            hasher.partition_key(&uaid),
            "11111111111111111111111111111111"
        );
        assert!(!UaidHasher::new(b"").expect("empty key").is_enabled());
    }

    #[test]
    fn test_hmac_sha256_vector() {
        // Well-known answer for key "key".
        let hasher = UaidHasher::new(b"key").expect("hasher");
        let expected = hex!("f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8");
        assert_eq!(
            hasher.hash_str("The quick brown fox jumps over the lazy dog"),
            hex::encode(expected)
        );
    }

    #[test]
    fn test_hash_is_stable_and_keyed() {
        let uaid = Uaid::new_v4();
        let a = UaidHasher::new(b"secret-a").expect("hasher");
        let b = UaidHasher::new(b"secret-b").expect("hasher");
        assert_eq!(a.partition_key(&uaid), a.clone().partition_key(&uaid));
        assert_ne!(a.partition_key(&uaid), b.partition_key(&uaid));
        assert_eq!(a.partition_key(&uaid).len(), 64);
    }

    #[test]
    fn test_from_hex() {
        let hasher = UaidHasher::from_hex("6b6579").expect("hex key");
        assert_eq!(
            hasher.hash_str("The quick brown fox jumps over the lazy dog"),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
        assert!(matches!(
            UaidHasher::from_hex("not hex"),
            Err(KeyError::InvalidHashKey(_))
        ));
        assert!(!UaidHasher::from_hex("").expect("empty").is_enabled());
    }

    #[test]
    fn test_debug_hides_key() {
        let hasher = UaidHasher::new(b"secret").expect("hasher");
        assert_eq!(format!("{hasher:?}"), "UaidHasher { enabled: true }");
    }
}
