// Validated types for the encryption core.
// These wrappers cannot be constructed with invalid data, so key lengths,
// sparsity bounds and field paths are enforced once, at the boundary.

use std::fmt;

use crate::check;
use crate::errors::{Error, Result};

/// Length of the secret key material backing index and user keys.
pub const KEY_MATERIAL_LEN: usize = 96;

/// 96-byte secret key material supplied by the key vault.
///
/// # Invariants
/// - Exactly 96 bytes; shorter or longer material is unrepresentable.
/// - Never printed: `Debug` redacts the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    inner: Box<[u8; KEY_MATERIAL_LEN]>,
}

impl KeyMaterial {
    pub fn new(bytes: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = bytes.as_ref();
        let inner: [u8; KEY_MATERIAL_LEN] = bytes.try_into().map_err(|_| {
            Error::bad_value(format!(
                "key material must be {} bytes, got {}",
                KEY_MATERIAL_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self {
            inner: Box::new(inner),
        })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_MATERIAL_LEN] {
        &self.inner
    }

    /// The HMAC key slice used for token derivation (last 32 bytes).
    pub fn hmac_key(&self) -> &[u8] {
        &self.inner[64..]
    }

    /// The AES key slice for AEAD encryption (first 32 bytes).
    pub fn aead_encryption_key(&self) -> &[u8] {
        &self.inner[..32]
    }

    /// The MAC key slice for AEAD authentication (middle 32 bytes).
    pub fn aead_mac_key(&self) -> &[u8] {
        &self.inner[32..64]
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial(<redacted>)")
    }
}

/// An index key: drives token derivation and the server-side value envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey(pub KeyMaterial);

/// A user key: encrypts the original field value client-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserKey(pub KeyMaterial);

/// Range-index sparsity: the trie-level granularity of edge emission.
///
/// # Invariants
/// - At least 1 (code 6775101).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sparsity {
    inner: u32,
}

impl Sparsity {
    pub fn new(sparsity: i64) -> Result<Self> {
        check!(sparsity > 0, 6775101, "sparsity must be 1 or larger");
        Ok(Self {
            inner: sparsity as u32,
        })
    }

    pub fn get(&self) -> u32 {
        self.inner
    }
}

/// Contention fan-out: the number of extra tag buckets for a hot value.
/// Zero means a single bucket (no contention splitting).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentionFactor(pub u64);

/// A dotted path to a field inside a document, e.g. `nested.encrypted`.
///
/// # Invariants
/// - Non-empty, and no empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    inner: String,
}

impl FieldPath {
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.is_empty() || path.split('.').any(|seg| seg.is_empty()) {
            return Err(Error::bad_value(format!("invalid field path: {path:?}")));
        }
        Ok(Self { inner: path })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.inner.split('.')
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl serde::Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.inner)
    }
}

impl<'de> serde::Deserialize<'de> for FieldPath {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FieldPath::new(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_material_rejects_wrong_length() {
        assert!(KeyMaterial::new([0u8; 95]).is_err());
        assert!(KeyMaterial::new([0u8; 97]).is_err());
        assert!(KeyMaterial::new([0u8; 96]).is_ok());
    }

    #[test]
    fn key_material_slices() {
        let mut raw = [0u8; 96];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = i as u8;
        }
        let key = KeyMaterial::new(raw).unwrap();
        assert_eq!(key.aead_encryption_key(), &raw[..32]);
        assert_eq!(key.aead_mac_key(), &raw[32..64]);
        assert_eq!(key.hmac_key(), &raw[64..]);
    }

    #[test]
    fn key_material_debug_is_redacted() {
        let key = KeyMaterial::new([7u8; 96]).unwrap();
        assert!(!format!("{key:?}").contains('7'));
    }

    #[test]
    fn sparsity_bounds() {
        assert_eq!(Sparsity::new(0).unwrap_err().code(), 6775101);
        assert_eq!(Sparsity::new(-1).unwrap_err().code(), 6775101);
        assert_eq!(Sparsity::new(2).unwrap().get(), 2);
    }

    #[test]
    fn field_path_segments() {
        let path = FieldPath::new("nested.encrypted").unwrap();
        assert_eq!(path.segments().collect::<Vec<_>>(), ["nested", "encrypted"]);
        assert!(FieldPath::new("").is_err());
        assert!(FieldPath::new("a..b").is_err());
    }
}
