// Contracts for the external collaborators the core depends on.
// The core performs no I/O of its own: key material and state-collection
// lookups come through these traits, passed explicitly into every entry
// point. Implementations decide retry, caching and timeout policy.

use uuid::Uuid;

use crate::crypto::PrfBlock;
use crate::errors::Result;
use crate::types::KeyMaterial;
use crate::values::Document;

/// Source of key material, identified by UUID.
///
/// # Preconditions
/// - Callers pass ids taken from placeholders or encrypted payloads.
///
/// # Postconditions
/// - Returns the 96-byte material for a known id.
/// - Fails with `KeyNotFound` for an unknown id.
/// - The core never persists or logs the returned material.
pub trait KeyVault {
    fn get_key(&self, id: Uuid) -> Result<KeyMaterial>;
}

/// Read access to one state collection (ESC or ECC).
///
/// # Preconditions
/// - `get_by_id` ids are 32-byte HMAC tags produced by the document
///   generators in this crate.
///
/// # Postconditions
/// - `get_by_id` returns the stored document or `None`; it never fabricates.
/// - `document_count` may be stale, estimated, zero or wildly wrong; callers
///   (the emulated binary search) treat it as a hint only.
/// - Both calls are synchronous blocking reads from the core's perspective.
pub trait StateCollectionReader {
    fn get_by_id(&self, id: &PrfBlock) -> Option<Document>;

    fn document_count(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    struct EmptyVault;

    impl KeyVault for EmptyVault {
        fn get_key(&self, id: Uuid) -> Result<KeyMaterial> {
            Err(Error::KeyNotFound(id))
        }
    }

    #[test]
    fn unknown_keys_surface_as_key_not_found() {
        let vault = EmptyVault;
        let err = vault.get_key(Uuid::nil()).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
    }
}
