// Token derivation hierarchy: five levels of HMAC-SHA256 outputs chained from
// the 96-byte index key. Every level is a distinct newtype so a token can only
// be consumed by the derivation step its level permits; mixing levels is a
// compile error, not a runtime surprise.

use std::fmt;

use subtle::ConstantTimeEq;

use crate::crypto::{prf, prf_u64, PrfBlock};
use crate::types::IndexKey;

// Little-endian u64 derivation labels, pinned by the published test vectors.
const LEVEL1_COLLECTIONS: u64 = 1;
const LEVEL1_SERVER_DATA_ENCRYPTION: u64 = 3;
const LEVEL2_EDC: u64 = 1;
const LEVEL2_ESC: u64 = 2;
const LEVEL2_ECC: u64 = 3;
const LEVEL2_ECOC: u64 = 4;
const TWICE_DERIVED_EDC: u64 = 1;
const TWICE_DERIVED_TAG: u64 = 1;
const TWICE_DERIVED_VALUE: u64 = 2;

macro_rules! token_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Eq, Hash)]
        pub struct $name(pub PrfBlock);

        impl $name {
            pub fn from_bytes(block: PrfBlock) -> Self {
                Self(block)
            }

            pub fn as_bytes(&self) -> &PrfBlock {
                &self.0
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                // Token comparisons are constant-time.
                self.0.ct_eq(&other.0).into()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode_upper(self.0))
            }
        }
    };
}

token_type!(
    /// Level 1: root of the per-collection token tree.
    CollectionsLevel1Token
);
token_type!(
    /// Level 1: key for the server-side indexed-value envelope.
    ServerDataEncryptionLevel1Token
);
token_type!(EdcToken);
token_type!(EscToken);
token_type!(EccToken);
token_type!(EcocToken);

token_type!(EdcDerivedFromDataToken);
token_type!(EscDerivedFromDataToken);
token_type!(EccDerivedFromDataToken);

token_type!(EdcDerivedFromDataAndContentionToken);
token_type!(EscDerivedFromDataAndContentionToken);
token_type!(EccDerivedFromDataAndContentionToken);

token_type!(EdcTwiceDerivedToken);
token_type!(EscTwiceDerivedTagToken);
token_type!(EscTwiceDerivedValueToken);
token_type!(EccTwiceDerivedTagToken);
token_type!(EccTwiceDerivedValueToken);

/// Level 1: HMAC(index_key, 1).
pub fn generate_collections_level1_token(key: &IndexKey) -> CollectionsLevel1Token {
    CollectionsLevel1Token(prf_u64(key.0.hmac_key(), LEVEL1_COLLECTIONS))
}

/// Level 1: HMAC(index_key, 3).
pub fn generate_server_data_encryption_level1_token(
    key: &IndexKey,
) -> ServerDataEncryptionLevel1Token {
    ServerDataEncryptionLevel1Token(prf_u64(key.0.hmac_key(), LEVEL1_SERVER_DATA_ENCRYPTION))
}

/// Level 2: per-collection tokens, one per state-collection namespace.
pub fn generate_edc_token(token: &CollectionsLevel1Token) -> EdcToken {
    EdcToken(prf_u64(&token.0, LEVEL2_EDC))
}

pub fn generate_esc_token(token: &CollectionsLevel1Token) -> EscToken {
    EscToken(prf_u64(&token.0, LEVEL2_ESC))
}

pub fn generate_ecc_token(token: &CollectionsLevel1Token) -> EccToken {
    EccToken(prf_u64(&token.0, LEVEL2_ECC))
}

pub fn generate_ecoc_token(token: &CollectionsLevel1Token) -> EcocToken {
    EcocToken(prf_u64(&token.0, LEVEL2_ECOC))
}

/// Level 3: HMAC(level2, value bytes). The value may be arbitrary length.
pub fn generate_edc_derived_from_data_token(
    token: &EdcToken,
    value: &[u8],
) -> EdcDerivedFromDataToken {
    EdcDerivedFromDataToken(prf(&token.0, value))
}

pub fn generate_esc_derived_from_data_token(
    token: &EscToken,
    value: &[u8],
) -> EscDerivedFromDataToken {
    EscDerivedFromDataToken(prf(&token.0, value))
}

pub fn generate_ecc_derived_from_data_token(
    token: &EccToken,
    value: &[u8],
) -> EccDerivedFromDataToken {
    EccDerivedFromDataToken(prf(&token.0, value))
}

/// Level 4: HMAC(level3, contention counter). The counter selects the
/// contention bucket, not the insertion position.
pub fn generate_edc_derived_from_data_and_contention_token(
    token: &EdcDerivedFromDataToken,
    counter: u64,
) -> EdcDerivedFromDataAndContentionToken {
    EdcDerivedFromDataAndContentionToken(prf_u64(&token.0, counter))
}

pub fn generate_esc_derived_from_data_and_contention_token(
    token: &EscDerivedFromDataToken,
    counter: u64,
) -> EscDerivedFromDataAndContentionToken {
    EscDerivedFromDataAndContentionToken(prf_u64(&token.0, counter))
}

pub fn generate_ecc_derived_from_data_and_contention_token(
    token: &EccDerivedFromDataToken,
    counter: u64,
) -> EccDerivedFromDataAndContentionToken {
    EccDerivedFromDataAndContentionToken(prf_u64(&token.0, counter))
}

/// Level 5: the EDC tag key used for `__safeContent__` tag generation.
pub fn generate_edc_twice_derived_token(
    token: &EdcDerivedFromDataAndContentionToken,
) -> EdcTwiceDerivedToken {
    EdcTwiceDerivedToken(prf_u64(&token.0, TWICE_DERIVED_EDC))
}

/// Level 5: ESC lookup tag and value-masking keys.
pub fn generate_esc_twice_derived_tag_token(
    token: &EscDerivedFromDataAndContentionToken,
) -> EscTwiceDerivedTagToken {
    EscTwiceDerivedTagToken(prf_u64(&token.0, TWICE_DERIVED_TAG))
}

pub fn generate_esc_twice_derived_value_token(
    token: &EscDerivedFromDataAndContentionToken,
) -> EscTwiceDerivedValueToken {
    EscTwiceDerivedValueToken(prf_u64(&token.0, TWICE_DERIVED_VALUE))
}

/// Level 5: ECC lookup tag and value-masking keys.
pub fn generate_ecc_twice_derived_tag_token(
    token: &EccDerivedFromDataAndContentionToken,
) -> EccTwiceDerivedTagToken {
    EccTwiceDerivedTagToken(prf_u64(&token.0, TWICE_DERIVED_TAG))
}

pub fn generate_ecc_twice_derived_value_token(
    token: &EccDerivedFromDataAndContentionToken,
) -> EccTwiceDerivedValueToken {
    EccTwiceDerivedValueToken(prf_u64(&token.0, TWICE_DERIVED_VALUE))
}
