// Error taxonomy for the encryption core.
// Every fallible operation surfaces a typed failure carrying a stable numeric
// code so callers and tests can discriminate failure modes precisely.

use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the encryption core.
///
/// The taxonomy is closed: malformed input, policy violations (which carry a
/// fixed numeric code), cryptographic integrity failures, and key-vault
/// lookups. "Not found" outcomes of searches are modelled as `Option`, not as
/// errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: empty buffers, unrecognized type bytes, unparseable
    /// sub-structures.
    #[error("bad value: {0}")]
    BadValue(String),

    /// A value's type is not usable in the requested position.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The key vault has no material for the requested id.
    #[error("key {0} not found in key vault")]
    KeyNotFound(Uuid),

    /// AEAD tag verification failed. Always fatal to the operation.
    #[error("ciphertext integrity check failed: {0}")]
    IntegrityCheck(String),

    /// A buffer ended before a complete structure could be read.
    #[error("buffer too short: {0}")]
    ShortBuffer(String),

    /// A policy violation with a stable numeric code.
    #[error("{reason} (code {code})")]
    Policy { code: u32, reason: String },
}

impl Error {
    pub fn bad_value(reason: impl Into<String>) -> Self {
        Error::BadValue(reason.into())
    }

    pub fn type_mismatch(reason: impl Into<String>) -> Self {
        Error::TypeMismatch(reason.into())
    }

    pub fn policy(code: u32, reason: impl Into<String>) -> Self {
        Error::Policy {
            code,
            reason: reason.into(),
        }
    }

    /// The stable numeric code for this failure.
    pub fn code(&self) -> u32 {
        match self {
            Error::BadValue(_) => 2,
            Error::TypeMismatch(_) => 14,
            Error::KeyNotFound(_) => 11,
            Error::IntegrityCheck(_) => 7,
            Error::ShortBuffer(_) => 2,
            Error::Policy { code, .. } => *code,
        }
    }
}

/// Assert a policy condition, failing with a fixed numeric code.
///
/// Mirrors the reference system's "assertion with code" style: the code is
/// part of the observable contract and is pinned by tests.
#[macro_export]
macro_rules! check {
    ($cond:expr, $code:expr, $($reason:tt)+) => {
        if !($cond) {
            return Err($crate::errors::Error::policy($code, format!($($reason)+)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_errors_carry_their_code() {
        let err = Error::policy(6371506, "tag array missing");
        assert_eq!(err.code(), 6371506);
        assert!(err.to_string().contains("6371506"));
    }

    #[test]
    fn check_macro_propagates_code() {
        fn guarded(flag: bool) -> Result<()> {
            check!(flag, 6346806, "compaction token missing");
            Ok(())
        }
        assert!(guarded(true).is_ok());
        assert_eq!(guarded(false).unwrap_err().code(), 6346806);
    }
}
