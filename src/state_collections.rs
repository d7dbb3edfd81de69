// State-collection protocol: generation and decryption of the ESC/ECC
// documents that track per-value insertion counts and deletion ranges, and
// the emulated binary search that locates the highest inserted position
// without trusting the collection's reported size.

use tracing::trace;

use crate::contracts::StateCollectionReader;
use crate::crypto::{fle2_decrypt, fle2_encrypt, prf_u64_pair, PrfBlock};
use crate::errors::{Error, Result};
use crate::tokens::{
    EccTwiceDerivedTagToken, EccTwiceDerivedValueToken, EscTwiceDerivedTagToken,
    EscTwiceDerivedValueToken,
};
use crate::values::{Document, Value};

/// Field name of the document id in state collections.
pub const ID_FIELD: &str = "_id";

/// Field name of the encrypted payload in state collections.
pub const VALUE_FIELD: &str = "value";

// Id-space prefixes: null documents and positional documents live in
// disjoint HMAC input spaces so a tombstone can never collide with
// position 0.
const NULL_ID_PREFIX: u64 = 0;
const POSITION_ID_PREFIX: u64 = 1;

// Marker stored in the first word of an ESC insert document value.
const COMPACTION_PLACEHOLDER_MARKER: u64 = u64::MAX;

fn build_state_document(id: PrfBlock, ciphertext: Vec<u8>) -> Document {
    let mut doc = Document::new();
    doc.push(ID_FIELD, Value::binary(id.to_vec()));
    doc.push(VALUE_FIELD, Value::binary(ciphertext));
    doc
}

fn pack_pair(first: u64, second: u64) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&first.to_le_bytes());
    out[8..].copy_from_slice(&second.to_le_bytes());
    out
}

fn unpack_document_value(key: &PrfBlock, doc: &Document) -> Result<(u64, u64)> {
    let value = doc
        .get(VALUE_FIELD)
        .ok_or_else(|| Error::bad_value("state document has no value field"))?;
    let Value::Binary { bytes, .. } = value else {
        return Err(Error::bad_value("state document value is not binary"));
    };
    let plain = fle2_decrypt(key, bytes)?;
    if plain.len() != 16 {
        return Err(Error::IntegrityCheck(format!(
            "state document value decrypts to {} bytes, expected 16",
            plain.len()
        )));
    }
    Ok((
        u64::from_le_bytes(plain[..8].try_into().unwrap()),
        u64::from_le_bytes(plain[8..].try_into().unwrap()),
    ))
}

/// ESC: tracks the insertion count per (value, contention bucket).
pub mod esc {
    use super::*;

    /// A decrypted ESC null document: the per-value tombstone state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EscNullDocument {
        pub position: u64,
        pub count: u64,
    }

    /// A decrypted ESC positional document.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EscDocument {
        pub compaction_placeholder: bool,
        pub position: u64,
        pub count: u64,
    }

    /// Document id for a position, or the null-document id when `None`.
    pub fn generate_id(tag_token: &EscTwiceDerivedTagToken, position: Option<u64>) -> PrfBlock {
        match position {
            Some(pos) => prf_u64_pair(tag_token.as_bytes(), POSITION_ID_PREFIX, pos),
            None => prf_u64_pair(tag_token.as_bytes(), NULL_ID_PREFIX, 0),
        }
    }

    /// The tombstone marking "no positions recorded" after compaction.
    pub fn generate_null_document(
        tag_token: &EscTwiceDerivedTagToken,
        value_token: &EscTwiceDerivedValueToken,
        position: u64,
        count: u64,
    ) -> Document {
        let ciphertext = fle2_encrypt(value_token.as_bytes(), &pack_pair(position, count));
        build_state_document(generate_id(tag_token, None), ciphertext)
    }

    /// A real insertion at a zero-based position.
    pub fn generate_insert_document(
        tag_token: &EscTwiceDerivedTagToken,
        value_token: &EscTwiceDerivedValueToken,
        position: u64,
        count: u64,
    ) -> Document {
        let ciphertext = fle2_encrypt(value_token.as_bytes(), &pack_pair(0, count));
        build_state_document(generate_id(tag_token, Some(position)), ciphertext)
    }

    /// Reserves the top slot during compaction without revealing the real
    /// position count.
    pub fn generate_compaction_placeholder_document(
        tag_token: &EscTwiceDerivedTagToken,
        value_token: &EscTwiceDerivedValueToken,
        position: u64,
        count: u64,
    ) -> Document {
        let ciphertext = fle2_encrypt(
            value_token.as_bytes(),
            &pack_pair(COMPACTION_PLACEHOLDER_MARKER, count),
        );
        build_state_document(generate_id(tag_token, Some(position)), ciphertext)
    }

    pub fn decrypt_null_document(
        value_token: &EscTwiceDerivedValueToken,
        doc: &Document,
    ) -> Result<EscNullDocument> {
        let (position, count) = unpack_document_value(value_token.as_bytes(), doc)?;
        Ok(EscNullDocument { position, count })
    }

    pub fn decrypt_document(
        value_token: &EscTwiceDerivedValueToken,
        doc: &Document,
    ) -> Result<EscDocument> {
        let (marker, count) = unpack_document_value(value_token.as_bytes(), doc)?;
        Ok(EscDocument {
            compaction_placeholder: marker == COMPACTION_PLACEHOLDER_MARKER,
            position: marker,
            count,
        })
    }

    /// Find the highest inserted position for this value, or `None` when no
    /// position was ever recorded or a null-document tombstone exists.
    pub fn emu_binary(
        reader: &dyn StateCollectionReader,
        tag_token: &EscTwiceDerivedTagToken,
        value_token: &EscTwiceDerivedValueToken,
    ) -> Result<Option<u64>> {
        super::emu_binary_impl(
            reader,
            generate_id(tag_token, None),
            |pos| generate_id(tag_token, Some(pos)),
            |doc| decrypt_null_document(value_token, doc).map(|_| ()),
        )
    }
}

/// ECC: tracks intervals of deleted counters per value.
pub mod ecc {
    use super::*;

    /// Discriminates real interval documents from compaction sentinels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum EccValueType {
        Normal,
        CompactionPlaceholder,
    }

    /// A decrypted ECC null document.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EccNullDocument {
        pub position: u64,
    }

    /// A decrypted ECC document: a `[start, end]` interval of deleted
    /// counters, or a compaction placeholder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EccDocument {
        pub value_type: EccValueType,
        pub start: u64,
        pub end: u64,
    }

    pub fn generate_id(tag_token: &EccTwiceDerivedTagToken, position: Option<u64>) -> PrfBlock {
        match position {
            Some(pos) => prf_u64_pair(tag_token.as_bytes(), POSITION_ID_PREFIX, pos),
            None => prf_u64_pair(tag_token.as_bytes(), NULL_ID_PREFIX, 0),
        }
    }

    pub fn generate_null_document(
        tag_token: &EccTwiceDerivedTagToken,
        value_token: &EccTwiceDerivedValueToken,
        position: u64,
    ) -> Document {
        let ciphertext = fle2_encrypt(value_token.as_bytes(), &pack_pair(position, 0));
        build_state_document(generate_id(tag_token, None), ciphertext)
    }

    /// Record the deletion of counters `start..=end`.
    pub fn generate_document(
        tag_token: &EccTwiceDerivedTagToken,
        value_token: &EccTwiceDerivedValueToken,
        position: u64,
        start: u64,
        end: u64,
    ) -> Document {
        let ciphertext = fle2_encrypt(value_token.as_bytes(), &pack_pair(start, end));
        build_state_document(generate_id(tag_token, Some(position)), ciphertext)
    }

    pub fn generate_compaction_document(
        tag_token: &EccTwiceDerivedTagToken,
        value_token: &EccTwiceDerivedValueToken,
        position: u64,
    ) -> Document {
        let ciphertext = fle2_encrypt(
            value_token.as_bytes(),
            &pack_pair(COMPACTION_PLACEHOLDER_MARKER, 0),
        );
        build_state_document(generate_id(tag_token, Some(position)), ciphertext)
    }

    pub fn decrypt_null_document(
        value_token: &EccTwiceDerivedValueToken,
        doc: &Document,
    ) -> Result<EccNullDocument> {
        let (position, _) = unpack_document_value(value_token.as_bytes(), doc)?;
        Ok(EccNullDocument { position })
    }

    pub fn decrypt_document(
        value_token: &EccTwiceDerivedValueToken,
        doc: &Document,
    ) -> Result<EccDocument> {
        let (start, end) = unpack_document_value(value_token.as_bytes(), doc)?;
        let value_type = if start == COMPACTION_PLACEHOLDER_MARKER {
            EccValueType::CompactionPlaceholder
        } else {
            EccValueType::Normal
        };
        Ok(EccDocument {
            value_type,
            start,
            end,
        })
    }

    /// ECC variant of the emulated binary search.
    pub fn emu_binary(
        reader: &dyn StateCollectionReader,
        tag_token: &EccTwiceDerivedTagToken,
        value_token: &EccTwiceDerivedValueToken,
    ) -> Result<Option<u64>> {
        super::emu_binary_impl(
            reader,
            generate_id(tag_token, None),
            |pos| generate_id(tag_token, Some(pos)),
            |doc| decrypt_null_document(value_token, doc).map(|_| ()),
        )
    }
}

/// The emulated binary search over a positional id space.
///
/// Phases: tombstone check, zero check, exponential probe, binary refine.
/// The reader's document count seeds the first exponential step but is never
/// trusted as a bound; correctness only requires that recorded positions form
/// a contiguous prefix `0..=highest`.
fn emu_binary_impl(
    reader: &dyn StateCollectionReader,
    null_id: PrfBlock,
    position_id: impl Fn(u64) -> PrfBlock,
    decrypt_null: impl Fn(&Document) -> Result<()>,
) -> Result<Option<u64>> {
    // Phase 1: a null document is an explicit tombstone and wins outright.
    if let Some(doc) = reader.get_by_id(&null_id) {
        decrypt_null(&doc)?;
        trace!("emu_binary: null document present, no live positions");
        return Ok(None);
    }

    // Phase 2: no position 0 means nothing was ever inserted.
    if reader.get_by_id(&position_id(0)).is_none() {
        trace!("emu_binary: empty id space");
        return Ok(None);
    }

    // Phase 3: exponential probe for an absent position. Keep at least 2 so
    // a zero or tiny reported count still makes progress.
    let mut probes = 2u64;
    let mut hi = reader.document_count().max(2);
    while reader.get_by_id(&position_id(hi)).is_some() {
        probes += 1;
        match hi.checked_mul(2) {
            Some(next) => hi = next,
            // The id space is dense beyond any realistic count; the probe
            // itself is the answer.
            None => return Ok(Some(hi)),
        }
    }

    // Phase 4: binary refine. Invariant: `lo` present, `hi` absent.
    let mut lo = 0u64;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        probes += 1;
        if reader.get_by_id(&position_id(mid)).is_some() {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    trace!(probes, highest = lo, "emu_binary: converged");
    Ok(Some(lo))
}
