// Compaction support: parsing and validating per-field compaction tokens,
// and merging the deleted-counter intervals recorded in ECC documents.

use crate::check;
use crate::errors::Result;
use crate::schema::EncryptedFieldConfig;
use crate::state_collections::ecc::{EccDocument, EccValueType};
use crate::tokens::EcocToken;
use crate::values::{Document, Value};

/// One field's compaction token, as supplied in a compact command.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionToken {
    pub field_path_name: String,
    pub token: EcocToken,
}

/// Extract `{field_path: ECOC token}` pairs from a command document.
/// Every value must be binary (code 6346801).
pub fn parse_compaction_tokens(doc: &Document) -> Result<Vec<CompactionToken>> {
    let mut out = Vec::with_capacity(doc.len());
    for (path, value) in doc.iter() {
        let Value::Binary { bytes, .. } = value else {
            return Err(crate::errors::Error::policy(
                6346801,
                format!("compaction token for field {path:?} must be binary"),
            ));
        };
        let block: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            crate::errors::Error::policy(
                6346801,
                format!("compaction token for field {path:?} must be 32 bytes"),
            )
        })?;
        out.push(CompactionToken {
            field_path_name: path.to_string(),
            token: EcocToken::from_bytes(block),
        });
    }
    Ok(out)
}

/// Every field declared in the config must have a token present; extra
/// fields are tolerated (code 6346806).
pub fn validate_compaction_tokens(efc: &EncryptedFieldConfig, doc: &Document) -> Result<()> {
    for field in &efc.fields {
        check!(
            doc.contains(field.path.as_str()),
            6346806,
            "compaction tokens missing field {}",
            field.path
        );
    }
    Ok(())
}

/// Merge deleted-counter intervals into a minimal covering set.
///
/// Documents are sorted by interval start; adjacent or overlapping intervals
/// (`next.start <= current.end + 1`) collapse into one.
pub fn merge_ecc_documents(mut docs: Vec<EccDocument>) -> Vec<EccDocument> {
    docs.sort_by_key(|doc| doc.start);
    let mut out: Vec<EccDocument> = Vec::with_capacity(docs.len());
    for doc in docs {
        match out.last_mut() {
            Some(last) if doc.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(doc.end);
            }
            _ => out.push(doc),
        }
    }
    out
}

/// Total number of deleted counters across a set of interval documents.
pub fn count_deleted(docs: &[EccDocument]) -> u64 {
    docs.iter().map(|doc| doc.end - doc.start + 1).sum()
}
