// Server-side handling of indexed encrypted fields: extracting insert/update
// payloads, converting them to stored indexed values once counters are
// assigned, maintaining the tag-array invariant on insert and update, and
// computing tag deltas for updates and deletes.

use indexmap::IndexMap;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::crypto::{prf_u64, PrfBlock};
use crate::errors::{Error, Result};
use crate::payloads::{
    decode_blob, EncryptedBinDataType, Fle2EqualityIndexedValue, Fle2RangeIndexedValue,
    InsertUpdatePayload,
};
use crate::schema::{DeleteToken, EncryptedFieldConfig};
use crate::tokens::{
    generate_edc_derived_from_data_and_contention_token, generate_edc_twice_derived_token,
    EdcDerivedFromDataAndContentionToken, EdcDerivedFromDataToken, EdcTwiceDerivedToken,
};
use crate::values::{is_equality_indexable, is_range_indexable, Document, Value, MAX_DOCUMENT_DEPTH};

/// Reserved field name of the tag array carried by every document that holds
/// at least one indexed encrypted field.
pub const SAFE_CONTENT_FIELD: &str = "__safeContent__";

/// An insert/update payload found in a document, with the counters the
/// caller assigns before finalization (one per tag to generate).
#[derive(Debug, Clone, PartialEq)]
pub struct EdcServerPayloadInfo {
    pub payload: InsertUpdatePayload,
    pub field_path_name: String,
    pub counts: Vec<u64>,
}

/// A serialized indexed value and the dotted path it sits at. The payload
/// bytes are the full blob including the leading type byte.
#[derive(Debug, Clone, PartialEq)]
pub struct EdcIndexedFields {
    pub value: Vec<u8>,
    pub field_path_name: String,
}

// Depth-first walk over every encrypt-subtype binary in a document tree.
// Paths are dotted, with array positions as numeric segments.
pub(crate) fn visit_encrypted_binaries(
    doc: &Document,
    visit: &mut impl FnMut(&str, &[u8]) -> Result<()>,
) -> Result<()> {
    fn walk_value(
        value: &Value,
        path: &str,
        depth: usize,
        visit: &mut impl FnMut(&str, &[u8]) -> Result<()>,
    ) -> Result<()> {
        if depth > MAX_DOCUMENT_DEPTH {
            return Err(Error::bad_value("document nesting exceeds maximum depth"));
        }
        match value {
            Value::Object(doc) => {
                for (name, child) in doc.iter() {
                    walk_value(child, &join_path(path, name), depth + 1, visit)?;
                }
            }
            Value::Array(items) => {
                for (idx, child) in items.iter().enumerate() {
                    walk_value(child, &join_path(path, &idx.to_string()), depth + 1, visit)?;
                }
            }
            Value::Binary { subtype, bytes } if *subtype == crate::values::BINARY_SUBTYPE_ENCRYPT => {
                visit(path, bytes)?;
            }
            _ => {}
        }
        Ok(())
    }

    for (name, value) in doc.iter() {
        walk_value(value, name, 1, visit)?;
    }
    Ok(())
}

// As `visit_encrypted_binaries`, but rebuilds the tree, letting the callback
// replace encrypted binaries. `None` keeps the original bytes.
pub(crate) fn map_encrypted_binaries(
    doc: &Document,
    transform: &mut impl FnMut(&str, &[u8]) -> Result<Option<Value>>,
) -> Result<Document> {
    fn walk_value(
        value: &Value,
        path: &str,
        depth: usize,
        transform: &mut impl FnMut(&str, &[u8]) -> Result<Option<Value>>,
    ) -> Result<Value> {
        if depth > MAX_DOCUMENT_DEPTH {
            return Err(Error::bad_value("document nesting exceeds maximum depth"));
        }
        Ok(match value {
            Value::Object(doc) => {
                let mut out = Document::new();
                for (name, child) in doc.iter() {
                    out.push(
                        name,
                        walk_value(child, &join_path(path, name), depth + 1, transform)?,
                    );
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (idx, child) in items.iter().enumerate() {
                    out.push(walk_value(
                        child,
                        &join_path(path, &idx.to_string()),
                        depth + 1,
                        transform,
                    )?);
                }
                Value::Array(out)
            }
            Value::Binary { subtype, bytes } if *subtype == crate::values::BINARY_SUBTYPE_ENCRYPT => {
                transform(path, bytes)?.unwrap_or_else(|| value.clone())
            }
            other => other.clone(),
        })
    }

    let mut out = Document::new();
    for (name, value) in doc.iter() {
        out.push(name, walk_value(value, name, 1, transform)?);
    }
    Ok(out)
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// Collect every insert/update payload in a document, validating declared
/// types (6373504) and rejecting index-key reuse across fields (6371407).
/// The returned `counts` vectors are empty; the caller assigns counters.
pub fn get_encrypted_field_info(doc: &Document) -> Result<Vec<EdcServerPayloadInfo>> {
    let mut payloads = Vec::new();
    visit_encrypted_binaries(doc, &mut |path, bytes| {
        let (ty, payload) = decode_blob(bytes)?;
        match ty {
            EncryptedBinDataType::InsertUpdatePayload => {
                let parsed = InsertUpdatePayload::parse(payload)?;
                let allowed = if parsed.edge_token_sets.is_some() {
                    is_range_indexable(parsed.bson_type)
                } else {
                    is_equality_indexable(parsed.bson_type)
                };
                if !allowed {
                    return Err(Error::policy(
                        6373504,
                        format!(
                            "type {:?} is not allowed for an indexed encrypted field",
                            parsed.bson_type
                        ),
                    ));
                }
                payloads.push(EdcServerPayloadInfo {
                    payload: parsed,
                    field_path_name: path.to_string(),
                    counts: Vec::new(),
                });
                Ok(())
            }
            EncryptedBinDataType::Placeholder => Err(Error::bad_value(format!(
                "field {path:?} still carries an unprocessed placeholder"
            ))),
            ty if ty.is_legacy() => Err(Error::bad_value(format!(
                "field {path:?} carries a legacy encrypted value"
            ))),
            // Unindexed values, stored indexed values and find payloads
            // contribute no server payload.
            _ => Ok(()),
        }
    })?;

    let mut seen_keys = Vec::with_capacity(payloads.len());
    for info in &payloads {
        if seen_keys.contains(&info.payload.index_key_id) {
            return Err(Error::policy(
                6371407,
                format!(
                    "index key {} is used by more than one field",
                    info.payload.index_key_id
                ),
            ));
        }
        seen_keys.push(info.payload.index_key_id);
    }
    debug!(payloads = payloads.len(), "collected encrypted field info");
    Ok(payloads)
}

/// Collect every stored indexed value (equality or range) with its path.
pub fn get_encrypted_indexed_fields(doc: &Document) -> Result<Vec<EdcIndexedFields>> {
    let mut fields = Vec::new();
    visit_encrypted_binaries(doc, &mut |path, bytes| {
        let (ty, _) = decode_blob(bytes)?;
        if ty.is_indexed_value() {
            fields.push(EdcIndexedFields {
                value: bytes.to_vec(),
                field_path_name: path.to_string(),
            });
        }
        Ok(())
    })?;
    Ok(fields)
}

/// The tag appended to `__safeContent__` for one (value, counter) pair.
pub fn generate_tag(token: &EdcTwiceDerivedToken, count: u64) -> PrfBlock {
    prf_u64(token.as_bytes(), count)
}

fn tag_for(edc: &EdcDerivedFromDataAndContentionToken, count: u64) -> PrfBlock {
    generate_tag(&generate_edc_twice_derived_token(edc), count)
}

/// One Level-4 EDC token per contention bucket `0..=max_contention`: the
/// candidate tags a reader must try when querying a contended value.
pub fn generate_edc_tokens(
    token: &EdcDerivedFromDataToken,
    max_contention: u64,
) -> Vec<EdcDerivedFromDataAndContentionToken> {
    (0..=max_contention)
        .map(|bucket| generate_edc_derived_from_data_and_contention_token(token, bucket))
        .collect()
}

fn tags_for_payload(info: &EdcServerPayloadInfo) -> Result<Vec<PrfBlock>> {
    match &info.payload.edge_token_sets {
        Some(edges) => {
            if info.counts.len() < edges.len() {
                return Err(Error::bad_value(format!(
                    "field {:?} has {} counters for {} edges",
                    info.field_path_name,
                    info.counts.len(),
                    edges.len()
                )));
            }
            Ok(edges
                .iter()
                .zip(&info.counts)
                .map(|(edge, &count)| tag_for(&edge.edc, count))
                .collect())
        }
        None => {
            let count = *info.counts.first().ok_or_else(|| {
                Error::bad_value(format!(
                    "field {:?} has no assigned counter",
                    info.field_path_name
                ))
            })?;
            Ok(vec![tag_for(&info.payload.edc, count)])
        }
    }
}

fn convert_payload_to_indexed_value(info: &EdcServerPayloadInfo) -> Result<Vec<u8>> {
    let token = &info.payload.server_encryption_token;
    if info.payload.edge_token_sets.is_some() {
        let edges = info.payload.edge_token_sets.as_ref().unwrap().len();
        let counters = info.counts.get(..edges).ok_or_else(|| {
            Error::bad_value(format!(
                "field {:?} is missing edge counters",
                info.field_path_name
            ))
        })?;
        Ok(Fle2RangeIndexedValue::from_payload(&info.payload, counters.to_vec())?.to_blob(token))
    } else {
        let count = *info.counts.first().ok_or_else(|| {
            Error::bad_value(format!(
                "field {:?} has no assigned counter",
                info.field_path_name
            ))
        })?;
        Ok(Fle2EqualityIndexedValue::from_payload(&info.payload, count)?.to_blob(token))
    }
}

fn collect_tags(payloads: &[EdcServerPayloadInfo]) -> Result<Vec<PrfBlock>> {
    let mut tags = Vec::new();
    for info in payloads {
        tags.extend(tags_for_payload(info)?);
    }
    Ok(tags)
}

fn rewrite_payloads(
    doc: &Document,
    payloads: &[EdcServerPayloadInfo],
) -> Result<Document> {
    let by_path: IndexMap<&str, &EdcServerPayloadInfo> = payloads
        .iter()
        .map(|info| (info.field_path_name.as_str(), info))
        .collect();
    map_encrypted_binaries(doc, &mut |path, bytes| {
        let (ty, _) = decode_blob(bytes)?;
        if ty != EncryptedBinDataType::InsertUpdatePayload {
            return Ok(None);
        }
        let info = by_path.get(path).ok_or_else(|| {
            Error::bad_value(format!("no counter assignment for field {path:?}"))
        })?;
        Ok(Some(Value::encrypted(convert_payload_to_indexed_value(
            info,
        )?)))
    })
}

/// Convert payloads to stored indexed values and append their tags to the
/// document's tag array. A pre-existing non-array `__safeContent__` fails
/// with 6373510.
pub fn finalize_for_insert(
    doc: &Document,
    payloads: &[EdcServerPayloadInfo],
) -> Result<Document> {
    let tags = collect_tags(payloads)?;
    let mut out = rewrite_payloads(doc, payloads)?;

    let mut array = match out.remove(SAFE_CONTENT_FIELD) {
        None => Vec::new(),
        Some(Value::Array(existing)) => existing,
        Some(_) => {
            return Err(Error::policy(
                6373510,
                format!("{SAFE_CONTENT_FIELD} must be an array"),
            ))
        }
    };
    array.extend(tags.iter().map(|tag| Value::binary(tag.to_vec())));
    out.push(SAFE_CONTENT_FIELD, Value::Array(array));
    Ok(out)
}

/// As insert finalization, but for an update command document: converted
/// payloads stay under their update operators and tags are appended through
/// `$push: {__safeContent__: {$each: [...]}}`. A pre-existing non-object
/// `$push` fails with 6371511.
pub fn finalize_for_update(
    doc: &Document,
    payloads: &[EdcServerPayloadInfo],
) -> Result<Document> {
    let tags = collect_tags(payloads)?;
    let mut out = rewrite_payloads(doc, payloads)?;

    if tags.is_empty() {
        return Ok(out);
    }

    let mut push = match out.remove("$push") {
        None => Document::new(),
        Some(Value::Object(push)) => push,
        Some(_) => {
            return Err(Error::policy(
                6371511,
                "$push must be an object to append encryption tags",
            ))
        }
    };
    if push.contains(SAFE_CONTENT_FIELD) {
        return Err(Error::policy(
            6371511,
            format!("$push already names {SAFE_CONTENT_FIELD}"),
        ));
    }
    let mut each = Document::new();
    each.push(
        "$each",
        Value::Array(tags.iter().map(|tag| Value::binary(tag.to_vec())).collect()),
    );
    push.push(SAFE_CONTENT_FIELD, Value::Object(each));
    out.push("$push", Value::Object(push));
    Ok(out)
}

/// Entries of `original` whose (path, payload bytes) pair no longer appears
/// in `current`: fields removed outright plus fields whose stored value
/// changed. Order follows `original`.
pub fn get_removed_tags(
    original: &[EdcIndexedFields],
    current: &[EdcIndexedFields],
) -> Vec<EdcIndexedFields> {
    original
        .iter()
        .filter(|old| {
            !current.iter().any(|new| {
                new.field_path_name == old.field_path_name
                    && bytes_equal_ct(&new.value, &old.value)
            })
        })
        .cloned()
        .collect()
}

fn bytes_equal_ct(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Build the `$pull` update that removes the tags of deleted fields.
/// Fails 6371513 when a removed field has no delete token.
pub fn generate_update_to_remove_tags(
    removed: &[EdcIndexedFields],
    tokens: &IndexMap<String, DeleteToken>,
) -> Result<Document> {
    let mut pulled = Vec::new();
    for field in removed {
        let token = tokens.get(&field.field_path_name).ok_or_else(|| {
            Error::policy(
                6371513,
                format!("missing delete token for field {:?}", field.field_path_name),
            )
        })?;
        let (ty, payload) = decode_blob(&field.value)?;
        match ty {
            EncryptedBinDataType::EqualityIndexedValue => {
                let parsed = Fle2EqualityIndexedValue::decrypt_and_parse(
                    &token.server_encryption_token,
                    payload,
                )?;
                pulled.push(tag_for(&parsed.edc, parsed.count));
            }
            EncryptedBinDataType::RangeIndexedValue => {
                let parsed = Fle2RangeIndexedValue::decrypt_and_parse(
                    &token.server_encryption_token,
                    payload,
                )?;
                for ((edc, _, _), count) in parsed.tokens.iter().zip(&parsed.counters) {
                    pulled.push(tag_for(edc, *count));
                }
            }
            other => {
                return Err(Error::bad_value(format!(
                    "field {:?} is not an indexed value ({other:?})",
                    field.field_path_name
                )))
            }
        }
    }

    let mut in_doc = Document::new();
    in_doc.push(
        "$in",
        Value::Array(pulled.iter().map(|tag| Value::binary(tag.to_vec())).collect()),
    );
    let mut safe_content = Document::new();
    safe_content.push(SAFE_CONTENT_FIELD, Value::Object(in_doc));
    let mut update = Document::new();
    update.push("$pull", Value::Object(safe_content));
    Ok(update)
}

/// Every encrypted binary in the document must sit at a path declared in the
/// schema (6373601).
pub fn validate_encrypted_field_info(doc: &Document, efc: &EncryptedFieldConfig) -> Result<()> {
    visit_encrypted_binaries(doc, &mut |path, _| {
        if !efc.fields.iter().any(|field| field.path.as_str() == path) {
            return Err(Error::policy(
                6373601,
                format!("field {path:?} is encrypted but not declared in the schema"),
            ));
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(path: &str, value: &[u8]) -> EdcIndexedFields {
        EdcIndexedFields {
            value: value.to_vec(),
            field_path_name: path.to_string(),
        }
    }

    #[test]
    fn removed_tags_table() {
        let v1 = &[0x10, 0x11][..];
        let v2 = &[0x20, 0x21][..];
        let empty_fields: Vec<EdcIndexedFields> = vec![];
        let orig = vec![field("a", &[]), field("b", &[])];
        let newer = vec![field("a", &[]), field("b", &[]), field("c", &[])];
        let newer_reversed = vec![field("c", &[]), field("b", &[]), field("a", &[])];
        let orig2 = vec![field("a", &[]), field("b", v2)];
        let orig3 = vec![field("a", v1), field("b", v2)];
        let orig4 = vec![field("a", v2), field("b", v1)];

        assert!(get_removed_tags(&orig, &orig).is_empty());
        assert!(get_removed_tags(&orig, &newer).is_empty());

        let removed = get_removed_tags(&newer, &orig);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].field_path_name, "c");

        assert!(get_removed_tags(&empty_fields, &orig).is_empty());
        assert_eq!(get_removed_tags(&newer, &empty_fields).len(), 3);
        assert!(get_removed_tags(&newer, &newer_reversed).is_empty());

        let removed = get_removed_tags(&orig, &orig2);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].field_path_name, "b");

        let removed = get_removed_tags(&orig2, &orig3);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].field_path_name, "a");

        assert!(get_removed_tags(&orig3, &orig3).is_empty());

        let removed = get_removed_tags(&orig3, &orig4);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].field_path_name, "a");
        assert_eq!(removed[1].field_path_name, "b");
    }

    #[test]
    fn edc_token_fanout_counts() {
        let token = EdcDerivedFromDataToken::from_bytes([7; 32]);
        assert_eq!(generate_edc_tokens(&token, 0).len(), 1);
        assert_eq!(generate_edc_tokens(&token, 1).len(), 2);
        assert_eq!(generate_edc_tokens(&token, 2).len(), 3);
        assert_eq!(generate_edc_tokens(&token, 3).len(), 4);
    }

    #[test]
    fn walker_visits_nested_paths() {
        let mut nested2 = Document::new();
        nested2.push("encrypted", Value::encrypted(vec![3, 9]));
        let mut nested = Document::new();
        nested.push("encrypted", Value::encrypted(vec![3, 8]));
        nested.push("nested2", Value::Object(nested2));
        let mut doc = Document::new();
        doc.push("encrypted", Value::encrypted(vec![3, 7]));
        doc.push("nested", Value::Object(nested));
        doc.push("plain", Value::Int32(1));
        doc.push("tags", Value::Array(vec![Value::binary(vec![1])]));

        let mut paths = Vec::new();
        visit_encrypted_binaries(&doc, &mut |path, _| {
            paths.push(path.to_string());
            Ok(())
        })
        .unwrap();
        assert_eq!(
            paths,
            ["encrypted", "nested.encrypted", "nested.nested2.encrypted"]
        );
    }

    #[test]
    fn walker_ignores_general_binaries() {
        let mut doc = Document::new();
        doc.push("tag", Value::binary(vec![1, 2, 3]));
        let mut count = 0;
        visit_encrypted_binaries(&doc, &mut |_, _| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 0);
    }
}
