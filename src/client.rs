// Client-side document transforms: replacing placeholders with encrypted
// payloads, decrypting stored documents back to plaintext, and validating
// the tag-array invariant of a stored document against its schema.

use rand::Rng;
use subtle::ConstantTimeEq;
use tracing::debug;
use uuid::Uuid;

use crate::contracts::KeyVault;
use crate::crypto::PrfBlock;
use crate::edc::{map_encrypted_binaries, visit_encrypted_binaries, SAFE_CONTENT_FIELD};
use crate::errors::{Error, Result};
use crate::payloads::{
    decode_blob, edge_seed, serialize_client_value, decrypt_client_value, EdgeFindTokenSet,
    EdgeTokenSet, EncryptedBinDataType, EncryptedStateCollectionTokens, FindEqualityPayload,
    FindRangePayload, Fle2Algorithm, Fle2EqualityIndexedValue, Fle2RangeIndexedValue,
    Fle2UnindexedEncryptedValue, InsertUpdatePayload, Placeholder, PlaceholderType,
    PlaceholderValue, RangeFindSpec, RangeInsertSpec,
};
use crate::range::{get_edges_for_value, get_min_cover};
use crate::schema::EncryptedFieldConfig;
use crate::tokens::{
    generate_collections_level1_token, generate_ecc_derived_from_data_and_contention_token,
    generate_ecc_derived_from_data_token, generate_ecc_token, generate_ecoc_token,
    generate_edc_derived_from_data_and_contention_token, generate_edc_derived_from_data_token,
    generate_edc_token, generate_edc_twice_derived_token,
    generate_esc_derived_from_data_and_contention_token, generate_esc_derived_from_data_token,
    generate_esc_token, generate_server_data_encryption_level1_token, EccToken, EcocToken,
    EdcToken, EscToken, ServerDataEncryptionLevel1Token,
};
use crate::types::{IndexKey, UserKey};
use crate::values::{
    is_equality_indexable, is_range_indexable, is_unindexed_supported, BsonType, Document, Value,
};

// Per-collection token bundle derived once per placeholder.
struct CollectionTokens {
    edc: EdcToken,
    esc: EscToken,
    ecc: EccToken,
    ecoc: EcocToken,
    server: ServerDataEncryptionLevel1Token,
}

impl CollectionTokens {
    fn derive(index_key: &IndexKey) -> Self {
        let level1 = generate_collections_level1_token(index_key);
        Self {
            edc: generate_edc_token(&level1),
            esc: generate_esc_token(&level1),
            ecc: generate_ecc_token(&level1),
            ecoc: generate_ecoc_token(&level1),
            server: generate_server_data_encryption_level1_token(index_key),
        }
    }

    // Level-4 token triple plus sealed state tokens for one value seed.
    fn contention_tokens(
        &self,
        seed: &[u8],
        contention: u64,
    ) -> (EdgeTokenSet, EncryptedStateCollectionTokens) {
        let edc_data = generate_edc_derived_from_data_token(&self.edc, seed);
        let esc_data = generate_esc_derived_from_data_token(&self.esc, seed);
        let ecc_data = generate_ecc_derived_from_data_token(&self.ecc, seed);
        let esc_l4 = generate_esc_derived_from_data_and_contention_token(&esc_data, contention);
        let ecc_l4 = generate_ecc_derived_from_data_and_contention_token(&ecc_data, contention);
        let state = EncryptedStateCollectionTokens {
            esc: esc_l4,
            ecc: ecc_l4,
        };
        let sealed = state.serialize(&self.ecoc);
        (
            EdgeTokenSet {
                edc: generate_edc_derived_from_data_and_contention_token(&edc_data, contention),
                esc: esc_l4,
                ecc: ecc_l4,
                encrypted_tokens: sealed,
            },
            state,
        )
    }

    fn find_tokens(&self, seed: &[u8]) -> EdgeFindTokenSet {
        EdgeFindTokenSet {
            edc: generate_edc_derived_from_data_token(&self.edc, seed),
            esc: generate_esc_derived_from_data_token(&self.esc, seed),
            ecc: generate_ecc_derived_from_data_token(&self.ecc, seed),
        }
    }
}

fn pick_contention_bucket(max_contention: u64) -> u64 {
    if max_contention == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=max_contention)
    }
}

/// Replace every placeholder in the document with its encrypted payload.
///
/// Equality and range insert placeholders become insert/update payloads,
/// find placeholders become find payloads, unindexed placeholders become
/// sealed unindexed values. Presenting an already-encrypted blob as fresh
/// input is rejected: legacy formats with 6409402, everything else with
/// 6409401.
pub fn transform_placeholders(doc: &Document, vault: &dyn KeyVault) -> Result<Document> {
    map_encrypted_binaries(doc, &mut |path, bytes| {
        let (ty, payload) = decode_blob(bytes)?;
        if ty.is_legacy() {
            return Err(Error::policy(
                6409402,
                format!("field {path:?} already carries a legacy encrypted value"),
            ));
        }
        if ty != EncryptedBinDataType::Placeholder {
            return Err(Error::policy(
                6409401,
                format!("field {path:?} is already encrypted ({ty:?})"),
            ));
        }
        let placeholder = Placeholder::parse(payload)?;
        debug!(
            field = path,
            algorithm = ?placeholder.algorithm,
            operation = ?placeholder.placeholder_type,
            "encrypting placeholder"
        );
        let blob = encrypt_placeholder(&placeholder, vault)?;
        Ok(Some(Value::encrypted(blob)))
    })
}

// An encrypt-subtype binary offered as plaintext is a prior encryption
// output; wrapping it again would corrupt the index.
fn check_not_already_encrypted(value: &Value) -> Result<()> {
    if value.is_encrypted_binary() {
        return Err(Error::policy(
            6409401,
            "the value to encrypt is already an encrypted payload",
        ));
    }
    Ok(())
}

fn encrypt_placeholder(placeholder: &Placeholder, vault: &dyn KeyVault) -> Result<Vec<u8>> {
    let index_key = IndexKey(vault.get_key(placeholder.index_key_id)?);
    let user_key = UserKey(vault.get_key(placeholder.user_key_id)?);

    match (placeholder.algorithm, placeholder.placeholder_type) {
        (Fle2Algorithm::Equality, PlaceholderType::Insert) => {
            let value = expect_scalar(placeholder)?;
            check_not_already_encrypted(value)?;
            if !is_equality_indexable(value.bson_type()) {
                return Err(Error::policy(
                    6338602,
                    format!(
                        "type {:?} is not allowed for equality-indexed encryption",
                        value.bson_type()
                    ),
                ));
            }
            Ok(build_insert_payload(placeholder, &index_key, &user_key, value, None)?.to_blob())
        }
        (Fle2Algorithm::Equality, PlaceholderType::Find) => {
            let value = expect_scalar(placeholder)?;
            check_not_already_encrypted(value)?;
            if !is_equality_indexable(value.bson_type()) {
                return Err(Error::policy(
                    6338602,
                    format!(
                        "type {:?} is not allowed for equality-indexed queries",
                        value.bson_type()
                    ),
                ));
            }
            let tokens = CollectionTokens::derive(&index_key);
            let seed = value.element_bytes();
            let edge = tokens.find_tokens(&seed);
            Ok(FindEqualityPayload {
                edc: edge.edc,
                esc: edge.esc,
                ecc: edge.ecc,
                max_counter: placeholder.max_contention,
                server_encryption_token: tokens.server,
            }
            .to_blob())
        }
        (Fle2Algorithm::Unindexed, PlaceholderType::Insert) => {
            let value = expect_scalar(placeholder)?;
            check_not_already_encrypted(value)?;
            if !is_unindexed_supported(value.bson_type()) {
                return Err(Error::policy(
                    6379102,
                    format!(
                        "type {:?} is not allowed for unindexed encryption",
                        value.bson_type()
                    ),
                ));
            }
            Ok(Fle2UnindexedEncryptedValue::serialize(
                &user_key,
                placeholder.user_key_id,
                value.bson_type(),
                &value.element_bytes(),
            ))
        }
        (Fle2Algorithm::Unindexed, PlaceholderType::Find) => Err(Error::bad_value(
            "unindexed encrypted fields cannot be queried",
        )),
        (Fle2Algorithm::Range, PlaceholderType::Insert) => {
            let spec = expect_range_insert(placeholder)?;
            check_range_value_type(&spec.value)?;
            let edges = get_edges_for_value(
                &spec.value,
                spec.min.as_ref(),
                spec.max.as_ref(),
                placeholder.sparsity,
            )?;
            Ok(
                build_insert_payload(placeholder, &index_key, &user_key, &spec.value, Some(&edges))?
                    .to_blob(),
            )
        }
        (Fle2Algorithm::Range, PlaceholderType::Find) => {
            let spec = expect_range_find(placeholder)?;
            let cover = get_min_cover(&spec.edges_info, placeholder.sparsity)?;
            let tokens = CollectionTokens::derive(&index_key);
            let edges = cover
                .iter()
                .map(|edge| tokens.find_tokens(edge_seed(edge)))
                .collect();
            Ok(FindRangePayload {
                edges,
                max_counter: placeholder.max_contention,
                server_encryption_token: tokens.server,
                payload_id: spec.payload_id,
                first_operator: spec.first_operator,
            }
            .to_blob())
        }
    }
}

fn expect_scalar(placeholder: &Placeholder) -> Result<&Value> {
    match &placeholder.value {
        PlaceholderValue::Scalar(value) => Ok(value),
        _ => Err(Error::bad_value(
            "placeholder value does not match its algorithm",
        )),
    }
}

fn expect_range_insert(placeholder: &Placeholder) -> Result<&RangeInsertSpec> {
    match &placeholder.value {
        PlaceholderValue::RangeInsert(spec) => Ok(spec),
        _ => Err(Error::bad_value(
            "range insert placeholder carries no insert spec",
        )),
    }
}

fn expect_range_find(placeholder: &Placeholder) -> Result<&RangeFindSpec> {
    match &placeholder.value {
        PlaceholderValue::RangeFind(spec) => Ok(spec),
        _ => Err(Error::bad_value(
            "range find placeholder carries no find spec",
        )),
    }
}

fn check_range_value_type(value: &Value) -> Result<()> {
    match value.bson_type() {
        BsonType::Null | BsonType::Undefined => Err(Error::policy(
            40414,
            "null and undefined values cannot be range-indexed",
        )),
        ty if is_range_indexable(ty) => Ok(()),
        ty => Err(Error::type_mismatch(format!(
            "type {ty:?} cannot be range-indexed"
        ))),
    }
}

fn build_insert_payload(
    placeholder: &Placeholder,
    index_key: &IndexKey,
    user_key: &UserKey,
    value: &Value,
    edges: Option<&crate::range::Edges>,
) -> Result<InsertUpdatePayload> {
    let tokens = CollectionTokens::derive(index_key);
    let contention = pick_contention_bucket(placeholder.max_contention);
    let seed = value.element_bytes();
    let (value_tokens, _) = tokens.contention_tokens(&seed, contention);

    let edge_token_sets = match edges {
        None => None,
        Some(edges) => Some(
            edges
                .get()
                .into_iter()
                .map(|edge| tokens.contention_tokens(edge_seed(edge), contention).0)
                .collect::<Vec<_>>(),
        ),
    };

    Ok(InsertUpdatePayload {
        edc: value_tokens.edc,
        esc: value_tokens.esc,
        ecc: value_tokens.ecc,
        encrypted_tokens: value_tokens.encrypted_tokens,
        index_key_id: placeholder.index_key_id,
        bson_type: value.bson_type(),
        value: serialize_client_value(
            user_key,
            placeholder.user_key_id,
            value.bson_type(),
            &seed,
        ),
        server_encryption_token: tokens.server,
        edge_token_sets,
    })
}

/// Decrypt every encrypted value in a stored document back to its original
/// plaintext value. Find payloads carry no value and pass through untouched;
/// the tag array is left in place.
pub fn decrypt_document(doc: &Document, vault: &dyn KeyVault) -> Result<Document> {
    map_encrypted_binaries(doc, &mut |path, bytes| {
        let (ty, payload) = decode_blob(bytes)?;
        match ty {
            EncryptedBinDataType::UnindexedEncryptedValue => {
                let (bson_type, plain) = Fle2UnindexedEncryptedValue::deserialize(vault, bytes)?;
                Ok(Some(Value::from_element_bytes(bson_type, &plain)?))
            }
            EncryptedBinDataType::InsertUpdatePayload => {
                let parsed = InsertUpdatePayload::parse(payload)?;
                let (bson_type, plain) = decrypt_client_value(vault, &parsed.value)?;
                Ok(Some(Value::from_element_bytes(bson_type, &plain)?))
            }
            EncryptedBinDataType::EqualityIndexedValue => {
                let token = server_token_for(vault, Fle2EqualityIndexedValue::parse_key_id(payload)?)?;
                let parsed = Fle2EqualityIndexedValue::decrypt_and_parse(&token, payload)?;
                let (bson_type, plain) =
                    decrypt_client_value(vault, &parsed.client_encrypted_value)?;
                Ok(Some(Value::from_element_bytes(bson_type, &plain)?))
            }
            EncryptedBinDataType::RangeIndexedValue => {
                let token = server_token_for(vault, Fle2RangeIndexedValue::parse_key_id(payload)?)?;
                let parsed = Fle2RangeIndexedValue::decrypt_and_parse(&token, payload)?;
                let (bson_type, plain) =
                    decrypt_client_value(vault, &parsed.client_encrypted_value)?;
                Ok(Some(Value::from_element_bytes(bson_type, &plain)?))
            }
            EncryptedBinDataType::FindEqualityPayload | EncryptedBinDataType::FindRangePayload => {
                Ok(None)
            }
            other => Err(Error::bad_value(format!(
                "field {path:?} cannot be decrypted ({other:?})"
            ))),
        }
    })
}

fn server_token_for(vault: &dyn KeyVault, key_id: Uuid) -> Result<ServerDataEncryptionLevel1Token> {
    let index_key = IndexKey(vault.get_key(key_id)?);
    Ok(generate_server_data_encryption_level1_token(&index_key))
}

/// Validate a stored document against its schema: every indexed encrypted
/// field's tag must appear in `__safeContent__`, and nothing else may.
///
/// Fields declared in the schema but absent from the document are tolerated;
/// an unencrypted document with no indexed fields passes trivially.
pub fn validate_document(
    doc: &Document,
    efc: &EncryptedFieldConfig,
    vault: &dyn KeyVault,
) -> Result<()> {
    let mut expected_tags: Vec<PrfBlock> = Vec::new();
    visit_encrypted_binaries(doc, &mut |path, bytes| {
        let declared = efc.fields.iter().any(|field| field.path.as_str() == path);
        if !declared {
            return Ok(());
        }
        let (ty, payload) = decode_blob(bytes)?;
        match ty {
            EncryptedBinDataType::EqualityIndexedValue => {
                let token = server_token_for(vault, Fle2EqualityIndexedValue::parse_key_id(payload)?)?;
                let parsed = Fle2EqualityIndexedValue::decrypt_and_parse(&token, payload)?;
                expected_tags.push(crate::edc::generate_tag(
                    &generate_edc_twice_derived_token(&parsed.edc),
                    parsed.count,
                ));
            }
            EncryptedBinDataType::RangeIndexedValue => {
                let token = server_token_for(vault, Fle2RangeIndexedValue::parse_key_id(payload)?)?;
                let parsed = Fle2RangeIndexedValue::decrypt_and_parse(&token, payload)?;
                for ((edc, _, _), count) in parsed.tokens.iter().zip(&parsed.counters) {
                    expected_tags.push(crate::edc::generate_tag(
                        &generate_edc_twice_derived_token(edc),
                        *count,
                    ));
                }
            }
            // Unindexed values carry no tags.
            EncryptedBinDataType::UnindexedEncryptedValue => {}
            other => {
                return Err(Error::bad_value(format!(
                    "field {path:?} holds an unexpected payload ({other:?})"
                )))
            }
        }
        Ok(())
    })?;

    if expected_tags.is_empty() {
        return Ok(());
    }

    let array = match doc.get(SAFE_CONTENT_FIELD) {
        None => {
            return Err(Error::policy(
                6371506,
                format!("{SAFE_CONTENT_FIELD} is missing"),
            ))
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(Error::policy(
                6371507,
                format!("{SAFE_CONTENT_FIELD} must be an array"),
            ))
        }
    };

    let mut stored: Vec<&[u8]> = Vec::with_capacity(array.len());
    for item in array {
        match item {
            Value::Binary { bytes, .. } => stored.push(bytes),
            _ => {
                return Err(Error::policy(
                    6371515,
                    format!("{SAFE_CONTENT_FIELD} entries must be binary"),
                ))
            }
        }
    }

    for tag in &stored {
        let known = expected_tags
            .iter()
            .any(|expected| tag.len() == expected.len() && bool::from(tag.ct_eq(expected)));
        if !known {
            return Err(Error::policy(
                6371510,
                format!("{SAFE_CONTENT_FIELD} contains a tag matching no encrypted field"),
            ));
        }
    }
    for expected in &expected_tags {
        let present = stored
            .iter()
            .any(|tag| tag.len() == expected.len() && bool::from(tag.ct_eq(expected.as_slice())));
        if !present {
            return Err(Error::policy(
                6371516,
                format!("an encrypted field's tag is missing from {SAFE_CONTENT_FIELD}"),
            ));
        }
    }
    Ok(())
}
