// Shared fixtures for the integration tests: the fixed key material, an
// in-memory key vault and an in-memory state collection with an overridable
// document count.

#![allow(dead_code)]

use fieldcrypt::contracts::{KeyVault, StateCollectionReader};
use fieldcrypt::crypto::PrfBlock;
use fieldcrypt::errors::{Error, Result};
use fieldcrypt::types::KeyMaterial;
use fieldcrypt::values::{Document, Value};
use std::cell::Cell;
use uuid::Uuid;

pub const INDEX_KEY_ID: &str = "12345678-1234-9876-1234-123456789012";
pub const INDEX_KEY2_ID: &str = "12345678-1234-9876-1234-123456789013";
pub const INDEX_KEY3_ID: &str = "12345678-1234-9876-1234-123456789014";
pub const USER_KEY_ID: &str = "ABCDEFAB-1234-9876-1234-123456789012";

const INDEX_KEY_HEX: &str = "7dbfebc619aa68a659f64b8e23ccd21644ac326cb74a26840c3d2420176c40ae\
                             088294d00ad6cae9684237b21b754cf503f085c25cd320bf035c3417416e1e6f\
                             e3d9219f79586582112740b2add88e1030d91926ae8afc13ee575cfb8bb965b7";
const INDEX_KEY2_HEX: &str = "1f65c3223d5653cdbd73c11a8f85587aafcbd5be7e4c308d357b2f01bbcf76a9\
                              802930e5f233923bbc3f5ebd0be1db9807f04aa870c896092180dd8b05816b8f\
                              7568ff762a1a4efd35bbc02826394eb30f36cd8e0c646ae2f43df420e50a19eb";
const USER_KEY_HEX: &str = "a7ddbc4c8be00d51f68d9d8e485f351c8edc8d2206b24d8e0e1816d005fbe520\
                            e489125047d647b0d8684bfbdbf09c304085ed086aba6c2b2b1677ccc91ced88\
                            47a733bf5e5682c84b3ee7969e4a5fe0e0c21e5e3ee190595a55f83147d8de2a";

pub fn index_key_id() -> Uuid {
    INDEX_KEY_ID.parse().unwrap()
}

pub fn index_key2_id() -> Uuid {
    INDEX_KEY2_ID.parse().unwrap()
}

pub fn index_key3_id() -> Uuid {
    INDEX_KEY3_ID.parse().unwrap()
}

pub fn user_key_id() -> Uuid {
    USER_KEY_ID.parse().unwrap()
}

fn material(hex_str: &str) -> KeyMaterial {
    KeyMaterial::new(hex::decode(hex_str).unwrap()).unwrap()
}

pub fn index_key_material() -> KeyMaterial {
    material(INDEX_KEY_HEX)
}

/// Vault over the four fixed test keys.
pub struct TestKeyVault;

impl KeyVault for TestKeyVault {
    fn get_key(&self, id: Uuid) -> Result<KeyMaterial> {
        if id == index_key_id() {
            Ok(material(INDEX_KEY_HEX))
        } else if id == index_key2_id() || id == index_key3_id() {
            Ok(material(INDEX_KEY2_HEX))
        } else if id == user_key_id() {
            Ok(material(USER_KEY_HEX))
        } else {
            Err(Error::KeyNotFound(id))
        }
    }
}

/// In-memory state collection whose reported count can be overridden to
/// simulate stale or estimated counts.
#[derive(Default)]
pub struct TestDocumentCollection {
    docs: Vec<Document>,
    override_count: Cell<Option<u64>>,
}

impl TestDocumentCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, doc: Document) {
        assert!(doc.get(fieldcrypt::ID_FIELD).is_some());
        self.docs.push(doc);
    }

    pub fn set_override_count(&self, count: u64) {
        self.override_count.set(Some(count));
    }

    pub fn clear_override_count(&self) {
        self.override_count.set(None);
    }
}

impl StateCollectionReader for TestDocumentCollection {
    fn get_by_id(&self, id: &PrfBlock) -> Option<Document> {
        self.docs
            .iter()
            .find(|doc| match doc.get(fieldcrypt::ID_FIELD) {
                Some(Value::Binary { bytes, .. }) => bytes.as_slice() == id.as_slice(),
                _ => false,
            })
            .cloned()
    }

    fn document_count(&self) -> u64 {
        self.override_count
            .get()
            .unwrap_or(self.docs.len() as u64)
    }
}

/// Run a document through the full client/server insert pipeline: transform
/// placeholders, optionally validate against a schema, assign one counter
/// per tag and finalize.
pub fn encrypt_document(
    doc: &Document,
    vault: &dyn KeyVault,
    efc: Option<&fieldcrypt::EncryptedFieldConfig>,
) -> Result<Document> {
    let transformed = fieldcrypt::transform_placeholders(doc, vault)?;
    if let Some(efc) = efc {
        fieldcrypt::validate_encrypted_field_info(&transformed, efc)?;
    }

    let mut payloads = fieldcrypt::get_encrypted_field_info(&transformed)?;
    for payload in &mut payloads {
        match &payload.payload.edge_token_sets {
            Some(edges) => payload.counts = vec![1; edges.len()],
            None => payload.counts = vec![1],
        }
    }
    fieldcrypt::finalize_for_insert(&transformed, &payloads)
}

/// The schema used across the integration tests: two indexed equality
/// fields and one unindexed field.
pub fn test_encrypted_field_config() -> fieldcrypt::EncryptedFieldConfig {
    fieldcrypt::EncryptedFieldConfig::parse_json(&format!(
        r#"{{
            "escCollection": "esc",
            "eccCollection": "ecc",
            "ecocCollection": "ecoc",
            "fields": [
                {{
                    "keyId": {{"$uuid": "{INDEX_KEY_ID}"}},
                    "path": "encrypted",
                    "bsonType": "string",
                    "queries": {{"queryType": "equality"}}
                }},
                {{
                    "keyId": {{"$uuid": "{INDEX_KEY2_ID}"}},
                    "path": "nested.encrypted",
                    "bsonType": "string",
                    "queries": {{"queryType": "equality"}}
                }},
                {{
                    "keyId": {{"$uuid": "{INDEX_KEY3_ID}"}},
                    "path": "nested.notindexed",
                    "bsonType": "string"
                }}
            ]
        }}"#
    ))
    .unwrap()
}
