// Encrypted-field schema handling: the per-collection field configuration,
// the encryption-information wire document that carries it, and the delete
// tokens derived from the key vault for update/delete tag removal.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::check;
use crate::contracts::KeyVault;
use crate::errors::{Error, Result};
use crate::tokens::{
    generate_collections_level1_token, generate_ecoc_token,
    generate_server_data_encryption_level1_token, EcocToken, ServerDataEncryptionLevel1Token,
};
use crate::types::IndexKey;
use crate::values::{Document, Value};

/// Binary subtype used for UUID fields in wire documents.
const BINARY_SUBTYPE_UUID: u8 = 4;

/// How a field may be queried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTypeConfig {
    #[serde(rename = "queryType")]
    pub query_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contention: Option<u64>,
}

/// One encrypted field declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedField {
    #[serde(rename = "keyId", with = "uuid_field")]
    pub key_id: Uuid,
    pub path: crate::types::FieldPath,
    #[serde(rename = "bsonType", default, skip_serializing_if = "Option::is_none")]
    pub bson_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<QueryTypeConfig>,
}

impl EncryptedField {
    /// Whether this field carries a queryable index (vs. unindexed storage).
    pub fn is_indexed(&self) -> bool {
        self.queries.is_some()
    }
}

/// The per-collection encrypted-field configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedFieldConfig {
    #[serde(
        rename = "escCollection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub esc_collection: Option<String>,
    #[serde(
        rename = "eccCollection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ecc_collection: Option<String>,
    #[serde(
        rename = "ecocCollection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub ecoc_collection: Option<String>,
    pub fields: Vec<EncryptedField>,
}

// The `keyId` field accepts the extended-JSON `{"$uuid": "..."}` shape.
mod uuid_field {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    struct ExtendedUuid {
        #[serde(rename = "$uuid")]
        uuid: Uuid,
    }

    pub fn serialize<S: Serializer>(
        id: &Uuid,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        ExtendedUuid { uuid: *id }.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Uuid, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Extended(ExtendedUuid),
            Plain(Uuid),
        }
        match Shape::deserialize(deserializer)? {
            Shape::Extended(e) => Ok(e.uuid),
            Shape::Plain(u) => Ok(u),
        }
    }
}

impl EncryptedFieldConfig {
    /// Parse the JSON shape used by configuration and tests.
    pub fn parse_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| Error::bad_value(format!("invalid encrypted field config: {err}")))
    }

    /// Render into the document value model for wire transport.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        if let Some(esc) = &self.esc_collection {
            doc.push("escCollection", Value::String(esc.clone()));
        }
        if let Some(ecc) = &self.ecc_collection {
            doc.push("eccCollection", Value::String(ecc.clone()));
        }
        if let Some(ecoc) = &self.ecoc_collection {
            doc.push("ecocCollection", Value::String(ecoc.clone()));
        }
        let fields = self
            .fields
            .iter()
            .map(|field| {
                let mut f = Document::new();
                f.push(
                    "keyId",
                    Value::Binary {
                        subtype: BINARY_SUBTYPE_UUID,
                        bytes: field.key_id.as_bytes().to_vec(),
                    },
                );
                f.push("path", Value::String(field.path.as_str().to_string()));
                if let Some(bson_type) = &field.bson_type {
                    f.push("bsonType", Value::String(bson_type.clone()));
                }
                if let Some(queries) = &field.queries {
                    let mut q = Document::new();
                    q.push("queryType", Value::String(queries.query_type.clone()));
                    if let Some(contention) = queries.contention {
                        q.push("contention", Value::Int64(contention as i64));
                    }
                    f.push("queries", Value::Object(q));
                }
                Value::Object(f)
            })
            .collect();
        doc.push("fields", Value::Array(fields));
        doc
    }

    /// Parse back from the document value model.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let get_string = |name: &str| -> Result<Option<String>> {
            match doc.get(name) {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(Error::bad_value(format!("{name} must be a string"))),
            }
        };
        let fields = match doc.get("fields") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    let Value::Object(f) = item else {
                        return Err(Error::bad_value("field declaration must be an object"));
                    };
                    let key_id = match f.get("keyId") {
                        Some(Value::Binary { bytes, .. }) if bytes.len() == 16 => {
                            Uuid::from_bytes(bytes.as_slice().try_into().unwrap())
                        }
                        _ => return Err(Error::bad_value("keyId must be a 16-byte binary")),
                    };
                    let path = match f.get("path") {
                        Some(Value::String(s)) => crate::types::FieldPath::new(s.clone())?,
                        _ => return Err(Error::bad_value("path must be a string")),
                    };
                    let bson_type = match f.get("bsonType") {
                        None => None,
                        Some(Value::String(s)) => Some(s.clone()),
                        Some(_) => return Err(Error::bad_value("bsonType must be a string")),
                    };
                    let queries = match f.get("queries") {
                        None => None,
                        Some(Value::Object(q)) => {
                            let query_type = match q.get("queryType") {
                                Some(Value::String(s)) => s.clone(),
                                _ => {
                                    return Err(Error::bad_value("queryType must be a string"))
                                }
                            };
                            let contention = match q.get("contention") {
                                None => None,
                                Some(Value::Int64(c)) => Some(*c as u64),
                                Some(Value::Int32(c)) => Some(*c as u64),
                                Some(_) => {
                                    return Err(Error::bad_value("contention must be an integer"))
                                }
                            };
                            Some(QueryTypeConfig {
                                query_type,
                                contention,
                            })
                        }
                        Some(_) => return Err(Error::bad_value("queries must be an object")),
                    };
                    Ok(EncryptedField {
                        key_id,
                        path,
                        bson_type,
                        queries,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            _ => return Err(Error::bad_value("fields must be an array")),
        };
        Ok(Self {
            esc_collection: get_string("escCollection")?,
            ecc_collection: get_string("eccCollection")?,
            ecoc_collection: get_string("ecocCollection")?,
            fields,
        })
    }
}

/// A delete token pair for one indexed field: the server envelope token plus
/// the compaction-collection token.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteToken {
    pub server_encryption_token: ServerDataEncryptionLevel1Token,
    pub ecoc_token: EcocToken,
}

impl DeleteToken {
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(self.server_encryption_token.as_bytes());
        out.extend_from_slice(self.ecoc_token.as_bytes());
        out
    }

    fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(Error::bad_value(format!(
                "delete token must be 64 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            server_encryption_token: ServerDataEncryptionLevel1Token::from_bytes(
                bytes[..32].try_into().unwrap(),
            ),
            ecoc_token: EcocToken::from_bytes(bytes[32..].try_into().unwrap()),
        })
    }
}

/// `{type: 1, schema: {<ns>: <config>}}`.
pub fn encryption_information_serialize(ns: &str, efc: &EncryptedFieldConfig) -> Document {
    let mut schema = Document::new();
    schema.push(ns, Value::Object(efc.to_document()));
    let mut doc = Document::new();
    doc.push("type", Value::Int32(1));
    doc.push("schema", Value::Object(schema));
    doc
}

/// As [`encryption_information_serialize`], plus delete tokens for every
/// indexed field, derived through the key vault.
pub fn encryption_information_serialize_for_delete(
    ns: &str,
    efc: &EncryptedFieldConfig,
    vault: &dyn KeyVault,
) -> Result<Document> {
    let mut doc = encryption_information_serialize(ns, efc);

    let mut tokens = Document::new();
    for field in efc.fields.iter().filter(|f| f.is_indexed()) {
        let index_key = IndexKey(vault.get_key(field.key_id)?);
        let level1 = generate_collections_level1_token(&index_key);
        let token = DeleteToken {
            server_encryption_token: generate_server_data_encryption_level1_token(&index_key),
            ecoc_token: generate_ecoc_token(&level1),
        };
        tokens.push(field.path.as_str(), Value::binary(token.serialize()));
    }
    let mut delete_tokens = Document::new();
    delete_tokens.push(ns, Value::Object(tokens));
    doc.push("deleteTokens", Value::Object(delete_tokens));
    Ok(doc)
}

/// Extract and validate the schema entry for one namespace.
///
/// The entry must parse as a field config (6371205) and must name all three
/// state collections: esc 6371207, ecc 6371206, ecoc 6371208.
pub fn get_and_validate_schema(ns: &str, info: &Document) -> Result<EncryptedFieldConfig> {
    let schema = match info.get("schema") {
        Some(Value::Object(schema)) => schema,
        _ => {
            return Err(Error::policy(
                6371205,
                format!("encryption information has no schema for namespace {ns:?}"),
            ))
        }
    };
    let efc = match schema.get(ns) {
        Some(Value::Object(entry)) => EncryptedFieldConfig::from_document(entry)
            .map_err(|err| Error::policy(6371205, format!("invalid schema for {ns:?}: {err}")))?,
        _ => {
            return Err(Error::policy(
                6371205,
                format!("schema entry for namespace {ns:?} is not an object"),
            ))
        }
    };
    check!(
        efc.esc_collection.is_some(),
        6371207,
        "encrypted field config is missing the esc collection name"
    );
    check!(
        efc.ecc_collection.is_some(),
        6371206,
        "encrypted field config is missing the ecc collection name"
    );
    check!(
        efc.ecoc_collection.is_some(),
        6371208,
        "encrypted field config is missing the ecoc collection name"
    );
    Ok(efc)
}

/// Extract the delete-token map for one namespace. Fails 6371308 when the
/// document carries no delete tokens, 6371309 when the namespace entry is
/// not an object and 6371310 when a token value is not binary.
pub fn get_delete_tokens(ns: &str, info: &Document) -> Result<IndexMap<String, DeleteToken>> {
    let tokens = info.get("deleteTokens").ok_or_else(|| {
        Error::policy(6371308, "encryption information has no delete tokens")
    })?;
    let Value::Object(by_ns) = tokens else {
        return Err(Error::policy(6371308, "delete tokens must be an object"));
    };
    let entry = match by_ns.get(ns) {
        Some(Value::Object(entry)) => entry,
        Some(_) => {
            return Err(Error::policy(
                6371309,
                format!("delete tokens for namespace {ns:?} are not an object"),
            ))
        }
        None => {
            return Err(Error::policy(
                6371309,
                format!("no delete tokens for namespace {ns:?}"),
            ))
        }
    };
    let mut out = IndexMap::with_capacity(entry.len());
    for (path, value) in entry.iter() {
        let Value::Binary { bytes, .. } = value else {
            return Err(Error::policy(
                6371310,
                format!("delete token for field {path:?} must be binary"),
            ));
        };
        out.insert(path.to_string(), DeleteToken::parse(bytes)?);
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// The three-field config used across the test suite: two indexed
    /// equality fields and one unindexed field.
    pub(crate) fn test_config() -> EncryptedFieldConfig {
        EncryptedFieldConfig::parse_json(
            r#"{
                "escCollection": "esc",
                "eccCollection": "ecc",
                "ecocCollection": "ecoc",
                "fields": [
                    {
                        "keyId": {"$uuid": "12345678-1234-9876-1234-123456789012"},
                        "path": "encrypted",
                        "bsonType": "string",
                        "queries": {"queryType": "equality"}
                    },
                    {
                        "keyId": {"$uuid": "12345678-1234-9876-1234-123456789013"},
                        "path": "nested.encrypted",
                        "bsonType": "string",
                        "queries": {"queryType": "equality"}
                    },
                    {
                        "keyId": {"$uuid": "12345678-1234-9876-1234-123456789014"},
                        "path": "nested.notindexed",
                        "bsonType": "string"
                    }
                ]
            }"#,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::test_config;
    use super::*;
    use crate::types::KeyMaterial;

    struct TestVault;

    impl KeyVault for TestVault {
        fn get_key(&self, id: Uuid) -> Result<KeyMaterial> {
            // Any known id maps to deterministic material for these tests.
            let mut raw = [0u8; 96];
            raw[..16].copy_from_slice(id.as_bytes());
            Ok(KeyMaterial::new(raw).unwrap())
        }
    }

    #[test]
    fn parse_json_config() {
        let efc = test_config();
        assert_eq!(efc.esc_collection.as_deref(), Some("esc"));
        assert_eq!(efc.fields.len(), 3);
        assert!(efc.fields[0].is_indexed());
        assert!(!efc.fields[2].is_indexed());
        assert_eq!(efc.fields[1].path.as_str(), "nested.encrypted");
    }

    #[test]
    fn encryption_information_round_trip() {
        let efc = test_config();
        let info = encryption_information_serialize("test.test", &efc);
        let parsed = get_and_validate_schema("test.test", &info).unwrap();
        assert_eq!(parsed, efc);
    }

    #[test]
    fn bad_schema_entry() {
        let mut schema = Document::new();
        schema.push("a", Value::String("b".into()));
        let mut info = Document::new();
        info.push("type", Value::Int32(1));
        info.push("schema", Value::Object(schema));
        let err = get_and_validate_schema("test.test", &info).unwrap_err();
        assert_eq!(err.code(), 6371205);
    }

    #[test]
    fn missing_state_collections() {
        let cases = [
            (
                EncryptedFieldConfig {
                    esc_collection: None,
                    ..test_config()
                },
                6371207,
            ),
            (
                EncryptedFieldConfig {
                    ecc_collection: None,
                    ..test_config()
                },
                6371206,
            ),
            (
                EncryptedFieldConfig {
                    ecoc_collection: None,
                    ..test_config()
                },
                6371208,
            ),
        ];
        for (efc, code) in cases {
            let info = encryption_information_serialize("test.test", &efc);
            let err = get_and_validate_schema("test.test", &info).unwrap_err();
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn delete_tokens_round_trip() {
        let efc = test_config();
        let info =
            encryption_information_serialize_for_delete("test.test", &efc, &TestVault).unwrap();
        let tokens = get_delete_tokens("test.test", &info).unwrap();

        // Only the two indexed fields carry delete tokens.
        assert_eq!(tokens.len(), 2);
        assert!(tokens.contains_key("encrypted"));
        assert!(tokens.contains_key("nested.encrypted"));
    }

    #[test]
    fn corrupt_delete_tokens() {
        let efc = test_config();
        let info = encryption_information_serialize("test.test", &efc);

        // No deleteTokens at all.
        let err = get_delete_tokens("test.test", &info).unwrap_err();
        assert_eq!(err.code(), 6371308);

        // Namespace entry is not an object.
        let mut bad = info.clone();
        let mut by_ns = Document::new();
        by_ns.push("test.test", Value::String("str".into()));
        bad.push("deleteTokens", Value::Object(by_ns));
        let err = get_delete_tokens("test.test", &bad).unwrap_err();
        assert_eq!(err.code(), 6371309);

        // Token value is not binary.
        let mut bad = info.clone();
        let mut entry = Document::new();
        entry.push("a", Value::String("b".into()));
        let mut by_ns = Document::new();
        by_ns.push("test.test", Value::Object(entry));
        bad.push("deleteTokens", Value::Object(by_ns));
        let err = get_delete_tokens("test.test", &bad).unwrap_err();
        assert_eq!(err.code(), 6371310);
    }
}
