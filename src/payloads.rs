// Encrypted payload formats: the leading-type-byte blob framing, the
// client-side placeholder, the insert/update and find payloads, and the
// unindexed / equality-indexed / range-indexed value envelopes. Every decode
// site matches exhaustively on the closed type enum; unknown or legacy type
// bytes are rejected, never coerced.

use bytes::BufMut;
use uuid::Uuid;

use crate::codec::ByteReader;
use crate::contracts::KeyVault;
use crate::crypto::{fle2_aead_decrypt, fle2_aead_encrypt, fle2_decrypt, fle2_encrypt, PrfBlock};
use crate::errors::{Error, Result};
use crate::range::{EdgesInfo, ROOT_EDGE};
use crate::tokens::{
    EccDerivedFromDataAndContentionToken, EccDerivedFromDataToken,
    EdcDerivedFromDataAndContentionToken, EdcDerivedFromDataToken, EcocToken,
    EscDerivedFromDataAndContentionToken, EscDerivedFromDataToken, ServerDataEncryptionLevel1Token,
};
use crate::types::UserKey;
use crate::values::{BsonType, Value};

/// On-wire type byte of every encrypted blob. The first three values are the
/// legacy (pre-queryable) formats, kept in the enum so re-encryption attempts
/// can be recognized and rejected explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptedBinDataType {
    LegacyPlaceholder = 0,
    LegacyDeterministic = 1,
    LegacyRandom = 2,
    Placeholder = 3,
    InsertUpdatePayload = 4,
    FindEqualityPayload = 5,
    UnindexedEncryptedValue = 6,
    EqualityIndexedValue = 7,
    RangeIndexedValue = 9,
    FindRangePayload = 10,
}

impl EncryptedBinDataType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        use EncryptedBinDataType::*;
        Some(match byte {
            0 => LegacyPlaceholder,
            1 => LegacyDeterministic,
            2 => LegacyRandom,
            3 => Placeholder,
            4 => InsertUpdatePayload,
            5 => FindEqualityPayload,
            6 => UnindexedEncryptedValue,
            7 => EqualityIndexedValue,
            9 => RangeIndexedValue,
            10 => FindRangePayload,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Pre-queryable formats that must never be re-encrypted.
    pub fn is_legacy(self) -> bool {
        matches!(
            self,
            EncryptedBinDataType::LegacyPlaceholder
                | EncryptedBinDataType::LegacyDeterministic
                | EncryptedBinDataType::LegacyRandom
        )
    }

    /// Server-stored indexed value envelopes.
    pub fn is_indexed_value(self) -> bool {
        matches!(
            self,
            EncryptedBinDataType::EqualityIndexedValue | EncryptedBinDataType::RangeIndexedValue
        )
    }
}

/// Prepend the type byte to a serialized payload.
pub fn encode_blob(ty: EncryptedBinDataType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(ty.as_u8());
    out.extend_from_slice(payload);
    out
}

/// Split a blob into its type byte and payload, rejecting empty buffers and
/// unknown type bytes.
pub fn decode_blob(blob: &[u8]) -> Result<(EncryptedBinDataType, &[u8])> {
    let (&first, payload) = blob
        .split_first()
        .ok_or_else(|| Error::bad_value("encrypted blob is empty"))?;
    let ty = EncryptedBinDataType::from_u8(first)
        .ok_or_else(|| Error::bad_value(format!("unrecognized encrypted type byte {first:#04x}")))?;
    Ok((ty, payload))
}

fn put_uuid(buf: &mut Vec<u8>, id: Uuid) {
    buf.put_slice(id.as_bytes());
}

fn get_uuid(reader: &mut ByteReader<'_>) -> Result<Uuid> {
    Ok(Uuid::from_bytes(reader.get_array()?))
}

fn put_block(buf: &mut Vec<u8>, block: &PrfBlock) {
    buf.put_slice(block);
}

fn get_block(reader: &mut ByteReader<'_>) -> Result<PrfBlock> {
    reader.get_array()
}

fn put_sized(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn get_sized<'a>(reader: &mut ByteReader<'a>) -> Result<&'a [u8]> {
    let len = reader.get_u32_le()?;
    reader.take(len as usize)
}

fn put_value(buf: &mut Vec<u8>, value: &Value) {
    buf.put_u8(value.bson_type().as_u8());
    put_sized(buf, &value.element_bytes());
}

fn get_value(reader: &mut ByteReader<'_>) -> Result<Value> {
    let type_byte = reader.get_u8()?;
    let ty = BsonType::from_u8(type_byte)
        .ok_or_else(|| Error::bad_value(format!("unknown element type {type_byte:#04x}")))?;
    Value::from_element_bytes(ty, get_sized(reader)?)
}

fn put_optional_value(buf: &mut Vec<u8>, value: Option<&Value>) {
    match value {
        Some(v) => {
            buf.put_u8(1);
            put_value(buf, v);
        }
        None => buf.put_u8(0),
    }
}

fn get_optional_value(reader: &mut ByteReader<'_>) -> Result<Option<Value>> {
    match reader.get_u8()? {
        0 => Ok(None),
        1 => Ok(Some(get_value(reader)?)),
        other => Err(Error::bad_value(format!("invalid option flag {other}"))),
    }
}

/// Whether a placeholder requests an insert or a find payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaceholderType {
    Insert = 1,
    Find = 2,
}

/// The encryption algorithm a placeholder declares for its field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fle2Algorithm {
    Unindexed = 1,
    Equality = 2,
    Range = 3,
}

/// The comparison operator a range find payload was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RangeOperator {
    Gt = 1,
    Gte = 2,
    Lt = 3,
    Lte = 4,
}

impl RangeOperator {
    fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            1 => RangeOperator::Gt,
            2 => RangeOperator::Gte,
            3 => RangeOperator::Lt,
            4 => RangeOperator::Lte,
            other => return Err(Error::bad_value(format!("invalid range operator {other}"))),
        })
    }
}

/// The value slot of a range insert placeholder: the value itself plus the
/// optional index bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeInsertSpec {
    pub value: Value,
    pub min: Option<Value>,
    pub max: Option<Value>,
}

/// The value slot of a range find placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFindSpec {
    pub edges_info: EdgesInfo,
    pub payload_id: i32,
    pub first_operator: RangeOperator,
}

/// What a placeholder carries in its value slot, by algorithm and operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderValue {
    Scalar(Value),
    RangeInsert(RangeInsertSpec),
    RangeFind(RangeFindSpec),
}

/// The client-side pre-encryption marker. Carries everything the transform
/// needs: operation, algorithm, both key ids, the contention budget, the
/// range sparsity and the value (or range spec) to encrypt.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub placeholder_type: PlaceholderType,
    pub algorithm: Fle2Algorithm,
    pub index_key_id: Uuid,
    pub user_key_id: Uuid,
    pub max_contention: u64,
    pub sparsity: i64,
    pub value: PlaceholderValue,
}

impl Placeholder {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_u8(self.placeholder_type as u8);
        buf.put_u8(self.algorithm as u8);
        put_uuid(&mut buf, self.index_key_id);
        put_uuid(&mut buf, self.user_key_id);
        buf.put_u64_le(self.max_contention);
        buf.put_i64_le(self.sparsity);
        match &self.value {
            PlaceholderValue::Scalar(value) => put_value(&mut buf, value),
            PlaceholderValue::RangeInsert(spec) => {
                put_value(&mut buf, &spec.value);
                put_optional_value(&mut buf, spec.min.as_ref());
                put_optional_value(&mut buf, spec.max.as_ref());
            }
            PlaceholderValue::RangeFind(spec) => {
                let info = &spec.edges_info;
                put_value(&mut buf, &info.lower);
                buf.put_u8(info.lower_included as u8);
                put_value(&mut buf, &info.upper);
                buf.put_u8(info.upper_included as u8);
                put_value(&mut buf, &info.index_min);
                put_value(&mut buf, &info.index_max);
                buf.put_i32_le(spec.payload_id);
                buf.put_u8(spec.first_operator as u8);
            }
        }
        buf
    }

    /// The full blob: type byte plus serialized payload.
    pub fn to_blob(&self) -> Vec<u8> {
        encode_blob(EncryptedBinDataType::Placeholder, &self.serialize())
    }

    pub fn parse(payload: &[u8]) -> Result<Placeholder> {
        let mut reader = ByteReader::new(payload);
        let placeholder_type = match reader.get_u8()? {
            1 => PlaceholderType::Insert,
            2 => PlaceholderType::Find,
            other => {
                return Err(Error::bad_value(format!(
                    "invalid placeholder type {other}"
                )))
            }
        };
        let algorithm = match reader.get_u8()? {
            1 => Fle2Algorithm::Unindexed,
            2 => Fle2Algorithm::Equality,
            3 => Fle2Algorithm::Range,
            other => {
                return Err(Error::bad_value(format!(
                    "invalid placeholder algorithm {other}"
                )))
            }
        };
        let index_key_id = get_uuid(&mut reader)?;
        let user_key_id = get_uuid(&mut reader)?;
        let max_contention = reader.get_u64_le()?;
        let sparsity = reader.get_i64_le()?;

        let value = match (algorithm, placeholder_type) {
            (Fle2Algorithm::Range, PlaceholderType::Insert) => {
                PlaceholderValue::RangeInsert(RangeInsertSpec {
                    value: get_value(&mut reader)?,
                    min: get_optional_value(&mut reader)?,
                    max: get_optional_value(&mut reader)?,
                })
            }
            (Fle2Algorithm::Range, PlaceholderType::Find) => {
                let lower = get_value(&mut reader)?;
                let lower_included = reader.get_u8()? != 0;
                let upper = get_value(&mut reader)?;
                let upper_included = reader.get_u8()? != 0;
                let index_min = get_value(&mut reader)?;
                let index_max = get_value(&mut reader)?;
                let payload_id = reader.get_i32_le()?;
                let first_operator = RangeOperator::from_u8(reader.get_u8()?)?;
                PlaceholderValue::RangeFind(RangeFindSpec {
                    edges_info: EdgesInfo {
                        lower,
                        lower_included,
                        upper,
                        upper_included,
                        index_min,
                        index_max,
                    },
                    payload_id,
                    first_operator,
                })
            }
            _ => PlaceholderValue::Scalar(get_value(&mut reader)?),
        };
        reader.expect_done("placeholder")?;
        Ok(Placeholder {
            placeholder_type,
            algorithm,
            index_key_id,
            user_key_id,
            max_contention,
            sparsity,
            value,
        })
    }
}

/// ESC and ECC contention tokens, sealed under the ECOC token for the
/// compaction collection.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptedStateCollectionTokens {
    pub esc: EscDerivedFromDataAndContentionToken,
    pub ecc: EccDerivedFromDataAndContentionToken,
}

impl EncryptedStateCollectionTokens {
    pub fn serialize(&self, token: &EcocToken) -> Vec<u8> {
        let mut plain = Vec::with_capacity(64);
        plain.extend_from_slice(self.esc.as_bytes());
        plain.extend_from_slice(self.ecc.as_bytes());
        fle2_encrypt(token.as_bytes(), &plain)
    }

    pub fn decrypt_and_parse(token: &EcocToken, ciphertext: &[u8]) -> Result<Self> {
        let plain = fle2_decrypt(token.as_bytes(), ciphertext)?;
        if plain.len() != 64 {
            return Err(Error::IntegrityCheck(format!(
                "state collection tokens decrypt to {} bytes, expected 64",
                plain.len()
            )));
        }
        Ok(Self {
            esc: EscDerivedFromDataAndContentionToken::from_bytes(
                plain[..32].try_into().unwrap(),
            ),
            ecc: EccDerivedFromDataAndContentionToken::from_bytes(
                plain[32..].try_into().unwrap(),
            ),
        })
    }
}

/// One edge's worth of contention tokens inside a range insert payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTokenSet {
    pub edc: EdcDerivedFromDataAndContentionToken,
    pub esc: EscDerivedFromDataAndContentionToken,
    pub ecc: EccDerivedFromDataAndContentionToken,
    pub encrypted_tokens: Vec<u8>,
}

/// The client-to-server payload produced for every indexed insert or update.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertUpdatePayload {
    pub edc: EdcDerivedFromDataAndContentionToken,
    pub esc: EscDerivedFromDataAndContentionToken,
    pub ecc: EccDerivedFromDataAndContentionToken,
    pub encrypted_tokens: Vec<u8>,
    pub index_key_id: Uuid,
    pub bson_type: BsonType,
    pub value: Vec<u8>,
    pub server_encryption_token: ServerDataEncryptionLevel1Token,
    pub edge_token_sets: Option<Vec<EdgeTokenSet>>,
}

impl InsertUpdatePayload {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_block(&mut buf, self.edc.as_bytes());
        put_block(&mut buf, self.esc.as_bytes());
        put_block(&mut buf, self.ecc.as_bytes());
        put_sized(&mut buf, &self.encrypted_tokens);
        put_uuid(&mut buf, self.index_key_id);
        buf.put_u8(self.bson_type.as_u8());
        put_sized(&mut buf, &self.value);
        put_block(&mut buf, self.server_encryption_token.as_bytes());
        match &self.edge_token_sets {
            None => buf.put_u8(0),
            Some(edges) => {
                buf.put_u8(1);
                buf.put_u32_le(edges.len() as u32);
                for edge in edges {
                    put_block(&mut buf, edge.edc.as_bytes());
                    put_block(&mut buf, edge.esc.as_bytes());
                    put_block(&mut buf, edge.ecc.as_bytes());
                    put_sized(&mut buf, &edge.encrypted_tokens);
                }
            }
        }
        buf
    }

    pub fn to_blob(&self) -> Vec<u8> {
        encode_blob(EncryptedBinDataType::InsertUpdatePayload, &self.serialize())
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let edc = EdcDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?);
        let esc = EscDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?);
        let ecc = EccDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?);
        let encrypted_tokens = get_sized(&mut reader)?.to_vec();
        let index_key_id = get_uuid(&mut reader)?;
        let type_byte = reader.get_u8()?;
        let bson_type = BsonType::from_u8(type_byte)
            .ok_or_else(|| Error::bad_value(format!("unknown element type {type_byte:#04x}")))?;
        let value = get_sized(&mut reader)?.to_vec();
        let server_encryption_token =
            ServerDataEncryptionLevel1Token::from_bytes(get_block(&mut reader)?);
        let edge_token_sets = match reader.get_u8()? {
            0 => None,
            1 => {
                let count = reader.get_u32_le()?;
                let mut edges = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    edges.push(EdgeTokenSet {
                        edc: EdcDerivedFromDataAndContentionToken::from_bytes(get_block(
                            &mut reader,
                        )?),
                        esc: EscDerivedFromDataAndContentionToken::from_bytes(get_block(
                            &mut reader,
                        )?),
                        ecc: EccDerivedFromDataAndContentionToken::from_bytes(get_block(
                            &mut reader,
                        )?),
                        encrypted_tokens: get_sized(&mut reader)?.to_vec(),
                    });
                }
                Some(edges)
            }
            other => return Err(Error::bad_value(format!("invalid edge flag {other}"))),
        };
        reader.expect_done("insert-update payload")?;
        Ok(Self {
            edc,
            esc,
            ecc,
            encrypted_tokens,
            index_key_id,
            bson_type,
            value,
            server_encryption_token,
            edge_token_sets,
        })
    }
}

/// The client-to-server payload for an equality find.
#[derive(Debug, Clone, PartialEq)]
pub struct FindEqualityPayload {
    pub edc: EdcDerivedFromDataToken,
    pub esc: EscDerivedFromDataToken,
    pub ecc: EccDerivedFromDataToken,
    pub max_counter: u64,
    pub server_encryption_token: ServerDataEncryptionLevel1Token,
}

impl FindEqualityPayload {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_block(&mut buf, self.edc.as_bytes());
        put_block(&mut buf, self.esc.as_bytes());
        put_block(&mut buf, self.ecc.as_bytes());
        buf.put_u64_le(self.max_counter);
        put_block(&mut buf, self.server_encryption_token.as_bytes());
        buf
    }

    pub fn to_blob(&self) -> Vec<u8> {
        encode_blob(EncryptedBinDataType::FindEqualityPayload, &self.serialize())
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let out = Self {
            edc: EdcDerivedFromDataToken::from_bytes(get_block(&mut reader)?),
            esc: EscDerivedFromDataToken::from_bytes(get_block(&mut reader)?),
            ecc: EccDerivedFromDataToken::from_bytes(get_block(&mut reader)?),
            max_counter: reader.get_u64_le()?,
            server_encryption_token: ServerDataEncryptionLevel1Token::from_bytes(get_block(
                &mut reader,
            )?),
        };
        reader.expect_done("find equality payload")?;
        Ok(out)
    }
}

/// Per-edge derived tokens inside a range find payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeFindTokenSet {
    pub edc: EdcDerivedFromDataToken,
    pub esc: EscDerivedFromDataToken,
    pub ecc: EccDerivedFromDataToken,
}

/// The client-to-server payload for a range find: one token set per edge in
/// the minimal cover.
#[derive(Debug, Clone, PartialEq)]
pub struct FindRangePayload {
    pub edges: Vec<EdgeFindTokenSet>,
    pub max_counter: u64,
    pub server_encryption_token: ServerDataEncryptionLevel1Token,
    pub payload_id: i32,
    pub first_operator: RangeOperator,
}

impl FindRangePayload {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_i32_le(self.payload_id);
        buf.put_u8(self.first_operator as u8);
        buf.put_u64_le(self.max_counter);
        put_block(&mut buf, self.server_encryption_token.as_bytes());
        buf.put_u32_le(self.edges.len() as u32);
        for edge in &self.edges {
            put_block(&mut buf, edge.edc.as_bytes());
            put_block(&mut buf, edge.esc.as_bytes());
            put_block(&mut buf, edge.ecc.as_bytes());
        }
        buf
    }

    pub fn to_blob(&self) -> Vec<u8> {
        encode_blob(EncryptedBinDataType::FindRangePayload, &self.serialize())
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let payload_id = reader.get_i32_le()?;
        let first_operator = RangeOperator::from_u8(reader.get_u8()?)?;
        let max_counter = reader.get_u64_le()?;
        let server_encryption_token =
            ServerDataEncryptionLevel1Token::from_bytes(get_block(&mut reader)?);
        let count = reader.get_u32_le()?;
        let mut edges = Vec::with_capacity(count as usize);
        for _ in 0..count {
            edges.push(EdgeFindTokenSet {
                edc: EdcDerivedFromDataToken::from_bytes(get_block(&mut reader)?),
                esc: EscDerivedFromDataToken::from_bytes(get_block(&mut reader)?),
                ecc: EccDerivedFromDataToken::from_bytes(get_block(&mut reader)?),
            });
        }
        reader.expect_done("find range payload")?;
        Ok(Self {
            edges,
            max_counter,
            server_encryption_token,
            payload_id,
            first_operator,
        })
    }
}

/// The user-key envelope around an original value, stored inside indexed
/// payloads: `[user_key_id 16][AEAD(user key, AD = key id, [type][bytes])]`.
pub fn serialize_client_value(
    user_key: &UserKey,
    user_key_id: Uuid,
    bson_type: BsonType,
    element_bytes: &[u8],
) -> Vec<u8> {
    let mut plain = Vec::with_capacity(element_bytes.len() + 1);
    plain.push(bson_type.as_u8());
    plain.extend_from_slice(element_bytes);
    let mut out = Vec::new();
    out.extend_from_slice(user_key_id.as_bytes());
    out.extend_from_slice(&fle2_aead_encrypt(
        &user_key.0,
        user_key_id.as_bytes(),
        &plain,
    ));
    out
}

/// Invert [`serialize_client_value`], looking the user key up in the vault.
pub fn decrypt_client_value(
    vault: &dyn KeyVault,
    bytes: &[u8],
) -> Result<(BsonType, Vec<u8>)> {
    let mut reader = ByteReader::new(bytes);
    let user_key_id = get_uuid(&mut reader)?;
    let ciphertext = reader.take_rest();
    let key = vault.get_key(user_key_id)?;
    let plain = fle2_aead_decrypt(&key, user_key_id.as_bytes(), ciphertext)?;
    let mut reader = ByteReader::new(&plain);
    let type_byte = reader.get_u8()?;
    let ty = BsonType::from_u8(type_byte)
        .ok_or_else(|| Error::bad_value(format!("unknown element type {type_byte:#04x}")))?;
    Ok((ty, reader.take_rest().to_vec()))
}

/// An unindexed encrypted value. The whole blob is
/// `[0x06][user_key_id 16][original type 1][AEAD ciphertext]` with the
/// 18-byte header doubling as associated data.
pub struct Fle2UnindexedEncryptedValue;

impl Fle2UnindexedEncryptedValue {
    pub fn serialize(
        user_key: &UserKey,
        user_key_id: Uuid,
        bson_type: BsonType,
        element_bytes: &[u8],
    ) -> Vec<u8> {
        let mut blob = Vec::with_capacity(18 + element_bytes.len() + 48);
        blob.push(EncryptedBinDataType::UnindexedEncryptedValue.as_u8());
        blob.extend_from_slice(user_key_id.as_bytes());
        blob.push(bson_type.as_u8());
        let header = blob.clone();
        blob.extend_from_slice(&fle2_aead_encrypt(&user_key.0, &header, element_bytes));
        blob
    }

    /// Decrypt a full unindexed blob back to (original type, element bytes).
    pub fn deserialize(vault: &dyn KeyVault, blob: &[u8]) -> Result<(BsonType, Vec<u8>)> {
        let (ty, payload) = decode_blob(blob)?;
        if ty != EncryptedBinDataType::UnindexedEncryptedValue {
            return Err(Error::bad_value(format!(
                "expected an unindexed encrypted value, found {ty:?}"
            )));
        }
        let mut reader = ByteReader::new(payload);
        let user_key_id = get_uuid(&mut reader)?;
        let type_byte = reader.get_u8()?;
        let bson_type = BsonType::from_u8(type_byte)
            .ok_or_else(|| Error::bad_value(format!("unknown element type {type_byte:#04x}")))?;
        let ciphertext = reader.take_rest();

        let key = vault.get_key(user_key_id)?;
        let header = &blob[..18];
        let plain = fle2_aead_decrypt(&key, header, ciphertext)?;
        Ok((bson_type, plain))
    }
}

/// The server-stored envelope of one equality-indexed value.
///
/// Wire form (after the blob type byte):
/// `[index_key_id 16][original type 1][CTR(server token, inner)]` where inner
/// is `[LE64 len][client value][LE64 count][edc][esc][ecc]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fle2EqualityIndexedValue {
    pub index_key_id: Uuid,
    pub bson_type: BsonType,
    pub edc: EdcDerivedFromDataAndContentionToken,
    pub esc: EscDerivedFromDataAndContentionToken,
    pub ecc: EccDerivedFromDataAndContentionToken,
    pub count: u64,
    pub client_encrypted_value: Vec<u8>,
}

impl Fle2EqualityIndexedValue {
    /// Assemble from an insert payload once the server assigned the counter.
    pub fn from_payload(payload: &InsertUpdatePayload, count: u64) -> Result<Self> {
        if payload.edge_token_sets.is_some() {
            return Err(Error::bad_value(
                "insert payload with edges describes a range value",
            ));
        }
        Ok(Self {
            index_key_id: payload.index_key_id,
            bson_type: payload.bson_type,
            edc: payload.edc,
            esc: payload.esc,
            ecc: payload.ecc,
            count,
            client_encrypted_value: payload.value.clone(),
        })
    }

    pub fn serialize(&self, token: &ServerDataEncryptionLevel1Token) -> Vec<u8> {
        let mut inner = Vec::new();
        inner.put_u64_le(self.client_encrypted_value.len() as u64);
        inner.put_slice(&self.client_encrypted_value);
        inner.put_u64_le(self.count);
        put_block(&mut inner, self.edc.as_bytes());
        put_block(&mut inner, self.esc.as_bytes());
        put_block(&mut inner, self.ecc.as_bytes());

        let mut payload = Vec::new();
        put_uuid(&mut payload, self.index_key_id);
        payload.put_u8(self.bson_type.as_u8());
        payload.extend_from_slice(&fle2_encrypt(token.as_bytes(), &inner));
        payload
    }

    pub fn to_blob(&self, token: &ServerDataEncryptionLevel1Token) -> Vec<u8> {
        encode_blob(
            EncryptedBinDataType::EqualityIndexedValue,
            &self.serialize(token),
        )
    }

    /// The index key id, readable without decrypting.
    pub fn parse_key_id(payload: &[u8]) -> Result<Uuid> {
        get_uuid(&mut ByteReader::new(payload))
    }

    pub fn decrypt_and_parse(
        token: &ServerDataEncryptionLevel1Token,
        payload: &[u8],
    ) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let index_key_id = get_uuid(&mut reader)?;
        let type_byte = reader.get_u8()?;
        let bson_type = BsonType::from_u8(type_byte)
            .ok_or_else(|| Error::bad_value(format!("unknown element type {type_byte:#04x}")))?;
        let inner = fle2_decrypt(token.as_bytes(), reader.take_rest())?;

        let mut reader = ByteReader::new(&inner);
        let len = reader.get_u64_le()?;
        let client_encrypted_value = reader.take(len as usize)?.to_vec();
        let count = reader.get_u64_le()?;
        let edc = EdcDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?);
        let esc = EscDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?);
        let ecc = EccDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?);
        reader.expect_done("equality indexed value")?;
        Ok(Self {
            index_key_id,
            bson_type,
            edc,
            esc,
            ecc,
            count,
            client_encrypted_value,
        })
    }
}

/// The server-stored envelope of one range-indexed value: one token triple
/// and counter per edge, sharing a single encrypted original value.
///
/// Inner layout: `[LE64 edges][LE64 len][client value][edges × LE64 counter]
/// [edges × (edc || esc || ecc)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fle2RangeIndexedValue {
    pub index_key_id: Uuid,
    pub bson_type: BsonType,
    pub tokens: Vec<(
        EdcDerivedFromDataAndContentionToken,
        EscDerivedFromDataAndContentionToken,
        EccDerivedFromDataAndContentionToken,
    )>,
    pub counters: Vec<u64>,
    pub client_encrypted_value: Vec<u8>,
}

impl Fle2RangeIndexedValue {
    /// Assemble from an insert payload once the server assigned one counter
    /// per edge.
    pub fn from_payload(payload: &InsertUpdatePayload, counters: Vec<u64>) -> Result<Self> {
        let edges = payload
            .edge_token_sets
            .as_ref()
            .ok_or_else(|| Error::bad_value("insert payload has no edges"))?;
        if edges.len() != counters.len() {
            return Err(Error::bad_value(format!(
                "{} counters for {} edges",
                counters.len(),
                edges.len()
            )));
        }
        Ok(Self {
            index_key_id: payload.index_key_id,
            bson_type: payload.bson_type,
            tokens: edges.iter().map(|e| (e.edc, e.esc, e.ecc)).collect(),
            counters,
            client_encrypted_value: payload.value.clone(),
        })
    }

    pub fn serialize(&self, token: &ServerDataEncryptionLevel1Token) -> Vec<u8> {
        let mut inner = Vec::new();
        inner.put_u64_le(self.tokens.len() as u64);
        inner.put_u64_le(self.client_encrypted_value.len() as u64);
        inner.put_slice(&self.client_encrypted_value);
        for counter in &self.counters {
            inner.put_u64_le(*counter);
        }
        for (edc, esc, ecc) in &self.tokens {
            put_block(&mut inner, edc.as_bytes());
            put_block(&mut inner, esc.as_bytes());
            put_block(&mut inner, ecc.as_bytes());
        }

        let mut payload = Vec::new();
        put_uuid(&mut payload, self.index_key_id);
        payload.put_u8(self.bson_type.as_u8());
        payload.extend_from_slice(&fle2_encrypt(token.as_bytes(), &inner));
        payload
    }

    pub fn to_blob(&self, token: &ServerDataEncryptionLevel1Token) -> Vec<u8> {
        encode_blob(
            EncryptedBinDataType::RangeIndexedValue,
            &self.serialize(token),
        )
    }

    pub fn parse_key_id(payload: &[u8]) -> Result<Uuid> {
        get_uuid(&mut ByteReader::new(payload))
    }

    pub fn decrypt_and_parse(
        token: &ServerDataEncryptionLevel1Token,
        payload: &[u8],
    ) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let index_key_id = get_uuid(&mut reader)?;
        let type_byte = reader.get_u8()?;
        let bson_type = BsonType::from_u8(type_byte)
            .ok_or_else(|| Error::bad_value(format!("unknown element type {type_byte:#04x}")))?;
        let inner = fle2_decrypt(token.as_bytes(), reader.take_rest())?;

        let mut reader = ByteReader::new(&inner);
        let edge_count = reader.get_u64_le()? as usize;
        let len = reader.get_u64_le()?;
        let client_encrypted_value = reader.take(len as usize)?.to_vec();
        let mut counters = Vec::with_capacity(edge_count);
        for _ in 0..edge_count {
            counters.push(reader.get_u64_le()?);
        }
        let mut tokens = Vec::with_capacity(edge_count);
        for _ in 0..edge_count {
            tokens.push((
                EdcDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?),
                EscDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?),
                EccDerivedFromDataAndContentionToken::from_bytes(get_block(&mut reader)?),
            ));
        }
        reader.expect_done("range indexed value")?;
        Ok(Self {
            index_key_id,
            bson_type,
            tokens,
            counters,
            client_encrypted_value,
        })
    }
}

/// The seed bytes used to derive per-edge tokens: the UTF-8 bytes of the
/// edge bit-string (including the literal root edge).
pub fn edge_seed(edge: &str) -> &[u8] {
    debug_assert!(edge == ROOT_EDGE || edge.bytes().all(|b| b == b'0' || b == b'1'));
    edge.as_bytes()
}
