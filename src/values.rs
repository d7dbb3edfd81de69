// Document value model: a closed tree of typed leaf values plus the binary
// element codec the crypto layers operate on. Scalar encodings follow the
// standard document wire layout (little-endian integers, length-prefixed
// strings) so that externally pinned byte vectors reproduce exactly.

use std::fmt;

use bytes::BufMut;

use crate::codec::ByteReader;
use crate::decimal::Decimal128;
use crate::errors::{Error, Result};

/// Maximum allowed nesting depth when walking or decoding documents.
pub const MAX_DOCUMENT_DEPTH: usize = 200;

/// Binary subtype for generic payloads.
pub const BINARY_SUBTYPE_GENERAL: u8 = 0;

/// Binary subtype marking encrypted payloads and placeholders.
pub const BINARY_SUBTYPE_ENCRYPT: u8 = 6;

/// Type tags of the document value model, with their on-wire byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BsonType {
    Double = 0x01,
    String = 0x02,
    Object = 0x03,
    Array = 0x04,
    Binary = 0x05,
    Undefined = 0x06,
    ObjectId = 0x07,
    Bool = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    Regex = 0x0B,
    DbPointer = 0x0C,
    Code = 0x0D,
    Symbol = 0x0E,
    CodeWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    Decimal128 = 0x13,
    MaxKey = 0x7F,
    MinKey = 0xFF,
}

impl BsonType {
    pub fn from_u8(byte: u8) -> Option<BsonType> {
        use BsonType::*;
        Some(match byte {
            0x01 => Double,
            0x02 => String,
            0x03 => Object,
            0x04 => Array,
            0x05 => Binary,
            0x06 => Undefined,
            0x07 => ObjectId,
            0x08 => Bool,
            0x09 => DateTime,
            0x0A => Null,
            0x0B => Regex,
            0x0C => DbPointer,
            0x0D => Code,
            0x0E => Symbol,
            0x0F => CodeWithScope,
            0x10 => Int32,
            0x11 => Timestamp,
            0x12 => Int64,
            0x13 => Decimal128,
            0x7F => MaxKey,
            0xFF => MinKey,
            _ => return None,
        })
    }

    pub fn is_valid(byte: u8) -> bool {
        Self::from_u8(byte).is_some()
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Types that may be equality-indexed.
pub fn is_equality_indexable(ty: BsonType) -> bool {
    use BsonType::*;
    matches!(
        ty,
        String | Binary | ObjectId | Bool | DateTime | Regex | Int32 | Int64 | Timestamp | Code
    )
}

/// Types that may be stored as unindexed encrypted values.
pub fn is_unindexed_supported(ty: BsonType) -> bool {
    use BsonType::*;
    is_equality_indexable(ty)
        || matches!(
            ty,
            Double | Decimal128 | Object | Array | DbPointer | Symbol | CodeWithScope
        )
}

/// Types that may be range-indexed.
pub fn is_range_indexable(ty: BsonType) -> bool {
    use BsonType::*;
    matches!(ty, Int32 | Int64 | DateTime | Double | Decimal128)
}

/// A leaf or subtree of a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Object(Document),
    Array(Vec<Value>),
    Binary { subtype: u8, bytes: Vec<u8> },
    Undefined,
    ObjectId([u8; 12]),
    Bool(bool),
    DateTime(i64),
    Null,
    Regex { pattern: String, options: String },
    DbPointer { namespace: String, id: [u8; 12] },
    Code(String),
    Symbol(String),
    CodeWithScope { code: String, scope: Document },
    Int32(i32),
    Timestamp(u64),
    Int64(i64),
    Decimal128(Decimal128),
    MinKey,
    MaxKey,
}

impl Value {
    pub fn bson_type(&self) -> BsonType {
        match self {
            Value::Double(_) => BsonType::Double,
            Value::String(_) => BsonType::String,
            Value::Object(_) => BsonType::Object,
            Value::Array(_) => BsonType::Array,
            Value::Binary { .. } => BsonType::Binary,
            Value::Undefined => BsonType::Undefined,
            Value::ObjectId(_) => BsonType::ObjectId,
            Value::Bool(_) => BsonType::Bool,
            Value::DateTime(_) => BsonType::DateTime,
            Value::Null => BsonType::Null,
            Value::Regex { .. } => BsonType::Regex,
            Value::DbPointer { .. } => BsonType::DbPointer,
            Value::Code(_) => BsonType::Code,
            Value::Symbol(_) => BsonType::Symbol,
            Value::CodeWithScope { .. } => BsonType::CodeWithScope,
            Value::Int32(_) => BsonType::Int32,
            Value::Timestamp(_) => BsonType::Timestamp,
            Value::Int64(_) => BsonType::Int64,
            Value::Decimal128(_) => BsonType::Decimal128,
            Value::MinKey => BsonType::MinKey,
            Value::MaxKey => BsonType::MaxKey,
        }
    }

    /// A general-subtype binary value.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Binary {
            subtype: BINARY_SUBTYPE_GENERAL,
            bytes: bytes.into(),
        }
    }

    /// An encrypt-subtype binary value (placeholder or encrypted payload).
    pub fn encrypted(bytes: impl Into<Vec<u8>>) -> Value {
        Value::Binary {
            subtype: BINARY_SUBTYPE_ENCRYPT,
            bytes: bytes.into(),
        }
    }

    /// True for binary values carrying the encrypt subtype.
    pub fn is_encrypted_binary(&self) -> bool {
        matches!(
            self,
            Value::Binary {
                subtype: BINARY_SUBTYPE_ENCRYPT,
                ..
            }
        )
    }

    /// The raw element encoding of this value (without type tag or name).
    pub fn element_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Double(d) => buf.put_f64_le(*d),
            Value::String(s) | Value::Code(s) | Value::Symbol(s) => put_string(buf, s),
            Value::Object(doc) => doc.encode_into(buf),
            Value::Array(items) => encode_array(items, buf),
            Value::Binary { subtype, bytes } => {
                buf.put_i32_le(bytes.len() as i32);
                buf.put_u8(*subtype);
                buf.put_slice(bytes);
            }
            Value::Undefined | Value::Null | Value::MinKey | Value::MaxKey => {}
            Value::ObjectId(oid) => buf.put_slice(oid),
            Value::Bool(b) => buf.put_u8(*b as u8),
            Value::DateTime(ms) => buf.put_i64_le(*ms),
            Value::Regex { pattern, options } => {
                put_cstring(buf, pattern);
                put_cstring(buf, options);
            }
            Value::DbPointer { namespace, id } => {
                put_string(buf, namespace);
                buf.put_slice(id);
            }
            Value::CodeWithScope { code, scope } => {
                let mut inner = Vec::new();
                put_string(&mut inner, code);
                scope.encode_into(&mut inner);
                buf.put_i32_le(inner.len() as i32 + 4);
                buf.put_slice(&inner);
            }
            Value::Int32(i) => buf.put_i32_le(*i),
            Value::Timestamp(ts) => buf.put_u64_le(*ts),
            Value::Int64(i) => buf.put_i64_le(*i),
            Value::Decimal128(dec) => buf.put_slice(&dec.to_bytes()),
        }
    }

    /// Decode a value of the given type from exactly `bytes`.
    pub fn from_element_bytes(ty: BsonType, bytes: &[u8]) -> Result<Value> {
        let mut reader = ByteReader::new(bytes);
        let value = decode_value(ty, &mut reader, 0)?;
        reader.expect_done("element value")?;
        Ok(value)
    }
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.put_i32_le(s.len() as i32 + 1);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn put_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn get_string(reader: &mut ByteReader<'_>) -> Result<String> {
    let len = reader.get_i32_le()?;
    if len < 1 {
        return Err(Error::bad_value(format!("invalid string length {len}")));
    }
    let raw = reader.take(len as usize)?;
    let (body, nul) = raw.split_at(raw.len() - 1);
    if nul != [0] {
        return Err(Error::bad_value("string missing NUL terminator"));
    }
    String::from_utf8(body.to_vec()).map_err(|_| Error::bad_value("string is not valid UTF-8"))
}

fn encode_array(items: &[Value], buf: &mut Vec<u8>) {
    let doc = Document::from_pairs(
        items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone())),
    );
    doc.encode_into(buf);
}

fn decode_value(ty: BsonType, reader: &mut ByteReader<'_>, depth: usize) -> Result<Value> {
    if depth > MAX_DOCUMENT_DEPTH {
        return Err(Error::bad_value("document nesting exceeds maximum depth"));
    }
    Ok(match ty {
        BsonType::Double => Value::Double(reader.get_f64_le()?),
        BsonType::String => Value::String(get_string(reader)?),
        BsonType::Object => Value::Object(decode_document(reader, depth + 1)?),
        BsonType::Array => {
            let doc = decode_document(reader, depth + 1)?;
            Value::Array(doc.into_pairs().into_iter().map(|(_, v)| v).collect())
        }
        BsonType::Binary => {
            let len = reader.get_i32_le()?;
            if len < 0 {
                return Err(Error::bad_value(format!("invalid binary length {len}")));
            }
            let subtype = reader.get_u8()?;
            Value::Binary {
                subtype,
                bytes: reader.take(len as usize)?.to_vec(),
            }
        }
        BsonType::Undefined => Value::Undefined,
        BsonType::ObjectId => Value::ObjectId(reader.get_array()?),
        BsonType::Bool => Value::Bool(reader.get_u8()? != 0),
        BsonType::DateTime => Value::DateTime(reader.get_i64_le()?),
        BsonType::Null => Value::Null,
        BsonType::Regex => Value::Regex {
            pattern: reader.get_cstring()?.to_string(),
            options: reader.get_cstring()?.to_string(),
        },
        BsonType::DbPointer => Value::DbPointer {
            namespace: get_string(reader)?,
            id: reader.get_array()?,
        },
        BsonType::Code => Value::Code(get_string(reader)?),
        BsonType::Symbol => Value::Symbol(get_string(reader)?),
        BsonType::CodeWithScope => {
            let total = reader.get_i32_le()?;
            if total < 4 {
                return Err(Error::bad_value("invalid code-with-scope length"));
            }
            let mut inner = ByteReader::new(reader.take(total as usize - 4)?);
            let code = get_string(&mut inner)?;
            let scope = decode_document(&mut inner, depth + 1)?;
            inner.expect_done("code-with-scope")?;
            Value::CodeWithScope { code, scope }
        }
        BsonType::Int32 => Value::Int32(reader.get_i32_le()?),
        BsonType::Timestamp => Value::Timestamp(reader.get_u64_le()?),
        BsonType::Int64 => Value::Int64(reader.get_i64_le()?),
        BsonType::Decimal128 => Value::Decimal128(Decimal128::from_bytes(reader.get_array()?)),
        BsonType::MinKey => Value::MinKey,
        BsonType::MaxKey => Value::MaxKey,
    })
}

fn decode_document(reader: &mut ByteReader<'_>, depth: usize) -> Result<Document> {
    if depth > MAX_DOCUMENT_DEPTH {
        return Err(Error::bad_value("document nesting exceeds maximum depth"));
    }
    let total = reader.get_i32_le()?;
    if total < 5 {
        return Err(Error::bad_value(format!("invalid document length {total}")));
    }
    let mut body = ByteReader::new(reader.take(total as usize - 4)?);
    let mut doc = Document::new();
    loop {
        let type_byte = body.get_u8()?;
        if type_byte == 0 {
            body.expect_done("document")?;
            break;
        }
        let ty = BsonType::from_u8(type_byte)
            .ok_or_else(|| Error::bad_value(format!("unknown element type 0x{type_byte:02x}")))?;
        let name = body.get_cstring()?.to_string();
        let value = decode_value(ty, &mut body, depth)?;
        doc.push(name, value);
    }
    Ok(doc)
}

/// An ordered document: a sequence of named values.
///
/// Field order is significant and preserved; lookups scan in order and return
/// the first match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            fields: pairs.into_iter().collect(),
        }
    }

    pub fn into_pairs(self) -> Vec<(String, Value)> {
        self.fields
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encode into the standard document wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut body = Vec::new();
        for (name, value) in &self.fields {
            body.put_u8(value.bson_type().as_u8());
            put_cstring(&mut body, name);
            value.encode_into(&mut body);
        }
        buf.put_i32_le(body.len() as i32 + 5);
        buf.put_slice(&body);
        buf.put_u8(0);
    }

    /// Decode from the standard document wire layout, consuming all bytes.
    pub fn decode(bytes: &[u8]) -> Result<Document> {
        let mut reader = ByteReader::new(bytes);
        let doc = decode_document(&mut reader, 0)?;
        reader.expect_done("document")?;
        Ok(doc)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value:?}")?;
        }
        write!(f, "}}")
    }
}
