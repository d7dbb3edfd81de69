// End-to-end round trips through the full encrypt/decrypt pipeline:
// placeholder transform, server payload extraction, finalization, then
// client-side decryption, for every allowed type and algorithm.

mod common;

use common::*;
use fieldcrypt::payloads::{EncryptedBinDataType, RangeOperator};
use pretty_assertions::assert_eq;
use fieldcrypt::range::EdgesInfo;
use fieldcrypt::values::{Document, Value};
use fieldcrypt::{
    decode_blob, decrypt_document, init_logging, Fle2Algorithm, PlaceholderBuilder,
    SAFE_CONTENT_FIELD,
};

fn placeholder_blob(value: &Value, algorithm: Fle2Algorithm, find: bool) -> Vec<u8> {
    let builder = if find {
        PlaceholderBuilder::find(index_key_id(), user_key_id())
    } else {
        PlaceholderBuilder::insert(index_key_id(), user_key_id())
    };
    let builder = match algorithm {
        Fle2Algorithm::Equality => builder.equality(value.clone()),
        Fle2Algorithm::Unindexed => builder.unindexed(value.clone()),
        Fle2Algorithm::Range => builder.range_insert(value.clone(), None, None),
    };
    builder.build().unwrap().to_blob()
}

fn input_doc(value: &Value, algorithm: Fle2Algorithm, find: bool) -> Document {
    let mut doc = Document::new();
    doc.push("plainText", Value::String("sample".into()));
    doc.push(
        "encrypted",
        Value::encrypted(placeholder_blob(value, algorithm, find)),
    );
    doc
}

fn expected_payload_type(algorithm: Fle2Algorithm, find: bool) -> EncryptedBinDataType {
    match (algorithm, find) {
        (Fle2Algorithm::Equality, false) => EncryptedBinDataType::EqualityIndexedValue,
        (Fle2Algorithm::Equality, true) => EncryptedBinDataType::FindEqualityPayload,
        (Fle2Algorithm::Unindexed, false) => EncryptedBinDataType::UnindexedEncryptedValue,
        (Fle2Algorithm::Range, false) => EncryptedBinDataType::RangeIndexedValue,
        (Fle2Algorithm::Range, true) => EncryptedBinDataType::FindRangePayload,
        (Fle2Algorithm::Unindexed, true) => unreachable!("unindexed fields are not queryable"),
    }
}

fn round_trip(value: Value, algorithm: Fle2Algorithm, find: bool) {
    init_logging().unwrap();
    let vault = TestKeyVault;
    let doc = input_doc(&value, algorithm, find);

    let final_doc = encrypt_document(&doc, &vault, None).unwrap();
    assert_eq!(
        final_doc.get("plainText"),
        Some(&Value::String("sample".into()))
    );
    let Some(Value::Binary { bytes, .. }) = final_doc.get("encrypted") else {
        panic!("encrypted field is not binary");
    };
    let (ty, _) = decode_blob(bytes).unwrap();
    assert_eq!(ty, expected_payload_type(algorithm, find));
    assert!(matches!(
        final_doc.get(SAFE_CONTENT_FIELD),
        Some(Value::Array(_))
    ));

    if !find {
        let mut decrypted = decrypt_document(&final_doc, &vault).unwrap();
        decrypted.remove(SAFE_CONTENT_FIELD);
        let mut expected = Document::new();
        expected.push("plainText", Value::String("sample".into()));
        expected.push("encrypted", value);
        assert_eq!(decrypted, expected);
    }
}

fn universally_allowed_values() -> Vec<Value> {
    vec![
        Value::String("value123".into()),
        Value::binary(vec![0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19]),
        Value::ObjectId([0x42; 12]),
        Value::Bool(false),
        Value::Bool(true),
        Value::DateTime(0),
        Value::Regex {
            pattern: "value1".into(),
            options: "value2".into(),
        },
        Value::Int32(123456),
        Value::Timestamp(0),
        Value::Int64(12345678901234567),
        Value::Code("value".into()),
    ]
}

fn unindexed_only_values() -> Vec<Value> {
    let mut nested = Document::new();
    nested.push("nested", Value::String("value".into()));
    let mut scope = Document::new();
    scope.push("code", Value::String("something".into()));
    vec![
        Value::Double(123.456),
        Value::Decimal128("0".parse().unwrap()),
        Value::Object(nested),
        Value::Array(vec![Value::Int32(1), Value::Int32(23)]),
        Value::DbPointer {
            namespace: "value1".into(),
            id: [0; 12],
        },
        Value::Symbol("value".into()),
        Value::CodeWithScope {
            code: "value".into(),
            scope,
        },
    ]
}

#[test]
fn equality_round_trips_all_allowed_types() {
    for value in universally_allowed_values() {
        round_trip(value.clone(), Fle2Algorithm::Equality, false);
        round_trip(value, Fle2Algorithm::Equality, true);
    }
}

#[test]
fn unindexed_round_trips_all_allowed_types() {
    for value in universally_allowed_values()
        .into_iter()
        .chain(unindexed_only_values())
    {
        round_trip(value, Fle2Algorithm::Unindexed, false);
    }
}

#[test]
fn range_round_trips_numeric_types() {
    for value in [
        Value::Double(123.456),
        Value::Decimal128("0".parse().unwrap()),
        Value::Int32(123456),
        Value::Int64(12345678901234567),
        Value::DateTime(12345),
    ] {
        round_trip(value, Fle2Algorithm::Range, false);
    }
}

#[test]
fn range_find_produces_find_payload() {
    init_logging().unwrap();
    let vault = TestKeyVault;
    let info = EdgesInfo {
        lower: Value::Int32(7),
        lower_included: true,
        upper: Value::Int32(32),
        upper_included: true,
        index_min: Value::Int32(0),
        index_max: Value::Int32(32),
    };
    let placeholder = PlaceholderBuilder::find(index_key_id(), user_key_id())
        .range_find(info, 1234, RangeOperator::Gt)
        .build()
        .unwrap();
    let mut doc = Document::new();
    doc.push("encrypted", Value::encrypted(placeholder.to_blob()));

    let final_doc = encrypt_document(&doc, &vault, None).unwrap();
    let Some(Value::Binary { bytes, .. }) = final_doc.get("encrypted") else {
        panic!("encrypted field is not binary");
    };
    let (ty, payload) = decode_blob(bytes).unwrap();
    assert_eq!(ty, EncryptedBinDataType::FindRangePayload);

    // [7, 32] over [0, 32] covers with four edges.
    let parsed = fieldcrypt::payloads::FindRangePayload::parse(payload).unwrap();
    assert_eq!(parsed.edges.len(), 4);
    assert_eq!(parsed.payload_id, 1234);
}

#[test]
fn round_trip_with_contention() {
    round_trip(Value::Int32(1), Fle2Algorithm::Equality, false);
    // High contention budget still decrypts to the same value.
    init_logging().unwrap();
    let vault = TestKeyVault;
    let placeholder = PlaceholderBuilder::insert(index_key_id(), user_key_id())
        .equality(Value::String("123456".into()))
        .contention(50)
        .build()
        .unwrap();
    let mut doc = Document::new();
    doc.push("encrypted", Value::encrypted(placeholder.to_blob()));
    let final_doc = encrypt_document(&doc, &vault, None).unwrap();
    let decrypted = decrypt_document(&final_doc, &vault).unwrap();
    assert_eq!(
        decrypted.get("encrypted"),
        Some(&Value::String("123456".into()))
    );
}

#[test]
fn multiple_fields_round_trip() {
    init_logging().unwrap();
    let vault = TestKeyVault;

    let inner = PlaceholderBuilder::insert(index_key2_id(), user_key_id())
        .equality(Value::String("top secret".into()))
        .build()
        .unwrap();
    let mut nested = Document::new();
    nested.push("encrypted", Value::encrypted(inner.to_blob()));

    let outer = PlaceholderBuilder::insert(index_key_id(), user_key_id())
        .equality(Value::String("secret".into()))
        .build()
        .unwrap();
    let mut doc = Document::new();
    doc.push("plainText", Value::String("sample".into()));
    doc.push("encrypted", Value::encrypted(outer.to_blob()));
    doc.push("nested", Value::Object(nested));

    let final_doc = encrypt_document(&doc, &vault, None).unwrap();
    let Some(Value::Array(tags)) = final_doc.get(SAFE_CONTENT_FIELD) else {
        panic!("tag array missing");
    };
    assert_eq!(tags.len(), 2);

    let decrypted = decrypt_document(&final_doc, &vault).unwrap();
    assert_eq!(
        decrypted.get("encrypted"),
        Some(&Value::String("secret".into()))
    );
    let Some(Value::Object(nested)) = decrypted.get("nested") else {
        panic!("nested subdocument missing");
    };
    assert_eq!(
        nested.get("encrypted"),
        Some(&Value::String("top secret".into()))
    );
}

#[test]
fn existing_safe_content_array_is_extended() {
    init_logging().unwrap();
    let vault = TestKeyVault;
    let placeholder = PlaceholderBuilder::insert(index_key_id(), user_key_id())
        .equality(Value::String("123456".into()))
        .build()
        .unwrap();
    let mut doc = Document::new();
    doc.push(
        SAFE_CONTENT_FIELD,
        Value::Array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(4)]),
    );
    doc.push("encrypted", Value::encrypted(placeholder.to_blob()));

    let final_doc = encrypt_document(&doc, &vault, None).unwrap();
    let Some(Value::Array(tags)) = final_doc.get(SAFE_CONTENT_FIELD) else {
        panic!("tag array missing");
    };
    assert_eq!(tags.len(), 4);
    assert_eq!(tags[0], Value::Int32(1));
    assert_eq!(tags[1], Value::Int32(2));
    assert_eq!(tags[2], Value::Int32(4));
    assert!(matches!(tags[3], Value::Binary { .. }));
}

#[test]
fn incompatible_safe_content_is_rejected() {
    init_logging().unwrap();
    let vault = TestKeyVault;
    let placeholder = PlaceholderBuilder::insert(index_key_id(), user_key_id())
        .equality(Value::String("123456".into()))
        .build()
        .unwrap();
    let mut doc = Document::new();
    doc.push(SAFE_CONTENT_FIELD, Value::Int32(123456));
    doc.push("encrypted", Value::encrypted(placeholder.to_blob()));

    let err = encrypt_document(&doc, &vault, None).unwrap_err();
    assert_eq!(err.code(), 6373510);
}

#[test]
fn duplicate_index_keys_are_rejected() {
    init_logging().unwrap();
    let vault = TestKeyVault;
    let placeholder = PlaceholderBuilder::insert(index_key_id(), user_key_id())
        .equality(Value::String("123456".into()))
        .build()
        .unwrap();
    let blob = placeholder.to_blob();

    let mut nested = Document::new();
    nested.push("encrypted", Value::encrypted(blob.clone()));
    let mut doc = Document::new();
    doc.push("encrypted", Value::encrypted(blob));
    doc.push("nested", Value::Object(nested));

    let err = encrypt_document(&doc, &vault, None).unwrap_err();
    assert_eq!(err.code(), 6371407);
}

fn expect_transform_failure(value: Value, algorithm: Fle2Algorithm, code: u32) {
    let vault = TestKeyVault;
    let doc = input_doc(&value, algorithm, false);
    let err = fieldcrypt::transform_placeholders(&doc, &vault).unwrap_err();
    assert_eq!(err.code(), code, "value {value:?} via {algorithm:?}");
}

#[test]
fn equality_rejects_disallowed_types() {
    init_logging().unwrap();
    for value in [
        Value::Double(123.456),
        Value::Decimal128("0".parse().unwrap()),
        Value::MinKey,
        Value::Object(Document::new()),
        Value::Array(vec![Value::Int32(1)]),
        Value::Undefined,
        Value::Null,
        Value::CodeWithScope {
            code: "value".into(),
            scope: Document::new(),
        },
        Value::MaxKey,
    ] {
        expect_transform_failure(value, Fle2Algorithm::Equality, 6338602);
    }
}

#[test]
fn unindexed_rejects_disallowed_types() {
    init_logging().unwrap();
    for value in [Value::Undefined, Value::Null, Value::MaxKey] {
        expect_transform_failure(value, Fle2Algorithm::Unindexed, 6379102);
    }
}

#[test]
fn range_rejects_disallowed_types() {
    init_logging().unwrap();
    for value in [
        Value::String("value123".into()),
        Value::binary(vec![1, 2, 3]),
        Value::ObjectId([0; 12]),
        Value::Bool(true),
        Value::Regex {
            pattern: "value1".into(),
            options: "value2".into(),
        },
        Value::Timestamp(0),
        Value::Code("value".into()),
        Value::Object(Document::new()),
        Value::Array(vec![]),
        Value::Symbol("value".into()),
        Value::MinKey,
        Value::MaxKey,
    ] {
        expect_transform_failure(value, Fle2Algorithm::Range, 14);
    }
    expect_transform_failure(Value::Null, Fle2Algorithm::Range, 40414);
    expect_transform_failure(Value::Undefined, Fle2Algorithm::Range, 40414);
}

#[test]
fn already_encrypted_data_is_rejected() {
    init_logging().unwrap();
    let vectors = [
        "07b347ede7329f41729dd4004b9d950ff102de64b1925159d2100d58c8d1d0a7",
        "07",
        "00",
        "676172626167650a",
        "07676172626167650a",
        "06676172626167650a",
    ];
    for hex_str in vectors {
        let inner = Value::encrypted(hex::decode(hex_str).unwrap());
        expect_transform_failure(inner, Fle2Algorithm::Equality, 6409401);
    }
}

#[test]
fn non_placeholder_blob_in_document_is_rejected() {
    init_logging().unwrap();
    let vault = TestKeyVault;
    // A bare already-encrypted blob (no placeholder wrapper) in the tree.
    let mut doc = Document::new();
    doc.push("a", Value::encrypted(hex::decode("07676172626167650a").unwrap()));
    let err = fieldcrypt::transform_placeholders(&doc, &vault).unwrap_err();
    assert_eq!(err.code(), 6409401);

    // Legacy formats carry their own rejection code.
    let mut doc = Document::new();
    doc.push("a", Value::encrypted(hex::decode("00676172626167650a").unwrap()));
    let err = fieldcrypt::transform_placeholders(&doc, &vault).unwrap_err();
    assert_eq!(err.code(), 6409402);
}

#[test]
fn schema_mismatch_is_rejected() {
    init_logging().unwrap();
    let vault = TestKeyVault;
    let efc = test_encrypted_field_config();
    let placeholder = PlaceholderBuilder::insert(index_key_id(), user_key_id())
        .equality(Value::String("not really a secret".into()))
        .build()
        .unwrap();
    let mut doc = Document::new();
    doc.push("plainText", Value::String("sample".into()));
    doc.push("not-encrypted", Value::encrypted(placeholder.to_blob()));

    let err = encrypt_document(&doc, &vault, Some(&efc)).unwrap_err();
    assert_eq!(err.code(), 6373601);
}

#[test]
fn indexed_fields_are_discoverable_after_encryption() {
    init_logging().unwrap();
    let vault = TestKeyVault;

    let mut doc = Document::new();
    doc.push(
        SAFE_CONTENT_FIELD,
        Value::Array(vec![Value::Int32(1), Value::Int32(2), Value::Int32(4)]),
    );
    doc.push(
        "encrypted",
        Value::encrypted(
            PlaceholderBuilder::insert(index_key_id(), user_key_id())
                .equality(Value::String("123456".into()))
                .build()
                .unwrap()
                .to_blob(),
        ),
    );
    let mut nested2 = Document::new();
    nested2.push(
        "encrypted",
        Value::encrypted(
            PlaceholderBuilder::insert(index_key3_id(), user_key_id())
                .equality(Value::String("123456".into()))
                .build()
                .unwrap()
                .to_blob(),
        ),
    );
    let mut nested = Document::new();
    nested.push(
        "encrypted",
        Value::encrypted(
            PlaceholderBuilder::insert(index_key2_id(), user_key_id())
                .equality(Value::String("123456".into()))
                .build()
                .unwrap()
                .to_blob(),
        ),
    );
    nested.push("nested2", Value::Object(nested2));
    doc.push("nested", Value::Object(nested));

    // Placeholders are not yet indexed fields.
    assert!(fieldcrypt::get_encrypted_indexed_fields(&doc)
        .unwrap()
        .is_empty());

    let final_doc = encrypt_document(&doc, &vault, None).unwrap();
    let indexed = fieldcrypt::get_encrypted_indexed_fields(&final_doc).unwrap();
    assert_eq!(indexed.len(), 3);
    let paths: Vec<_> = indexed.iter().map(|f| f.field_path_name.as_str()).collect();
    assert!(paths.contains(&"encrypted"));
    assert!(paths.contains(&"nested.encrypted"));
    assert!(paths.contains(&"nested.nested2.encrypted"));
}
