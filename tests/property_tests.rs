// Property tests: the emulated binary search against lying counts, interval
// merge idempotence, min-cover exactness and value round-trips.

mod common;

use common::*;
use fieldcrypt::state_collections::esc;
use fieldcrypt::state_collections::ecc::{EccDocument, EccValueType};
use fieldcrypt::tokens::*;
use fieldcrypt::types::IndexKey;
use fieldcrypt::values::Value;
use fieldcrypt::Fle2Algorithm;
use proptest::prelude::*;

fn esc_tokens(value: &[u8]) -> (EscTwiceDerivedTagToken, EscTwiceDerivedValueToken) {
    let index_key = IndexKey(index_key_material());
    let c1 = generate_collections_level1_token(&index_key);
    let esc_token = generate_esc_token(&c1);
    let data = generate_esc_derived_from_data_token(&esc_token, value);
    let bucket = generate_esc_derived_from_data_and_contention_token(&data, 0);
    (
        generate_esc_twice_derived_tag_token(&bucket),
        generate_esc_twice_derived_value_token(&bucket),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // The search returns the highest inserted position no matter what the
    // collection claims its size is.
    #[test]
    fn emu_binary_ignores_reported_count(
        inserts in 0usize..60,
        fake_count in prop_oneof![Just(0u64), 0u64..1000, Just(u64::MAX / 4)],
    ) {
        let (tag, value) = esc_tokens(b"prop value");
        let mut coll = TestDocumentCollection::new();
        for position in 0..inserts as u64 {
            coll.insert(esc::generate_insert_document(&tag, &value, position, position));
        }
        coll.set_override_count(fake_count);

        let expected = (inserts > 0).then(|| inserts as u64 - 1);
        prop_assert_eq!(esc::emu_binary(&coll, &tag, &value).unwrap(), expected);
    }

    #[test]
    fn merge_is_idempotent_and_covers_input(
        pairs in prop::collection::vec((0u64..500, 0u64..50), 0..12),
    ) {
        let docs: Vec<EccDocument> = pairs
            .iter()
            .map(|&(start, span)| EccDocument {
                value_type: EccValueType::Normal,
                start,
                end: start + span,
            })
            .collect();
        let merged = fieldcrypt::merge_ecc_documents(docs.clone());
        let merged_twice = fieldcrypt::merge_ecc_documents(merged.clone());
        prop_assert_eq!(&merged, &merged_twice);

        // Merged intervals are sorted, disjoint and non-adjacent.
        for pair in merged.windows(2) {
            prop_assert!(pair[0].end + 1 < pair[1].start);
        }
        // Every input counter stays covered.
        for doc in &docs {
            prop_assert!(merged
                .iter()
                .any(|m| m.start <= doc.start && doc.end <= m.end));
        }
    }

    // The cover describes exactly the requested interval: the covered blocks
    // are disjoint and their union is the normalized [lower, upper].
    #[test]
    fn min_cover_is_exact(
        bounds in (0i32..1000, 0i32..1000),
        sparsity in 1i64..4,
    ) {
        let (a, b) = bounds;
        let (lower, upper) = if a <= b { (a, b) } else { (b, a) };
        let cover =
            fieldcrypt::min_cover_i32(lower, true, upper, true, Some(0), Some(1000), sparsity)
                .unwrap();

        let width = 10u32; // 1000 < 2^10
        let mut blocks: Vec<(u64, u64)> = cover
            .iter()
            .map(|edge| {
                prop_assert!(edge != "root");
                let depth = edge.len() as u32;
                let prefix = u64::from_str_radix(edge, 2).unwrap();
                let span = width - depth;
                Ok((prefix << span, (prefix << span) + (1 << span) - 1))
            })
            .collect::<Result<_, _>>()?;
        blocks.sort_unstable();
        prop_assert_eq!(blocks.first().map(|b| b.0), Some(lower as u64));
        prop_assert_eq!(blocks.last().map(|b| b.1), Some(upper as u64));
        for pair in blocks.windows(2) {
            prop_assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }

    #[test]
    fn scalar_values_round_trip(text in ".{0,40}", number in any::<i64>()) {
        let vault = TestKeyVault;
        for value in [Value::String(text.clone()), Value::Int64(number)] {
            let placeholder =
                fieldcrypt::PlaceholderBuilder::insert(index_key_id(), user_key_id())
                    .equality(value.clone())
                    .build()
                    .unwrap();
            let mut doc = fieldcrypt::Document::new();
            doc.push("encrypted", Value::encrypted(placeholder.to_blob()));
            let final_doc = encrypt_document(&doc, &vault, None).unwrap();
            let decrypted = fieldcrypt::decrypt_document(&final_doc, &vault).unwrap();
            prop_assert_eq!(decrypted.get("encrypted"), Some(&value));
        }
    }

    #[test]
    fn unindexed_values_round_trip(number in any::<f64>().prop_filter("finite", |f| f.is_finite())) {
        let vault = TestKeyVault;
        let value = Value::Double(number);
        let placeholder = fieldcrypt::PlaceholderBuilder::insert(index_key_id(), user_key_id())
            .unindexed(value.clone())
            .build()
            .unwrap();
        let mut doc = fieldcrypt::Document::new();
        doc.push("encrypted", Value::encrypted(placeholder.to_blob()));
        let final_doc = encrypt_document(&doc, &vault, None).unwrap();
        let decrypted = fieldcrypt::decrypt_document(&final_doc, &vault).unwrap();
        prop_assert_eq!(decrypted.get("encrypted"), Some(&value));
    }

    #[test]
    fn range_inserts_round_trip(number in -1000i32..1000) {
        let vault = TestKeyVault;
        let value = Value::Int32(number);
        let placeholder = fieldcrypt::PlaceholderBuilder::insert(index_key_id(), user_key_id())
            .range_insert(
                value.clone(),
                Some(Value::Int32(-1000)),
                Some(Value::Int32(1000)),
            )
            .sparsity(2)
            .build()
            .unwrap();
        let mut doc = fieldcrypt::Document::new();
        doc.push("encrypted", Value::encrypted(placeholder.to_blob()));

        let transformed = fieldcrypt::transform_placeholders(&doc, &vault).unwrap();
        let mut payloads = fieldcrypt::get_encrypted_field_info(&transformed).unwrap();
        prop_assert_eq!(payloads.len(), 1);
        let edge_count = payloads[0]
            .payload
            .edge_token_sets
            .as_ref()
            .map(|edges| edges.len())
            .unwrap_or(0);
        prop_assert!(edge_count >= 2);
        payloads[0].counts = vec![1; edge_count];
        let final_doc = fieldcrypt::finalize_for_insert(&transformed, &payloads).unwrap();

        // One tag per edge.
        let Some(Value::Array(tags)) = final_doc.get(fieldcrypt::SAFE_CONTENT_FIELD) else {
            panic!("tag array missing");
        };
        prop_assert_eq!(tags.len(), edge_count);

        let decrypted = fieldcrypt::decrypt_document(&final_doc, &vault).unwrap();
        prop_assert_eq!(decrypted.get("encrypted"), Some(&value));
    }
}

#[test]
fn equality_find_payload_carries_contention_budget() {
    let vault = TestKeyVault;
    let placeholder = fieldcrypt::PlaceholderBuilder::find(index_key_id(), user_key_id())
        .equality(Value::String("needle".into()))
        .contention(3)
        .build()
        .unwrap();
    assert_eq!(placeholder.algorithm, Fle2Algorithm::Equality);
    let mut doc = fieldcrypt::Document::new();
    doc.push("encrypted", Value::encrypted(placeholder.to_blob()));
    let transformed = fieldcrypt::transform_placeholders(&doc, &vault).unwrap();
    let Some(Value::Binary { bytes, .. }) = transformed.get("encrypted") else {
        panic!("encrypted field is not binary");
    };
    let (ty, payload) = fieldcrypt::decode_blob(bytes).unwrap();
    assert_eq!(
        ty,
        fieldcrypt::payloads::EncryptedBinDataType::FindEqualityPayload
    );
    let parsed = fieldcrypt::payloads::FindEqualityPayload::parse(payload).unwrap();
    assert_eq!(parsed.max_counter, 3);
}
