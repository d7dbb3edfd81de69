// fieldcrypt - queryable field-level encryption core
// Root library module

pub mod builders;
pub mod client;
pub mod codec;
pub mod compaction;
pub mod contracts;
pub mod crypto;
pub mod decimal;
pub mod edc;
pub mod errors;
pub mod observability;
pub mod payloads;
pub mod range;
pub mod schema;
pub mod state_collections;
pub mod tokens;
pub mod types;
pub mod values;

// Re-export the observability entry points
pub use observability::{init_logging, init_logging_with_level};

// Re-export the error type and result alias
pub use errors::{Error, Result};

// Re-export the collaborator contracts
pub use contracts::{KeyVault, StateCollectionReader};

// Re-export validated types
pub use types::{ContentionFactor, FieldPath, IndexKey, KeyMaterial, Sparsity, UserKey};

// Re-export the document value model
pub use values::{BsonType, Document, Value};

// Re-export the token hierarchy
pub use tokens::{
    generate_collections_level1_token, generate_ecc_derived_from_data_and_contention_token,
    generate_ecc_derived_from_data_token, generate_ecc_token, generate_ecc_twice_derived_tag_token,
    generate_ecc_twice_derived_value_token, generate_ecoc_token,
    generate_edc_derived_from_data_and_contention_token, generate_edc_derived_from_data_token,
    generate_edc_token, generate_edc_twice_derived_token,
    generate_esc_derived_from_data_and_contention_token, generate_esc_derived_from_data_token,
    generate_esc_token, generate_esc_twice_derived_tag_token,
    generate_esc_twice_derived_value_token, generate_server_data_encryption_level1_token,
};

// Re-export payload codecs
pub use payloads::{
    decode_blob, encode_blob, EncryptedBinDataType, Fle2Algorithm, Fle2EqualityIndexedValue,
    Fle2RangeIndexedValue, Fle2UnindexedEncryptedValue, InsertUpdatePayload, Placeholder,
    PlaceholderType, RangeOperator,
};

// Re-export the builders
pub use builders::PlaceholderBuilder;

// Re-export client and server document operations
pub use client::{decrypt_document, transform_placeholders, validate_document};
pub use edc::{
    finalize_for_insert, finalize_for_update, generate_edc_tokens, generate_tag,
    generate_update_to_remove_tags, get_encrypted_field_info, get_encrypted_indexed_fields,
    get_removed_tags, validate_encrypted_field_info, EdcIndexedFields, EdcServerPayloadInfo,
    SAFE_CONTENT_FIELD,
};

// Re-export the state-collection protocol
pub use state_collections::{ecc, esc, ID_FIELD, VALUE_FIELD};

// Re-export range encoding
pub use range::{
    get_edges_decimal128, get_edges_double, get_edges_i32, get_edges_i64, get_min_cover,
    min_cover_decimal128, min_cover_double, min_cover_i32, min_cover_i64, Edges, EdgesInfo,
    ROOT_EDGE,
};

// Re-export schema handling
pub use schema::{
    encryption_information_serialize, encryption_information_serialize_for_delete,
    get_and_validate_schema, get_delete_tokens, DeleteToken, EncryptedField, EncryptedFieldConfig,
};

// Re-export compaction helpers
pub use compaction::{
    count_deleted, merge_ecc_documents, parse_compaction_tokens, validate_compaction_tokens,
    CompactionToken,
};
