// Fluent builders for the crate's composite inputs.
// Placeholders have enough knobs (operation, algorithm, two key ids,
// contention, sparsity, range bounds) that assembling them by hand is error
// prone; the builder enforces the valid combinations at build time.

use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::payloads::{
    Fle2Algorithm, Placeholder, PlaceholderType, PlaceholderValue, RangeFindSpec, RangeInsertSpec,
    RangeOperator,
};
use crate::range::EdgesInfo;
use crate::values::Value;

/// Builder for [`Placeholder`] markers.
///
/// ```
/// use fieldcrypt::builders::PlaceholderBuilder;
/// use fieldcrypt::values::Value;
/// use uuid::Uuid;
///
/// let placeholder = PlaceholderBuilder::insert(Uuid::nil(), Uuid::nil())
///     .equality(Value::String("secret".into()))
///     .contention(4)
///     .build()
///     .unwrap();
/// assert_eq!(placeholder.max_contention, 4);
/// ```
pub struct PlaceholderBuilder {
    placeholder_type: PlaceholderType,
    index_key_id: Uuid,
    user_key_id: Uuid,
    max_contention: u64,
    sparsity: i64,
    value: Option<(Fle2Algorithm, PlaceholderValue)>,
}

impl PlaceholderBuilder {
    /// Start an insert placeholder.
    pub fn insert(index_key_id: Uuid, user_key_id: Uuid) -> Self {
        Self::new(PlaceholderType::Insert, index_key_id, user_key_id)
    }

    /// Start a find placeholder.
    pub fn find(index_key_id: Uuid, user_key_id: Uuid) -> Self {
        Self::new(PlaceholderType::Find, index_key_id, user_key_id)
    }

    fn new(placeholder_type: PlaceholderType, index_key_id: Uuid, user_key_id: Uuid) -> Self {
        Self {
            placeholder_type,
            index_key_id,
            user_key_id,
            max_contention: 0,
            sparsity: 1,
            value: None,
        }
    }

    /// Equality algorithm with the given value.
    pub fn equality(mut self, value: Value) -> Self {
        self.value = Some((Fle2Algorithm::Equality, PlaceholderValue::Scalar(value)));
        self
    }

    /// Unindexed algorithm with the given value.
    pub fn unindexed(mut self, value: Value) -> Self {
        self.value = Some((Fle2Algorithm::Unindexed, PlaceholderValue::Scalar(value)));
        self
    }

    /// Range algorithm for an insert, with optional index bounds.
    pub fn range_insert(mut self, value: Value, min: Option<Value>, max: Option<Value>) -> Self {
        self.value = Some((
            Fle2Algorithm::Range,
            PlaceholderValue::RangeInsert(RangeInsertSpec { value, min, max }),
        ));
        self
    }

    /// Range algorithm for a find over the given bounds.
    pub fn range_find(
        mut self,
        edges_info: EdgesInfo,
        payload_id: i32,
        first_operator: RangeOperator,
    ) -> Self {
        self.value = Some((
            Fle2Algorithm::Range,
            PlaceholderValue::RangeFind(RangeFindSpec {
                edges_info,
                payload_id,
                first_operator,
            }),
        ));
        self
    }

    /// Maximum contention counter (tag bucket fan-out).
    pub fn contention(mut self, max_contention: u64) -> Self {
        self.max_contention = max_contention;
        self
    }

    /// Range sparsity. Only meaningful for the range algorithm.
    pub fn sparsity(mut self, sparsity: i64) -> Self {
        self.sparsity = sparsity;
        self
    }

    pub fn build(self) -> Result<Placeholder> {
        let (algorithm, value) = self
            .value
            .ok_or_else(|| Error::bad_value("placeholder needs a value and an algorithm"))?;
        match (&value, self.placeholder_type) {
            (PlaceholderValue::RangeInsert(_), PlaceholderType::Find) => {
                return Err(Error::bad_value(
                    "a range insert spec cannot back a find placeholder",
                ))
            }
            (PlaceholderValue::RangeFind(_), PlaceholderType::Insert) => {
                return Err(Error::bad_value(
                    "a range find spec cannot back an insert placeholder",
                ))
            }
            _ => {}
        }
        Ok(Placeholder {
            placeholder_type: self.placeholder_type,
            algorithm,
            index_key_id: self.index_key_id,
            user_key_id: self.user_key_id,
            max_contention: self.max_contention,
            sparsity: self.sparsity,
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_equality_placeholder() {
        let placeholder = PlaceholderBuilder::insert(Uuid::from_bytes([1; 16]), Uuid::nil())
            .equality(Value::Int32(5))
            .contention(3)
            .build()
            .unwrap();
        assert_eq!(placeholder.placeholder_type, PlaceholderType::Insert);
        assert_eq!(placeholder.algorithm, Fle2Algorithm::Equality);
        assert_eq!(placeholder.max_contention, 3);
    }

    #[test]
    fn rejects_missing_value() {
        assert!(PlaceholderBuilder::insert(Uuid::nil(), Uuid::nil())
            .build()
            .is_err());
    }

    #[test]
    fn rejects_mismatched_range_specs() {
        let info = EdgesInfo {
            lower: Value::Int32(0),
            lower_included: true,
            upper: Value::Int32(1),
            upper_included: true,
            index_min: Value::Int32(0),
            index_max: Value::Int32(1),
        };
        assert!(
            PlaceholderBuilder::insert(Uuid::nil(), Uuid::nil())
                .range_find(info, 1, RangeOperator::Gt)
                .build()
                .is_err()
        );
        assert!(
            PlaceholderBuilder::find(Uuid::nil(), Uuid::nil())
                .range_insert(Value::Int32(1), None, None)
                .build()
                .is_err()
        );
    }
}
