// Range encoding: order-preserving normalization of numeric domains onto
// unsigned integers, bit-string edge generation at configurable sparsity, and
// the minimal dyadic cover of a query range. Edges are the atomic unit of
// range-query tokenization; every edge string later feeds token derivation.

use crate::check;
use crate::decimal::Decimal128;
use crate::errors::{Error, Result};
use crate::types::Sparsity;
use crate::values::{BsonType, Value};

/// The edge naming the whole domain.
pub const ROOT_EDGE: &str = "root";

/// An int32 value normalized onto an unsigned domain `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OstInt32 {
    pub value: u32,
    pub min: u32,
    pub max: u32,
}

/// An int64 (or date) value normalized onto an unsigned domain `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OstInt64 {
    pub value: u64,
    pub min: u64,
    pub max: u64,
}

/// A double normalized onto the full u64 domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OstDouble {
    pub value: u64,
    pub min: u64,
    pub max: u64,
}

/// A decimal128 normalized onto the full u128 domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OstDecimal128 {
    pub value: u128,
    pub min: u128,
    pub max: u128,
}

/// Normalize an int32 with optional bounds.
///
/// Unbounded values shift two's-complement order onto `[0, u32::MAX]`;
/// bounded values become offsets into `[0, max - min]`.
pub fn get_type_info_i32(value: i32, min: Option<i32>, max: Option<i32>) -> Result<OstInt32> {
    check!(
        min.is_some() == max.is_some(),
        6775001,
        "must specify both a lower and upper bound or no bounds"
    );
    match (min, max) {
        (Some(min), Some(max)) => {
            check!(
                min < max,
                6775002,
                "the minimum value must be less than the maximum value"
            );
            check!(
                (min..=max).contains(&value),
                6775003,
                "value must be inside the bounds"
            );
            Ok(OstInt32 {
                value: value.wrapping_sub(min) as u32,
                min: 0,
                max: max.wrapping_sub(min) as u32,
            })
        }
        _ => Ok(OstInt32 {
            value: (value as u32) ^ (1 << 31),
            min: 0,
            max: u32::MAX,
        }),
    }
}

/// Normalize an int64 (or a date as millis) with optional bounds.
pub fn get_type_info_i64(value: i64, min: Option<i64>, max: Option<i64>) -> Result<OstInt64> {
    check!(
        min.is_some() == max.is_some(),
        6775004,
        "must specify both a lower and upper bound or no bounds"
    );
    match (min, max) {
        (Some(min), Some(max)) => {
            check!(
                min < max,
                6775005,
                "the minimum value must be less than the maximum value"
            );
            check!(
                (min..=max).contains(&value),
                6775006,
                "value must be inside the bounds"
            );
            Ok(OstInt64 {
                value: value.wrapping_sub(min) as u64,
                min: 0,
                max: max.wrapping_sub(min) as u64,
            })
        }
        _ => Ok(OstInt64 {
            value: (value as u64) ^ (1 << 63),
            min: 0,
            max: u64::MAX,
        }),
    }
}

/// Normalize a double with optional bounds.
///
/// Doubles always map onto the full u64 domain; bounds only validate.
/// The mapping folds sign and magnitude so IEEE order is preserved:
/// zero sits at the midpoint, positives add their bit pattern, negatives
/// subtract theirs.
pub fn get_type_info_double(value: f64, min: Option<f64>, max: Option<f64>) -> Result<OstDouble> {
    check!(
        min.is_some() == max.is_some(),
        6775007,
        "must specify both a lower and upper bound or no bounds"
    );
    check!(
        value.is_finite()
            && min.map_or(true, f64::is_finite)
            && max.map_or(true, f64::is_finite),
        6775008,
        "infinity and NaN double values are not supported"
    );
    if let (Some(min), Some(max)) = (min, max) {
        check!(
            min < max,
            6775009,
            "the minimum value must be less than the maximum value"
        );
        check!(
            (min..=max).contains(&value),
            6775010,
            "value must be inside the bounds"
        );
    }
    Ok(OstDouble {
        value: map_double(value),
        min: 0,
        max: u64::MAX,
    })
}

fn map_double(value: f64) -> u64 {
    const MIDPOINT: u64 = 1 << 63;
    if value == 0.0 {
        MIDPOINT
    } else if value > 0.0 {
        MIDPOINT + value.to_bits()
    } else {
        MIDPOINT - (-value).to_bits()
    }
}

/// Normalize a decimal128 with optional bounds onto the full u128 domain.
pub fn get_type_info_decimal128(
    value: Decimal128,
    min: Option<Decimal128>,
    max: Option<Decimal128>,
) -> Result<OstDecimal128> {
    check!(
        min.is_some() == max.is_some(),
        6854201,
        "must specify both a lower and upper bound or no bounds"
    );
    let finite = |d: &Decimal128| !d.is_infinite() && !d.is_nan();
    check!(
        finite(&value) && min.as_ref().map_or(true, finite) && max.as_ref().map_or(true, finite),
        6854202,
        "infinity and NaN decimal128 values are not supported"
    );
    if let (Some(min), Some(max)) = (min, max) {
        check!(
            min < max,
            6854203,
            "the minimum value must be less than the maximum value"
        );
        check!(
            value >= min && value <= max,
            6854204,
            "value must be inside the bounds"
        );
    }
    Ok(OstDecimal128 {
        value: value.to_unsigned()?,
        min: 0,
        max: u128::MAX,
    })
}

/// The ordered edge set of one indexed value: the root, the full-width leaf
/// and every proper prefix whose depth is a multiple of the sparsity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edges {
    leaf: String,
    sparsity: u32,
}

impl Edges {
    fn new(leaf: String, sparsity: Sparsity) -> Self {
        Self {
            leaf,
            sparsity: sparsity.get(),
        }
    }

    pub fn leaf(&self) -> &str {
        &self.leaf
    }

    /// Edges in emission order: root, leaf, then prefixes by depth.
    pub fn get(&self) -> Vec<&str> {
        let mut out = vec![ROOT_EDGE, self.leaf.as_str()];
        for depth in 1..self.leaf.len() {
            if depth % self.sparsity as usize == 0 {
                out.push(&self.leaf[..depth]);
            }
        }
        out
    }
}

fn leaf_string(value: u128, max: u128) -> String {
    let width = (128 - max.leading_zeros()) as usize;
    format!("{value:0width$b}")
}

pub fn get_edges_i32(
    value: i32,
    min: Option<i32>,
    max: Option<i32>,
    sparsity: i64,
) -> Result<Edges> {
    let sparsity = Sparsity::new(sparsity)?;
    let ost = get_type_info_i32(value, min, max)?;
    Ok(Edges::new(
        leaf_string(ost.value as u128, ost.max as u128),
        sparsity,
    ))
}

pub fn get_edges_i64(
    value: i64,
    min: Option<i64>,
    max: Option<i64>,
    sparsity: i64,
) -> Result<Edges> {
    let sparsity = Sparsity::new(sparsity)?;
    let ost = get_type_info_i64(value, min, max)?;
    Ok(Edges::new(
        leaf_string(ost.value as u128, ost.max as u128),
        sparsity,
    ))
}

pub fn get_edges_double(
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
    sparsity: i64,
) -> Result<Edges> {
    let sparsity = Sparsity::new(sparsity)?;
    let ost = get_type_info_double(value, min, max)?;
    Ok(Edges::new(
        leaf_string(ost.value as u128, ost.max as u128),
        sparsity,
    ))
}

pub fn get_edges_decimal128(
    value: Decimal128,
    min: Option<Decimal128>,
    max: Option<Decimal128>,
    sparsity: i64,
) -> Result<Edges> {
    let sparsity = Sparsity::new(sparsity)?;
    let ost = get_type_info_decimal128(value, min, max)?;
    Ok(Edges::new(leaf_string(ost.value, ost.max), sparsity))
}

/// Compute edges for a document value, dispatching on its type.
/// Bounds, when present, must carry the same type as the value.
pub fn get_edges_for_value(
    value: &Value,
    min: Option<&Value>,
    max: Option<&Value>,
    sparsity: i64,
) -> Result<Edges> {
    fn expect<'a, T>(
        bound: Option<&'a Value>,
        extract: impl Fn(&'a Value) -> Option<T>,
    ) -> Result<Option<T>> {
        match bound {
            None => Ok(None),
            Some(v) => extract(v)
                .map(Some)
                .ok_or_else(|| Error::type_mismatch("range bound type differs from value type")),
        }
    }

    match value {
        Value::Int32(v) => {
            let min = expect(min, |b| match b {
                Value::Int32(x) => Some(*x),
                _ => None,
            })?;
            let max = expect(max, |b| match b {
                Value::Int32(x) => Some(*x),
                _ => None,
            })?;
            get_edges_i32(*v, min, max, sparsity)
        }
        Value::Int64(v) => {
            let min = expect(min, |b| match b {
                Value::Int64(x) => Some(*x),
                _ => None,
            })?;
            let max = expect(max, |b| match b {
                Value::Int64(x) => Some(*x),
                _ => None,
            })?;
            get_edges_i64(*v, min, max, sparsity)
        }
        Value::DateTime(v) => {
            let min = expect(min, |b| match b {
                Value::DateTime(x) => Some(*x),
                _ => None,
            })?;
            let max = expect(max, |b| match b {
                Value::DateTime(x) => Some(*x),
                _ => None,
            })?;
            get_edges_i64(*v, min, max, sparsity)
        }
        Value::Double(v) => {
            let min = expect(min, |b| match b {
                Value::Double(x) => Some(*x),
                _ => None,
            })?;
            let max = expect(max, |b| match b {
                Value::Double(x) => Some(*x),
                _ => None,
            })?;
            get_edges_double(*v, min, max, sparsity)
        }
        Value::Decimal128(v) => {
            let min = expect(min, |b| match b {
                Value::Decimal128(x) => Some(*x),
                _ => None,
            })?;
            let max = expect(max, |b| match b {
                Value::Decimal128(x) => Some(*x),
                _ => None,
            })?;
            get_edges_decimal128(*v, min, max, sparsity)
        }
        other => Err(Error::type_mismatch(format!(
            "type {:?} cannot be range-indexed",
            other.bson_type()
        ))),
    }
}

// Canonical dyadic cover over a normalized domain. Aligned blocks whose
// trie level is stored at this sparsity are emitted directly; others split
// into their two children. Emission order is the in-order traversal, which
// is part of the observable contract.
struct MinCoverGenerator {
    range_min: u128,
    range_max: u128,
    sparsity: u32,
    max_len: u32,
}

impl MinCoverGenerator {
    fn new(range_min: u128, range_max: u128, max: u128, sparsity: Sparsity) -> Self {
        debug_assert!(range_min <= range_max);
        debug_assert!(range_max <= max);
        Self {
            range_min,
            range_max,
            sparsity: sparsity.get(),
            max_len: 128 - max.leading_zeros(),
        }
    }

    fn apply_mask(value: u128, masked_bits: u32) -> u128 {
        if masked_bits >= 128 {
            u128::MAX
        } else {
            value | ((1u128 << masked_bits) - 1)
        }
    }

    fn is_level_stored(&self, masked_bits: u32) -> bool {
        let level = self.max_len - masked_bits;
        masked_bits == 0 || level % self.sparsity == 0
    }

    fn to_string(&self, start: u128, masked_bits: u32) -> String {
        if masked_bits == self.max_len {
            return ROOT_EDGE.to_string();
        }
        let width = (self.max_len - masked_bits) as usize;
        format!("{:0width$b}", start >> masked_bits)
    }

    fn cover_rec(&self, out: &mut Vec<String>, block_start: u128, masked_bits: u32) {
        let block_end = Self::apply_mask(block_start, masked_bits);
        if block_end < self.range_min || block_start > self.range_max {
            return;
        }
        if block_start >= self.range_min
            && block_end <= self.range_max
            && self.is_level_stored(masked_bits)
        {
            out.push(self.to_string(block_start, masked_bits));
            return;
        }
        debug_assert!(masked_bits > 0);
        let child_bits = masked_bits - 1;
        self.cover_rec(out, block_start, child_bits);
        self.cover_rec(out, block_start | (1u128 << child_bits), child_bits);
    }

    fn cover(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.cover_rec(&mut out, 0, self.max_len);
        out
    }
}

/// Adjust a normalized `[lower, upper]` pair for endpoint exclusivity.
/// Returns `None` when the adjusted range is empty.
fn adjust_bounds(
    mut lower: u128,
    lower_included: bool,
    mut upper: u128,
    upper_included: bool,
    domain_max: u128,
) -> Result<Option<(u128, u128)>> {
    if !lower_included {
        check!(
            lower != domain_max,
            6901316,
            "an exclusive lower bound at the domain maximum matches nothing"
        );
        lower += 1;
    }
    if !upper_included {
        check!(
            upper != 0,
            6901317,
            "an exclusive upper bound at the domain minimum matches nothing"
        );
        upper -= 1;
    }
    if lower > upper {
        return Ok(None);
    }
    Ok(Some((lower, upper)))
}

fn min_cover_normalized(
    lower: u128,
    lower_included: bool,
    upper: u128,
    upper_included: bool,
    domain_max: u128,
    sparsity: Sparsity,
) -> Result<Vec<String>> {
    match adjust_bounds(lower, lower_included, upper, upper_included, domain_max)? {
        None => Ok(Vec::new()),
        Some((lo, hi)) => Ok(MinCoverGenerator::new(lo, hi, domain_max, sparsity).cover()),
    }
}

pub fn min_cover_i32(
    lower: i32,
    lower_included: bool,
    upper: i32,
    upper_included: bool,
    min: Option<i32>,
    max: Option<i32>,
    sparsity: i64,
) -> Result<Vec<String>> {
    let sparsity = Sparsity::new(sparsity)?;
    let a = get_type_info_i32(lower, min, max)?;
    let b = get_type_info_i32(upper, min, max)?;
    min_cover_normalized(
        a.value as u128,
        lower_included,
        b.value as u128,
        upper_included,
        a.max as u128,
        sparsity,
    )
}

pub fn min_cover_i64(
    lower: i64,
    lower_included: bool,
    upper: i64,
    upper_included: bool,
    min: Option<i64>,
    max: Option<i64>,
    sparsity: i64,
) -> Result<Vec<String>> {
    let sparsity = Sparsity::new(sparsity)?;
    let a = get_type_info_i64(lower, min, max)?;
    let b = get_type_info_i64(upper, min, max)?;
    min_cover_normalized(
        a.value as u128,
        lower_included,
        b.value as u128,
        upper_included,
        a.max as u128,
        sparsity,
    )
}

pub fn min_cover_double(
    lower: f64,
    lower_included: bool,
    upper: f64,
    upper_included: bool,
    min: Option<f64>,
    max: Option<f64>,
    sparsity: i64,
) -> Result<Vec<String>> {
    let sparsity = Sparsity::new(sparsity)?;
    let a = get_type_info_double(lower, min, max)?;
    let b = get_type_info_double(upper, min, max)?;
    min_cover_normalized(
        a.value as u128,
        lower_included,
        b.value as u128,
        upper_included,
        a.max as u128,
        sparsity,
    )
}

pub fn min_cover_decimal128(
    lower: Decimal128,
    lower_included: bool,
    upper: Decimal128,
    upper_included: bool,
    min: Option<Decimal128>,
    max: Option<Decimal128>,
    sparsity: i64,
) -> Result<Vec<String>> {
    let sparsity = Sparsity::new(sparsity)?;
    let a = get_type_info_decimal128(lower, min, max)?;
    let b = get_type_info_decimal128(upper, min, max)?;
    min_cover_normalized(
        a.value,
        lower_included,
        b.value,
        upper_included,
        a.max,
        sparsity,
    )
}

/// The bounds of one range query, as carried by a find placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgesInfo {
    pub lower: Value,
    pub lower_included: bool,
    pub upper: Value,
    pub upper_included: bool,
    pub index_min: Value,
    pub index_max: Value,
}

/// Compute the minimal edge cover for a range query.
///
/// Infinite double bounds clamp to the index bounds before type dispatch.
/// After clamping, a type mismatch among the four bounds is a caller
/// programming error and panics; it is never a recoverable failure.
pub fn get_min_cover(info: &EdgesInfo, sparsity: i64) -> Result<Vec<String>> {
    let mut lower = info.lower.clone();
    let mut lower_included = info.lower_included;
    let mut upper = info.upper.clone();
    let mut upper_included = info.upper_included;

    // Infinite endpoints stand for "unbounded on this side".
    if is_infinite_value(&lower) {
        lower = if is_negative_infinity(&lower) {
            info.index_min.clone()
        } else {
            info.index_max.clone()
        };
        lower_included = true;
    }
    if is_infinite_value(&upper) {
        upper = if is_negative_infinity(&upper) {
            info.index_min.clone()
        } else {
            info.index_max.clone()
        };
        upper_included = true;
    }

    let ty = lower.bson_type();
    assert!(
        ty == upper.bson_type()
            && ty == info.index_min.bson_type()
            && ty == info.index_max.bson_type(),
        "range query bounds must all carry the index type (tripwire 6901300)"
    );

    match (&lower, &upper, &info.index_min, &info.index_max) {
        (Value::Int32(lb), Value::Int32(ub), Value::Int32(min), Value::Int32(max)) => min_cover_i32(
            *lb,
            lower_included,
            *ub,
            upper_included,
            Some(*min),
            Some(*max),
            sparsity,
        ),
        (Value::Int64(lb), Value::Int64(ub), Value::Int64(min), Value::Int64(max)) => min_cover_i64(
            *lb,
            lower_included,
            *ub,
            upper_included,
            Some(*min),
            Some(*max),
            sparsity,
        ),
        (
            Value::DateTime(lb),
            Value::DateTime(ub),
            Value::DateTime(min),
            Value::DateTime(max),
        ) => min_cover_i64(
            *lb,
            lower_included,
            *ub,
            upper_included,
            Some(*min),
            Some(*max),
            sparsity,
        ),
        (Value::Double(lb), Value::Double(ub), Value::Double(min), Value::Double(max)) => {
            min_cover_double(
                *lb,
                lower_included,
                *ub,
                upper_included,
                Some(*min),
                Some(*max),
                sparsity,
            )
        }
        (
            Value::Decimal128(lb),
            Value::Decimal128(ub),
            Value::Decimal128(min),
            Value::Decimal128(max),
        ) => min_cover_decimal128(
            *lb,
            lower_included,
            *ub,
            upper_included,
            Some(*min),
            Some(*max),
            sparsity,
        ),
        _ => Err(Error::type_mismatch(format!(
            "type {ty:?} cannot be range-queried"
        ))),
    }
}

fn is_infinite_value(value: &Value) -> bool {
    match value {
        Value::Double(d) => d.is_infinite(),
        Value::Decimal128(d) => d.is_infinite(),
        _ => false,
    }
}

fn is_negative_infinity(value: &Value) -> bool {
    match value {
        Value::Double(d) => d.is_infinite() && *d < 0.0,
        Value::Decimal128(d) => d.is_infinite() && d.is_negative(),
        _ => false,
    }
}
