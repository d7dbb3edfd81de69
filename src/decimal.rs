// IEEE 754-2008 decimal128 values, reduced to what the range codec needs:
// classification, 16-byte interchange encoding, and the order-preserving
// mapping onto u128 used for edge generation.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::{Error, Result};

/// Largest representable coefficient: 10^34 - 1.
pub const MAX_COEFFICIENT: u128 = 9_999_999_999_999_999_999_999_999_999_999_999;

/// Smallest representable exponent.
pub const MIN_EXPONENT: i32 = -6176;

/// Largest representable exponent.
pub const MAX_EXPONENT: i32 = 6111;

const EXPONENT_BIAS: i32 = 6176;

/// A decimal128 value: sign, a coefficient of at most 34 decimal digits and a
/// power-of-ten exponent, or one of the special values.
///
/// Two values with different (coefficient, exponent) pairs may be numerically
/// equal (`1E1` vs `10E0`); `cmp` compares numerically, `==` follows `cmp`.
#[derive(Clone, Copy)]
pub enum Decimal128 {
    Finite {
        negative: bool,
        coefficient: u128,
        exponent: i32,
    },
    Infinity {
        negative: bool,
    },
    NaN {
        negative: bool,
    },
}

impl Decimal128 {
    pub const POSITIVE_INFINITY: Decimal128 = Decimal128::Infinity { negative: false };
    pub const NEGATIVE_INFINITY: Decimal128 = Decimal128::Infinity { negative: true };
    pub const NAN: Decimal128 = Decimal128::NaN { negative: false };
    pub const ZERO: Decimal128 = Decimal128::Finite {
        negative: false,
        coefficient: 0,
        exponent: 0,
    };

    /// Build a finite value from parts.
    pub fn from_parts(negative: bool, coefficient: u128, exponent: i32) -> Result<Self> {
        if coefficient > MAX_COEFFICIENT {
            return Err(Error::bad_value(format!(
                "decimal128 coefficient {coefficient} exceeds 34 digits"
            )));
        }
        if !(MIN_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
            return Err(Error::bad_value(format!(
                "decimal128 exponent {exponent} out of range"
            )));
        }
        Ok(Decimal128::Finite {
            negative,
            coefficient,
            exponent,
        })
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal128::Finite {
            negative: value < 0,
            coefficient: value.unsigned_abs() as u128,
            exponent: 0,
        }
    }

    pub fn is_negative(&self) -> bool {
        match *self {
            Decimal128::Finite { negative, .. }
            | Decimal128::Infinity { negative }
            | Decimal128::NaN { negative } => negative,
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Decimal128::Infinity { .. })
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Decimal128::NaN { .. })
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Decimal128::Finite { coefficient: 0, .. })
    }

    /// Order-preserving mapping of a finite value onto the full u128 domain.
    ///
    /// The coefficient is left-justified to 34 digits without pushing the
    /// exponent below the representable minimum; zero maps to the midpoint.
    /// Fails on infinities and NaN, which have no position in the domain.
    pub fn to_unsigned(&self) -> Result<u128> {
        let (negative, coefficient, exponent) = match *self {
            Decimal128::Finite {
                negative,
                coefficient,
                exponent,
            } => (negative, coefficient, exponent),
            _ => {
                return Err(Error::bad_value(
                    "cannot map a non-finite decimal128 onto the unsigned domain",
                ))
            }
        };

        const MIDPOINT: u128 = 1u128 << 127;
        if coefficient == 0 {
            return Ok(MIDPOINT);
        }

        let digits = decimal_digits(coefficient);
        let rho = (34 - digits).min((exponent - MIN_EXPONENT) as u32);
        let adjusted_coefficient = coefficient * 10u128.pow(rho);
        let adjusted_exponent = exponent - rho as i32;

        let offset =
            (adjusted_exponent - MIN_EXPONENT) as u128 * MAX_COEFFICIENT + adjusted_coefficient;
        Ok(if negative {
            MIDPOINT - offset
        } else {
            MIDPOINT + offset
        })
    }

    /// Encode as the 16-byte little-endian interchange form (BID encoding).
    pub fn to_bytes(&self) -> [u8; 16] {
        let bits: u128 = match *self {
            Decimal128::Finite {
                negative,
                coefficient,
                exponent,
            } => {
                let sign = if negative { 1u128 << 127 } else { 0 };
                let biased = (exponent + EXPONENT_BIAS) as u128;
                // Every valid coefficient fits in 113 bits, so the
                // short-combination form always applies.
                sign | (biased << 113) | coefficient
            }
            Decimal128::Infinity { negative } => {
                let sign = if negative { 1u128 << 127 } else { 0 };
                sign | (0b11110u128 << 122)
            }
            Decimal128::NaN { negative } => {
                let sign = if negative { 1u128 << 127 } else { 0 };
                sign | (0b11111u128 << 122)
            }
        };
        bits.to_le_bytes()
    }

    /// Decode the 16-byte little-endian interchange form.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let bits = u128::from_le_bytes(bytes);
        let negative = (bits >> 127) & 1 == 1;
        let combination = ((bits >> 122) & 0b11111) as u8;

        if combination == 0b11110 {
            return Decimal128::Infinity { negative };
        }
        if combination == 0b11111 {
            return Decimal128::NaN { negative };
        }

        let (biased_exponent, coefficient) = if combination >> 3 == 0b11 {
            // Large-coefficient form: exponent continues two bits lower and
            // the coefficient has an implicit high `100` prefix.
            let exp = ((bits >> 111) & 0x3fff) as i32;
            let coeff = (bits & ((1u128 << 111) - 1)) | (1u128 << 113);
            (exp, coeff)
        } else {
            let exp = ((bits >> 113) & 0x3fff) as i32;
            let coeff = bits & ((1u128 << 113) - 1);
            (exp, coeff)
        };

        // Non-canonical coefficients above 10^34-1 represent zero.
        let coefficient = if coefficient > MAX_COEFFICIENT {
            0
        } else {
            coefficient
        };
        Decimal128::Finite {
            negative,
            coefficient,
            exponent: biased_exponent - EXPONENT_BIAS,
        }
    }
}

fn decimal_digits(mut value: u128) -> u32 {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

impl PartialEq for Decimal128 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal128 {}

impl PartialOrd for Decimal128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal128 {
    /// Total numeric order: -NaN < -Inf < finite < +Inf < +NaN.
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(d: &Decimal128) -> i8 {
            match d {
                Decimal128::NaN { negative: true } => -2,
                Decimal128::Infinity { negative: true } => -1,
                Decimal128::Finite { .. } => 0,
                Decimal128::Infinity { negative: false } => 1,
                Decimal128::NaN { negative: false } => 2,
            }
        }
        match (rank(self), rank(other)) {
            (a, b) if a != b => a.cmp(&b),
            (0, 0) => {
                // Finite comparison rides on the order-preserving mapping.
                let lhs = self.to_unsigned().expect("finite");
                let rhs = other.to_unsigned().expect("finite");
                lhs.cmp(&rhs)
            }
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Debug for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Decimal128::Finite {
                negative,
                coefficient,
                exponent,
            } => {
                let sign = if negative { "-" } else { "" };
                write!(f, "{sign}{coefficient}E{exponent}")
            }
            Decimal128::Infinity { negative: false } => write!(f, "Infinity"),
            Decimal128::Infinity { negative: true } => write!(f, "-Infinity"),
            Decimal128::NaN { negative: false } => write!(f, "NaN"),
            Decimal128::NaN { negative: true } => write!(f, "-NaN"),
        }
    }
}

impl FromStr for Decimal128 {
    type Err = Error;

    /// Parse decimal literals like `123`, `-4.5`, `1E-6` or `9.99E+6144`.
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::bad_value(format!("invalid decimal128 literal: {s:?}"));
        let mut rest = s.trim();
        let mut negative = false;
        if let Some(stripped) = rest.strip_prefix('-') {
            negative = true;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('+') {
            rest = stripped;
        }

        let (mantissa, exp_part) = match rest.find(['e', 'E']) {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };
        let mut exponent: i32 = match exp_part {
            Some(e) => e.parse().map_err(|_| bad())?,
            None => 0,
        };

        let (int_part, frac_part) = match mantissa.find('.') {
            Some(idx) => (&mantissa[..idx], &mantissa[idx + 1..]),
            None => (mantissa, ""),
        };
        let digits: String = int_part.chars().chain(frac_part.chars()).collect();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        exponent -= frac_part.len() as i32;

        let trimmed = digits.trim_start_matches('0');
        let coefficient: u128 = if trimmed.is_empty() {
            0
        } else {
            if trimmed.len() > 34 {
                return Err(bad());
            }
            trimmed.parse().map_err(|_| bad())?
        };

        Decimal128::from_parts(negative, coefficient, exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal128 {
        s.parse().unwrap()
    }

    #[test]
    fn mapping_zero_is_midpoint() {
        assert_eq!(
            dec("0").to_unsigned().unwrap(),
            170141183460469231731687303715884105728
        );
    }

    #[test]
    fn mapping_small_integers() {
        assert_eq!(
            dec("1").to_unsigned().unwrap(),
            231572183460469231731687303715884099585
        );
        assert_eq!(
            dec("2").to_unsigned().unwrap(),
            231573183460469231731687303715884099585
        );
        assert_eq!(
            dec("22").to_unsigned().unwrap(),
            231583383460469231731687303715884099584
        );
        assert_eq!(
            dec("333").to_unsigned().unwrap(),
            231594513460469231731687303715884099583
        );
        assert_eq!(
            dec("5555").to_unsigned().unwrap(),
            231606738460469231731687303715884099582
        );
    }

    #[test]
    fn mapping_negative_integers() {
        assert_eq!(
            dec("-1").to_unsigned().unwrap(),
            108710183460469231731687303715884111871
        );
        assert_eq!(
            dec("-2").to_unsigned().unwrap(),
            108709183460469231731687303715884111871
        );
        assert_eq!(
            dec("-99999999").to_unsigned().unwrap(),
            108631183460569231731687303715884111878
        );
    }

    #[test]
    fn mapping_small_exponents() {
        assert_eq!(
            dec("1E-6").to_unsigned().unwrap(),
            231512183460469231731687303715884099591
        );
        assert_eq!(
            dec("1E-58").to_unsigned().unwrap(),
            230992183460469231731687303715884099643
        );
        assert_eq!(
            dec("-1E-6").to_unsigned().unwrap(),
            108770183460469231731687303715884111865
        );
    }

    #[test]
    fn mapping_large_exponents() {
        assert_eq!(
            dec("33E56").to_unsigned().unwrap(),
            232144483460469231731687303715884099528
        );
        assert_eq!(
            dec("22E57").to_unsigned().unwrap(),
            232153383460469231731687303715884099527
        );
        assert_eq!(
            dec("-33E56").to_unsigned().unwrap(),
            108137883460469231731687303715884111928
        );
    }

    #[test]
    fn mapping_extremes() {
        let largest_positive = dec("9999999999999999999999999999999999E6111");
        assert_eq!(
            largest_positive.to_unsigned().unwrap(),
            293021183460469231731687303715884093440
        );
        let smallest_positive = dec("1E-6176");
        assert_eq!(
            smallest_positive.to_unsigned().unwrap(),
            170141183460469231731687303715884105729
        );
        let largest_negative = dec("-9999999999999999999999999999999999E6111");
        assert_eq!(
            largest_negative.to_unsigned().unwrap(),
            47261183460469231731687303715884118016
        );
        let smallest_negative = dec("-1E-6176");
        assert_eq!(
            smallest_negative.to_unsigned().unwrap(),
            170141183460469231731687303715884105727
        );
        assert_eq!(
            dec("0E-6176").to_unsigned().unwrap(),
            170141183460469231731687303715884105728
        );
    }

    #[test]
    fn ordering_follows_numeric_value() {
        assert!(dec("-1111") < dec("-111"));
        assert!(dec("-1") < dec("0"));
        assert!(dec("0") < dec("1E-6176"));
        assert!(dec("1") < dec("1.5"));
        assert!(dec("1.5") < dec("22E57"));
        assert_eq!(dec("10"), dec("1E1"));
        assert!(Decimal128::NEGATIVE_INFINITY < dec("-9999999999999999999999999999999999E6111"));
        assert!(Decimal128::POSITIVE_INFINITY > dec("9999999999999999999999999999999999E6111"));
    }

    #[test]
    fn specials_refuse_mapping() {
        assert!(Decimal128::POSITIVE_INFINITY.to_unsigned().is_err());
        assert!(Decimal128::NAN.to_unsigned().is_err());
    }

    #[test]
    fn bytes_round_trip() {
        for s in ["0", "1", "-1", "123.456", "1E-6176", "-5555E100"] {
            let value = dec(s);
            let back = Decimal128::from_bytes(value.to_bytes());
            assert_eq!(value, back, "{s}");
        }
        assert!(Decimal128::from_bytes(Decimal128::POSITIVE_INFINITY.to_bytes()).is_infinite());
        assert!(Decimal128::from_bytes(Decimal128::NAN.to_bytes()).is_nan());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Decimal128>().is_err());
        assert!("abc".parse::<Decimal128>().is_err());
        assert!("1.2.3".parse::<Decimal128>().is_err());
    }
}
