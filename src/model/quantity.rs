//! Resource quantities (`500m`, `2`, `1.5Gi`, `100M`).
//!
//! Parsed values are held in milli-units so CPU and memory share one
//! representation. Anything below a milli-unit is rounded up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Quantity parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("quantity must not be negative: {0}")]
    Negative(String),

    #[error("invalid number in quantity: {0}")]
    InvalidNumber(String),

    #[error("unknown quantity suffix: {0}")]
    UnknownSuffix(String),

    #[error("quantity overflows: {0}")]
    Overflow(String),
}

/// A non-negative resource amount in milli-units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    milli: u128,
}

const KILO: u128 = 1_000;
const KIBI: u128 = 1_024;

/// Multiplier from the textual unit to milli-units.
fn suffix_factor(suffix: &str) -> Option<u128> {
    let factor = match suffix {
        "m" => 1,
        "" => KILO,
        "k" => KILO.pow(2),
        "M" => KILO.pow(3),
        "G" => KILO.pow(4),
        "T" => KILO.pow(5),
        "P" => KILO.pow(6),
        "E" => KILO.pow(7),
        "Ki" => KIBI * KILO,
        "Mi" => KIBI.pow(2) * KILO,
        "Gi" => KIBI.pow(3) * KILO,
        "Ti" => KIBI.pow(4) * KILO,
        "Pi" => KIBI.pow(5) * KILO,
        "Ei" => KIBI.pow(6) * KILO,
        _ => return None,
    };
    Some(factor)
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { milli: 0 };

    pub fn from_millis(milli: u128) -> Self {
        Self { milli }
    }

    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        if s.starts_with('-') {
            return Err(QuantityError::Negative(s.to_string()));
        }
        let s = s.strip_prefix('+').unwrap_or(s);

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);

        let factor =
            suffix_factor(suffix).ok_or_else(|| QuantityError::UnknownSuffix(suffix.to_string()))?;

        let (whole, frac) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }
        if frac.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let overflow = || QuantityError::Overflow(input.to_string());

        let whole_value: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        let mut milli = whole_value.checked_mul(factor).ok_or_else(overflow)?;

        if !frac.is_empty() {
            // Horner from the last digit keeps every step below 10 * factor,
            // so fractions of any length stay exact; any remainder rounds up.
            let mut part: u128 = 0;
            let mut inexact = false;
            for digit in frac.bytes().rev() {
                let n = u128::from(digit - b'0')
                    .checked_mul(factor)
                    .and_then(|v| v.checked_add(part))
                    .ok_or_else(overflow)?;
                inexact |= n % 10 != 0;
                part = n / 10;
            }
            if inexact {
                part += 1;
            }
            milli = milli.checked_add(part).ok_or_else(overflow)?;
        }

        Ok(Self { milli })
    }

    /// Canonical milli-unit value (millicores for CPU).
    pub fn millis(&self) -> u128 {
        self.milli
    }

    /// Whole-unit value, rounded up (bytes for memory).
    pub fn value(&self) -> u128 {
        self.milli.div_ceil(KILO)
    }

    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity {
            milli: self.milli.saturating_add(other.milli),
        }
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli % KILO == 0 {
            write!(f, "{}", self.milli / KILO)
        } else {
            write!(f, "{}m", self.milli)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let text = match raw {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected quantity string, got {}",
                    other
                )))
            }
        };
        Quantity::parse(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_forms() {
        assert_eq!(Quantity::parse("500m").unwrap().millis(), 500);
        assert_eq!(Quantity::parse("2").unwrap().millis(), 2000);
        assert_eq!(Quantity::parse("0.5").unwrap().millis(), 500);
        assert_eq!(Quantity::parse("1.25").unwrap().millis(), 1250);
    }

    #[test]
    fn test_binary_suffixes() {
        assert_eq!(Quantity::parse("1Ki").unwrap().value(), 1024);
        assert_eq!(Quantity::parse("1.5Gi").unwrap().value(), 1_610_612_736);
        assert_eq!(Quantity::parse("64Mi").unwrap().value(), 64 * 1024 * 1024);
    }

    #[test]
    fn test_decimal_suffixes() {
        assert_eq!(Quantity::parse("100M").unwrap().value(), 100_000_000);
        assert_eq!(Quantity::parse("1k").unwrap().value(), 1000);
        assert_eq!(Quantity::parse("2G").unwrap().value(), 2_000_000_000);
    }

    #[test]
    fn test_sub_milli_rounds_up() {
        assert_eq!(Quantity::parse("0.0001").unwrap().millis(), 1);
        assert_eq!(Quantity::parse("1.0001").unwrap().millis(), 1001);
        assert_eq!(Quantity::parse("1m").unwrap().value(), 1);
    }

    #[test]
    fn test_long_fraction_with_large_suffix() {
        let exa = Quantity::parse("1Ei").unwrap();
        assert_eq!(Quantity::parse("0.999999999999999999999999999999Ei").unwrap(), exa);
        let long = format!("0.{}1Ei", "0".repeat(60));
        assert_eq!(Quantity::parse(&long).unwrap().millis(), 1);
        assert_eq!(Quantity::parse("1.5Ei").unwrap().value(), 3u128 << 59);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(Quantity::parse(""), Err(QuantityError::Empty));
        assert!(matches!(Quantity::parse("-1"), Err(QuantityError::Negative(_))));
        assert!(matches!(Quantity::parse("5X"), Err(QuantityError::UnknownSuffix(_))));
        assert!(matches!(Quantity::parse("Gi"), Err(QuantityError::InvalidNumber(_))));
        assert!(matches!(Quantity::parse("1.2.3"), Err(QuantityError::UnknownSuffix(_)) | Err(QuantityError::InvalidNumber(_))));
    }

    #[test]
    fn test_display_prefers_whole_units() {
        assert_eq!(Quantity::parse("2000m").unwrap().to_string(), "2");
        assert_eq!(Quantity::parse("250m").unwrap().to_string(), "250m");
    }

    #[test]
    fn test_ordering_across_suffixes() {
        assert!(Quantity::parse("1Gi").unwrap() > Quantity::parse("1G").unwrap());
        assert!(Quantity::parse("999m").unwrap() < Quantity::parse("1").unwrap());
    }
}
