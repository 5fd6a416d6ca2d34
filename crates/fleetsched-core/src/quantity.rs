//! Resource quantity strings (`500m`, `4`, `16Gi`, `1.5G`).
//!
//! Values are kept in milli-units so CPU and byte quantities share one
//! representation. Fractions that do not divide evenly round up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("unknown quantity suffix {suffix:?} in {input:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity {0:?} is out of range")]
    Overflow(String),
}

/// A non-negative resource quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity {
    milli: i128,
}

impl Quantity {
    pub const ZERO: Quantity = Quantity { milli: 0 };

    pub fn from_milli(milli: i64) -> Self {
        Self {
            milli: i128::from(milli),
        }
    }

    pub fn from_value(value: i64) -> Self {
        Self {
            milli: i128::from(value) * 1000,
        }
    }

    /// The value in milli-units, saturated to `i64`.
    pub fn milli_value(&self) -> i64 {
        i64::try_from(self.milli).unwrap_or(i64::MAX)
    }

    /// The whole-unit value, rounded up.
    pub fn value(&self) -> i64 {
        let whole = (self.milli + 999) / 1000;
        i64::try_from(whole).unwrap_or(i64::MAX)
    }
}

fn multiplier(suffix: &str) -> Option<i128> {
    // Multipliers expressed in milli-units.
    let m = match suffix {
        "m" => 1,
        "" => 1_000,
        "k" => 1_000_000,
        "M" => 1_000_000_000,
        "G" => 1_000_000_000_000,
        "T" => 1_000_000_000_000_000,
        "P" => 1_000_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000_000,
        "Ki" => 1_000 << 10,
        "Mi" => 1_000 << 20,
        "Gi" => 1_000 << 30,
        "Ti" => 1_000 << 40,
        "Pi" => 1_000 << 50,
        "Ei" => 1_000 << 60,
        _ => return None,
    };
    Some(m)
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let s = s.strip_prefix('+').unwrap_or(s);

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        if number.is_empty() || number == "." {
            return Err(QuantityError::Invalid(input.to_string()));
        }

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if frac_part.contains('.') {
            return Err(QuantityError::Invalid(input.to_string()));
        }

        let mult = multiplier(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            input: input.to_string(),
            suffix: suffix.to_string(),
        })?;

        let overflow = || QuantityError::Overflow(input.to_string());
        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = digits.parse().map_err(|_| overflow())?;
        let scale = 10i128
            .checked_pow(u32::try_from(frac_part.len()).map_err(|_| overflow())?)
            .ok_or_else(overflow)?;
        let scaled = mantissa.checked_mul(mult).ok_or_else(overflow)?;
        let milli = (scaled + scale - 1) / scale;

        Ok(Quantity { milli })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli % 1000 == 0 {
            write!(f, "{}", self.milli / 1000)
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
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => Ok(Quantity {
                milli: i128::from(n) * 1000,
            }),
        }
    }
}
