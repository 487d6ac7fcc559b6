/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 19/10/26
******************************************************************************/

//! Scaled decimal values.
//!
//! The codec reads and writes the exponent and mantissa of a decimal field as
//! two independent sub-fields. [`DecimalValue`] is the caller-side pairing of
//! the two, with conversions to and from [`rust_decimal::Decimal`].

use crate::error::{FastError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest scale `rust_decimal` can represent.
const MAX_SCALE: u32 = 28;

/// A decimal as `mantissa * 10^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecimalValue {
    /// Power-of-ten exponent.
    pub exponent: i32,
    /// Integer mantissa.
    pub mantissa: i64,
}

impl DecimalValue {
    /// Creates a decimal from its parts.
    #[must_use]
    pub const fn new(exponent: i32, mantissa: i64) -> Self {
        Self { exponent, mantissa }
    }

    /// Converts to a `rust_decimal::Decimal`.
    ///
    /// # Errors
    /// Returns `FastError::InvalidConfig` when the scale exceeds 28 or a
    /// positive exponent overflows the 96-bit mantissa.
    pub fn to_decimal(&self) -> Result<Decimal> {
        if self.exponent <= 0 {
            let scale = self.exponent.unsigned_abs();
            if scale > MAX_SCALE {
                return Err(out_of_range(self));
            }
            return Ok(Decimal::new(self.mantissa, scale));
        }
        let mut value = Decimal::from(self.mantissa);
        for _ in 0..self.exponent {
            value = value
                .checked_mul(Decimal::TEN)
                .ok_or_else(|| out_of_range(self))?;
        }
        Ok(value)
    }

    /// Converts from a `rust_decimal::Decimal`, keeping its scale.
    ///
    /// # Errors
    /// Returns an error if the mantissa does not fit in 64 bits.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        let mantissa = i64::try_from(value.mantissa()).map_err(|_| {
            FastError::InvalidConfig(format!("decimal {value} mantissa exceeds 64 bits"))
        })?;
        Ok(Self {
            exponent: -(value.scale() as i32),
            mantissa,
        })
    }
}

fn out_of_range(value: &DecimalValue) -> FastError {
    FastError::InvalidConfig(format!(
        "decimal {}e{} is outside the representable range",
        value.mantissa, value.exponent
    ))
}

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Ok(value) => write!(f, "{value}"),
            Err(_) => write!(f, "{}e{}", self.mantissa, self.exponent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_decimal_negative_exponent() {
        let value = DecimalValue::new(-2, 12345);
        assert_eq!(value.to_decimal().unwrap(), Decimal::from_str("123.45").unwrap());
        assert_eq!(value.to_string(), "123.45");
    }

    #[test]
    fn test_decimal_positive_exponent() {
        let value = DecimalValue::new(3, 7);
        assert_eq!(value.to_decimal().unwrap(), Decimal::from(7000));
    }

    #[test]
    fn test_decimal_scale_too_large() {
        assert!(DecimalValue::new(-29, 1).to_decimal().is_err());
        assert_eq!(DecimalValue::new(-29, 1).to_string(), "1e-29");
    }

    #[test]
    fn test_decimal_from_rust_decimal() {
        let value = DecimalValue::from_decimal(Decimal::from_str("-0.0042").unwrap()).unwrap();
        assert_eq!(value, DecimalValue::new(-4, -42));
    }
}
