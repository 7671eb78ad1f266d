//! Money Conversion Module
//!
//! Conversion between the internal minor-unit `u64` representation and the
//! client-facing `Decimal`/string representation. All amounts entering the
//! engine go through this module.
//!
//! ## Internal Representation
//! - Amounts are `u64` counts of the currency's minor unit (cents for USD)
//! - The scale factor is `10^decimals`
//! - Precision beyond the minor unit is rejected, never truncated

use rust_decimal::prelude::*;
use thiserror::Error;

/// Amount in the currency's minor unit
pub type MinorUnits = u64;

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Convert a client string amount to minor units
///
/// ```text
/// parse_amount("12.5", 2)  == Ok(1250)
/// parse_amount(".5", 2)    -> InvalidFormat
/// parse_amount("1.005", 2) -> PrecisionOverflow
/// ```
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<MinorUnits, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            // Require both sides of the dot: ".5" and "5." are ambiguous
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in amount: {}",
            amount_str
        )));
    }

    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let whole_num: u64 = whole.parse::<u64>().map_err(|_| MoneyError::Overflow)?;

    let frac_num: u64 = if frac.is_empty() {
        0
    } else {
        let frac_padded = format!("{:0<width$}", frac, width = decimals as usize);
        frac_padded
            .parse::<u64>()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let amount = whole_num
        .checked_mul(10u64.pow(decimals))
        .and_then(|v| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    if amount == 0 {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(amount)
}

/// Convert a `Decimal` (API boundary) to minor units
pub fn parse_decimal(decimal: Decimal, decimals: u32) -> Result<MinorUnits, MoneyError> {
    if decimal.is_sign_negative() || decimal.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let normalized = decimal.normalize();
    if normalized.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: normalized.scale(),
            max: decimals,
        });
    }

    let scaled = normalized
        .checked_mul(Decimal::from(10u64.pow(decimals)))
        .ok_or(MoneyError::Overflow)?;

    scaled.to_u64().ok_or(MoneyError::Overflow)
}

/// Convert minor units back to a `Decimal` with `decimals` places
pub fn to_decimal(value: MinorUnits, decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(value as i128, decimals)
}

/// Convert minor units to a display string
pub fn format_amount(value: MinorUnits, decimals: u32) -> String {
    format!("{:.prec$}", to_decimal(value, decimals), prec = decimals as usize)
}
