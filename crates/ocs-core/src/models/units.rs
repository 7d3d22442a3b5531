//! Decimal helpers for usage and monetary quantities
//!
//! Time usage is carried as nanoseconds so that `27s` and a raw
//! `27000000000` are the same quantity.

use crate::error::AppError;
use crate::AppResult;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Nanoseconds in one second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Returns `secs` seconds expressed in nanoseconds
pub fn seconds(secs: i64) -> Decimal {
    Decimal::from(secs) * Decimal::from(NANOS_PER_SECOND)
}

fn unit_nanos(unit: &str) -> Option<Decimal> {
    let nanos: i64 = match unit {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SECOND,
        "m" => 60 * NANOS_PER_SECOND,
        "h" => 3600 * NANOS_PER_SECOND,
        _ => return None,
    };
    Some(Decimal::from(nanos))
}

/// Parses a usage quantity
///
/// Accepts duration strings made of number/unit pairs (`3m27s`, `1.5h`,
/// `500ms`) which are converted to nanoseconds, or a plain decimal which
/// is returned as-is.
pub fn parse_usage(input: &str) -> AppResult<Decimal> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AppError::InvalidInput("empty usage".to_string()));
    }
    if let Ok(value) = Decimal::from_str(input) {
        if value.is_sign_negative() {
            return Err(AppError::InvalidInput(format!("negative usage: {}", input)));
        }
        return Ok(value);
    }

    let mut total = Decimal::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(AppError::InvalidInput(format!("invalid usage: {}", input)));
        }
        let number = Decimal::from_str(&rest[..num_end])
            .map_err(|_| AppError::InvalidInput(format!("invalid usage: {}", input)))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let multiplier = unit_nanos(&rest[..unit_end])
            .ok_or_else(|| AppError::InvalidInput(format!("invalid usage unit: {}", input)))?;
        rest = &rest[unit_end..];

        total = number
            .checked_mul(multiplier)
            .and_then(|nanos| total.checked_add(nanos))
            .ok_or_else(|| AppError::InvalidInput(format!("usage out of range: {}", input)))?;
    }
    Ok(total.normalize())
}

/// `a * b`, an overflow is reported as invalid input
pub fn mul_checked(a: Decimal, b: Decimal) -> AppResult<Decimal> {
    a.checked_mul(b)
        .ok_or_else(|| AppError::InvalidInput(format!("quantity out of range: {} * {}", a, b)))
}

/// `a + b`, an overflow is reported as invalid input
pub fn add_checked(a: Decimal, b: Decimal) -> AppResult<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| AppError::InvalidInput(format!("quantity out of range: {} + {}", a, b)))
}

/// Converts a JSON option value into a Decimal
///
/// Numbers are read from their textual form so no binary float rounding
/// leaks in; strings go through [`parse_usage`].
pub fn decimal_from_value(value: &Value) -> AppResult<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map_err(|e| AppError::InvalidInput(format!("invalid number {}: {}", text, e)))
        }
        Value::String(s) => {
            let s = s.trim();
            match Decimal::from_str(s) {
                Ok(d) => Ok(d),
                Err(_) => parse_usage(s),
            }
        }
        other => Err(AppError::InvalidInput(format!(
            "unsupported numeric value: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_durations() {
        assert_eq!(parse_usage("27s").unwrap(), dec!(27000000000));
        assert_eq!(parse_usage("3m27s").unwrap(), dec!(207000000000));
        assert_eq!(parse_usage("1h").unwrap(), dec!(3600000000000));
        assert_eq!(parse_usage("1.5s").unwrap(), dec!(1500000000));
        assert_eq!(parse_usage("250ms").unwrap(), dec!(250000000));
        assert_eq!(parse_usage("10ns").unwrap(), dec!(10));
    }

    #[test]
    fn test_parse_plain_numbers() {
        assert_eq!(parse_usage("1024").unwrap(), dec!(1024));
        assert_eq!(parse_usage("0.5").unwrap(), dec!(0.5));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_usage("").is_err());
        assert!(parse_usage("-5").is_err());
        assert!(parse_usage("10x").is_err());
        assert!(parse_usage("s10").is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_duration() {
        assert!(matches!(
            parse_usage("99999999999999999999h"),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_usage("79228162514264337593543950335ns1ns"),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(mul_checked(dec!(1.5), dec!(2)).unwrap(), dec!(3));
        assert_eq!(add_checked(dec!(1.5), dec!(2)).unwrap(), dec!(3.5));
        assert!(matches!(
            mul_checked(Decimal::MAX, dec!(2)),
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            add_checked(Decimal::MAX, Decimal::ONE),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_decimal_from_value() {
        assert_eq!(decimal_from_value(&json!(-100)).unwrap(), dec!(-100));
        assert_eq!(decimal_from_value(&json!(0.1)).unwrap(), dec!(0.1));
        assert_eq!(decimal_from_value(&json!("40s")).unwrap(), seconds(40));
        assert_eq!(decimal_from_value(&json!("-1.5")).unwrap(), dec!(-1.5));
        assert!(decimal_from_value(&json!(true)).is_err());
    }
}
