//! Shared helpers: Decimal ↔ f64 conversions for NUMERIC columns and
//! hour truncation for cache keys.
//!
//! Two f64→Decimal strategies exist because wind figures and coordinates
//! need different precision:
//!
//! - `f64_to_decimal_1dp`: rounds to 1 decimal place (wind speed, direction, yaw, percentages)
//! - `f64_to_decimal_full`: keeps full f64 precision (lat, lon, distance, confidence)
//!
//! Both return `Decimal::ZERO` for non-finite inputs (NaN, ±Inf).

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Convert an f64 to Decimal, rounded to 1 decimal place.
pub(crate) fn f64_to_decimal_1dp(v: f64) -> Decimal {
    if !v.is_finite() {
        tracing::warn!(
            "f64_to_decimal_1dp received non-finite value {}, defaulting to 0",
            v
        );
        return Decimal::ZERO;
    }
    Decimal::from_str_exact(&format!("{:.1}", v)).unwrap_or_default()
}

/// Convert an optional f64 to Decimal (1 decimal place).
pub(crate) fn opt_f64_to_decimal_1dp(v: Option<f64>) -> Option<Decimal> {
    v.map(f64_to_decimal_1dp)
}

/// Convert an f64 to Decimal preserving full precision.
pub(crate) fn f64_to_decimal_full(v: f64) -> Decimal {
    if !v.is_finite() {
        tracing::warn!(
            "f64_to_decimal_full received non-finite value {}, defaulting to 0",
            v
        );
        return Decimal::ZERO;
    }
    Decimal::from_f64(v).unwrap_or_else(|| Decimal::new(v as i64, 0))
}

/// Convert an optional f64 to Decimal preserving full precision.
pub(crate) fn opt_f64_to_decimal_full(v: Option<f64>) -> Option<Decimal> {
    v.map(f64_to_decimal_full)
}

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Convert an Option<Decimal> to Option<f64>.
pub(crate) fn opt_dec_to_f64(d: Option<Decimal>) -> Option<f64> {
    d.and_then(|v| v.to_f64())
}

/// Floor a datetime to the start of its hour.
pub(crate) fn floor_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.time().hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_f64_to_decimal_1dp_rounds() {
        let d = f64_to_decimal_1dp(3.16);
        assert_eq!(d, Decimal::from_str("3.2").unwrap());
    }

    #[test]
    fn test_f64_to_decimal_1dp_nan() {
        assert_eq!(f64_to_decimal_1dp(f64::NAN), Decimal::ZERO);
    }

    #[test]
    fn test_f64_to_decimal_full_keeps_precision() {
        let d = f64_to_decimal_full(53.443_217);
        assert!((dec_to_f64(d) - 53.443_217).abs() < 1e-12);
    }

    #[test]
    fn test_f64_to_decimal_full_infinity() {
        assert_eq!(f64_to_decimal_full(f64::INFINITY), Decimal::ZERO);
        assert_eq!(f64_to_decimal_full(f64::NEG_INFINITY), Decimal::ZERO);
    }

    #[test]
    fn test_optional_conversions() {
        assert_eq!(opt_f64_to_decimal_1dp(None), None);
        assert_eq!(
            opt_f64_to_decimal_1dp(Some(3.14)),
            Some(Decimal::from_str("3.1").unwrap())
        );
        assert_eq!(opt_f64_to_decimal_full(None), None);
        assert_eq!(opt_dec_to_f64(None), None);
        let d = Decimal::from_str("3.14").unwrap();
        assert!((opt_dec_to_f64(Some(d)).unwrap() - 3.14).abs() < 1e-10);
    }

    #[test]
    fn test_floor_to_hour() {
        let dt = "2024-05-01T10:50:31Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            floor_to_hour(dt),
            "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        let exact = "2024-05-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(floor_to_hour(exact), exact);
    }
}
