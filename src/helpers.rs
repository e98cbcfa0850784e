//! Shared helpers for Decimal → f64 conversions. The spatial/accident tables
//! store coordinates and elevations as `NUMERIC` for exact storage, but every
//! downstream kernel works in `f64`; these two functions are the only
//! crossing point, so precision-loss decisions are centralized here.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Convert a Decimal to f64, defaulting to 0.0 for values that can't be represented.
pub(crate) fn dec_to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Convert an Option<Decimal> to Option<f64>.
pub(crate) fn opt_dec_to_f64(d: Option<Decimal>) -> Option<f64> {
    d.and_then(|v| v.to_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_dec_to_f64_normal() {
        let d = Decimal::from_str("3.14").unwrap();
        assert!((dec_to_f64(d) - 3.14).abs() < 1e-10);
    }

    #[test]
    fn test_dec_to_f64_zero() {
        assert_eq!(dec_to_f64(Decimal::ZERO), 0.0);
    }

    #[test]
    fn test_opt_dec_to_f64() {
        assert_eq!(opt_dec_to_f64(None), None);
        let d = Decimal::from_str("3.14").unwrap();
        assert!((opt_dec_to_f64(Some(d)).unwrap() - 3.14).abs() < 1e-10);
    }
}
