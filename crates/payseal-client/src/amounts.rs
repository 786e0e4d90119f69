//! Amount parsing and formatting.
//!
//! Balances travel as integer micro-units. Parsing rounds half-up at the
//! cutoff digit; USD formatting rounds half-up to two decimal places.

use crate::error::{ClientError, Result};

/// Parse a decimal string into micro-units with `decimals` places.
///
/// Digits beyond `decimals` are cut off; a cutoff digit of five or more
/// rounds the result up.
pub fn to_micro(value: &str, decimals: u32) -> Result<u128> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ClientError::InvalidAmount("empty string".into()));
    }

    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(ClientError::InvalidAmount(value.into()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ClientError::InvalidAmount(value.into()));
    }

    let scale = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| ClientError::InvalidAmount("decimals out of range".into()))?;

    let int_units: u128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| ClientError::InvalidAmount(value.into()))?
    };

    let decimals = decimals as usize;
    let kept = &frac_part[..frac_part.len().min(decimals)];
    let mut frac_units: u128 = if kept.is_empty() {
        0
    } else {
        let parsed: u128 = kept
            .parse()
            .map_err(|_| ClientError::InvalidAmount(value.into()))?;
        parsed * 10u128.pow((decimals - kept.len()) as u32)
    };

    if let Some(cutoff) = frac_part.as_bytes().get(decimals) {
        if *cutoff >= b'5' {
            frac_units += 1;
        }
    }

    int_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(|| ClientError::InvalidAmount("amount too large".into()))
}

/// Render micro-units as a plain decimal string, trailing zeros trimmed.
pub fn format_micro(amount: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let int_part = amount / scale;
    let frac_part = amount % scale;
    if frac_part == 0 {
        return int_part.to_string();
    }
    let frac = format!("{:0width$}", frac_part, width = decimals as usize);
    format!("{int_part}.{}", frac.trim_end_matches('0'))
}

/// Render micro-units as a two-decimal USD string, half-up.
///
/// `rate` converts token units to USD; `None` means 1:1.
pub fn format_micro_to_usd(amount: u128, rate: Option<f64>, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let cents = match rate {
        None => (amount * 100 + scale / 2) / scale,
        Some(rate) if rate.is_finite() && rate >= 0.0 => {
            let usd = amount as f64 / scale as f64 * rate;
            (usd * 100.0).round() as u128
        }
        Some(_) => (amount * 100 + scale / 2) / scale,
    };
    format!("{}.{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_micro_plain() {
        assert_eq!(to_micro("1.005", 6).unwrap(), 1_005_000);
        assert_eq!(to_micro("0", 6).unwrap(), 0);
        assert_eq!(to_micro("12", 6).unwrap(), 12_000_000);
        assert_eq!(to_micro(".5", 6).unwrap(), 500_000);
        assert_eq!(to_micro("3.", 6).unwrap(), 3_000_000);
    }

    #[test]
    fn test_to_micro_ties_round_up_at_cutoff() {
        assert_eq!(to_micro("1.0000005", 6).unwrap(), 1_000_001);
        assert_eq!(to_micro("1.0000004", 6).unwrap(), 1_000_000);
        // Only the cutoff digit decides; later digits are ignored.
        assert_eq!(to_micro("1.00000049", 6).unwrap(), 1_000_000);
        assert_eq!(to_micro("2.5", 0).unwrap(), 3);
    }

    #[test]
    fn test_to_micro_rejects_garbage() {
        assert!(to_micro("", 6).is_err());
        assert!(to_micro(".", 6).is_err());
        assert!(to_micro("1.2.3", 6).is_err());
        assert!(to_micro("-1", 6).is_err());
        assert!(to_micro("1e6", 6).is_err());
    }

    #[test]
    fn test_format_micro() {
        assert_eq!(format_micro(1_005_000, 6), "1.005");
        assert_eq!(format_micro(1_000_000, 6), "1");
        assert_eq!(format_micro(0, 6), "0");
        assert_eq!(format_micro(123, 6), "0.000123");
    }

    #[test]
    fn test_format_micro_to_usd_half_up() {
        assert_eq!(format_micro_to_usd(1_005_000, None, 6), "1.01");
        assert_eq!(format_micro_to_usd(1_004_999, None, 6), "1.00");
        assert_eq!(format_micro_to_usd(0, None, 6), "0.00");
    }

    #[test]
    fn test_format_micro_to_usd_with_rate() {
        assert_eq!(format_micro_to_usd(2_000_000, Some(1.5), 6), "3.00");
        assert_eq!(format_micro_to_usd(1_000_000, Some(0.333), 6), "0.33");
    }

    #[test]
    fn test_roundtrip() {
        let micro = to_micro("41.25", 6).unwrap();
        assert_eq!(format_micro(micro, 6), "41.25");
    }
}
