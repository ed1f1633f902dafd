//! Conversion of human-readable memory sizes.
//!
//! SLURM counts memory in megabytes. A bare number is taken as MB; the
//! suffixes `K`, `M`, `G` and `T` scale by powers of 1024. Kilobyte values
//! are truncated towards zero.

use crate::error::{SchedError, SchedResult};

/// Convert a size string such as `"4G"` or `"2048"` to megabytes.
pub fn convert_to_megabytes(value: &str) -> SchedResult<u64> {
    let trimmed = value.trim();

    if let Ok(mb) = trimmed.parse::<u64>() {
        return Ok(mb);
    }

    let Some(suffix) = trimmed.chars().last() else {
        return Err(SchedError::InvalidUnit("empty value".to_string()));
    };
    let body = &trimmed[..trimmed.len() - suffix.len_utf8()];
    let amount: u64 = body
        .parse()
        .map_err(|_| SchedError::InvalidUnit(trimmed.to_string()))?;

    let scaled = match suffix.to_ascii_uppercase() {
        'K' => Some(amount / 1024),
        'M' => Some(amount),
        'G' => amount.checked_mul(1024),
        'T' => amount.checked_mul(1024 * 1024),
        _ => None,
    };
    scaled.ok_or_else(|| SchedError::InvalidUnit(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_to_base() {
        assert_eq!(convert_to_megabytes("1001").unwrap(), 1001);
        assert_eq!(convert_to_megabytes(" 64 \n").unwrap(), 64);
    }

    #[test]
    fn test_kilobytes_truncate() {
        assert_eq!(convert_to_megabytes("42K").unwrap(), 0);
        assert_eq!(convert_to_megabytes("2048K").unwrap(), 2);
        assert_eq!(convert_to_megabytes("2180K").unwrap(), 2);
    }

    #[test]
    fn test_scaled_units() {
        assert_eq!(convert_to_megabytes("42M").unwrap(), 42);
        assert_eq!(convert_to_megabytes("42G").unwrap(), 42 * 1024);
        assert_eq!(convert_to_megabytes("42T").unwrap(), 42 * 1024 * 1024);
        assert_eq!(convert_to_megabytes("2g").unwrap(), 2048);
    }

    #[test]
    fn test_invalid_units() {
        assert!(matches!(
            convert_to_megabytes("42X"),
            Err(SchedError::InvalidUnit(_))
        ));
        assert!(convert_to_megabytes("").is_err());
        assert!(convert_to_megabytes("G").is_err());
        assert!(convert_to_megabytes("1.5G").is_err());
        assert!(convert_to_megabytes(&format!("{}T", u64::MAX)).is_err());
    }
}
