//! Minor-unit monetary arithmetic.
//!
//! All persisted amounts are integers in the currency's smallest denomination
//! (cents). Conversion from major-unit decimals happens exactly once, at this
//! boundary; validation and duplicate matching operate on the integer values
//! so repeated read/update cycles cannot accumulate floating-point drift.

/// Tolerance for arithmetic cross-checks, in minor units (0.01 major units).
pub const TOLERANCE_MINOR: i64 = 1;

/// Convert a major-unit decimal amount to integer minor units.
pub fn to_minor(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Convert integer minor units back to a major-unit decimal.
pub fn to_major(minor: i64) -> f64 {
    minor as f64 / 100.0
}

/// Format minor units as a major-unit decimal string, e.g. `539` → `"5.39"`.
pub fn format_major(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Whether two minor-unit amounts agree within [`TOLERANCE_MINOR`].
pub fn within_tolerance(a: i64, b: i64) -> bool {
    (a - b).abs() <= TOLERANCE_MINOR
}

/// Coerce a recognized-text amount into a decimal.
///
/// Strips currency symbols and thousands separators. When both `.` and `,`
/// appear, the last one wins as the decimal separator, covering both
/// `1,234.56` and `1.234,00`. Returns `None` when nothing numeric remains.
pub fn parse_decimal(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let normalized = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(point), Some(comma)) if point > comma => cleaned.replace(',', ""),
        (Some(_), Some(_)) => cleaned.replace('.', "").replace(',', "."),
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_round_trip_has_no_drift() {
        let minor = to_minor(5.39);
        assert_eq!(minor, 539);
        assert_eq!(format_major(minor), "5.39");
        // Repeated read/update cycles stay exact.
        let mut m = minor;
        for _ in 0..100 {
            m = to_minor(to_major(m));
        }
        assert_eq!(m, 539);
    }

    #[test]
    fn rounds_half_away_from_floating_error() {
        // 19.99 is not exactly representable; rounding must still land on 1999.
        assert_eq!(to_minor(19.99), 1999);
        assert_eq!(to_minor(0.1 + 0.2), 30);
    }

    #[test]
    fn formats_negative_and_sub_unit_amounts() {
        assert_eq!(format_major(-1250), "-12.50");
        assert_eq!(format_major(7), "0.07");
        assert_eq!(format_major(0), "0.00");
    }

    #[test]
    fn coerces_currency_symbols_and_separators() {
        assert_eq!(parse_decimal("$1,234.56"), Some(1234.56));
        assert_eq!(parse_decimal("EUR 42,50"), Some(42.5));
        assert_eq!(parse_decimal("10.00"), Some(10.0));
        assert_eq!(parse_decimal("n/a"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn last_separator_wins_for_mixed_grouping() {
        // European grouping: period as thousands, comma as decimal.
        assert_eq!(parse_decimal("1.234,00"), Some(1234.0));
        assert_eq!(parse_decimal("1.234,56"), Some(1234.56));
        // And the reverse.
        assert_eq!(parse_decimal("1,234.56"), Some(1234.56));
    }

    #[test]
    fn tolerance_is_one_minor_unit() {
        assert!(within_tolerance(1000, 1001));
        assert!(within_tolerance(1000, 999));
        assert!(!within_tolerance(1000, 1002));
    }
}
