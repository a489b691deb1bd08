// Utility helpers for parsing and formatting.
//
// This module centralizes all the "dirty" number/date handling so the
// rest of the code can assume clean, typed values.
use crate::types::Cell;
use chrono::NaiveDate;
use num_format::{Locale, ToFormattedString};

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in form exports (commas, spaces, text).
///
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters (this also rules out
///   `NaN` and `inf`).
/// - Strips thousands separators like `","` before parsing.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Numeric view of a cell; anything non-numeric degrades to `None`.
pub fn cell_to_f64(cell: Option<&Cell>) -> Option<f64> {
    match cell? {
        Cell::Number(n) if n.is_finite() => Some(*n),
        Cell::Number(_) | Cell::Missing => None,
        Cell::Text(s) => parse_f64_safe(Some(s)),
    }
}

/// Dates are ISO 8601 calendar dates, `YYYY-MM-DD`, optionally followed by a
/// time part (`2024-03-01T08:15:00+03:00`, `2024-03-01 08:15`) which is ignored.
pub fn parse_date_safe(s: Option<&str>) -> Option<NaiveDate> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    let date_part = match s.get(10..11) {
        Some("T") | Some(" ") => &s[..10],
        _ => s,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

pub fn cell_to_date(cell: Option<&Cell>) -> Option<NaiveDate> {
    match cell? {
        Cell::Text(s) => parse_date_safe(Some(s)),
        Cell::Number(_) | Cell::Missing => None,
    }
}

/// Text view of a dimension cell, trimmed. Empty text counts as absent.
pub fn cell_to_label(cell: Option<&Cell>) -> Option<String> {
    match cell? {
        Cell::Text(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        // Integral codes render without a trailing ".0".
        Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
        Cell::Number(n) => Some(n.to_string()),
        Cell::Missing => None,
    }
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Format a floating-point value with:
    // - a fixed number of decimal places, and
    // - locale-aware thousands separators (e.g., `1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let abs_n = n.abs();
    // First, format to a plain fixed-decimal string like `1234567.89`.
    let s = format!("{:.*}", decimals, abs_n);
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    // Use `num-format` to insert commas into the integer portion; values
    // beyond `u64` keep their plain digits.
    let mut res = match int_part.parse::<u64>() {
        Ok(int_val) => int_val.to_formatted_string(&Locale::en),
        Err(_) => int_part.to_string(),
    };
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Thin wrapper around `num-format` for integer-like values. This is used
    // for counts in console messages (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}

/// `73.9%` style percentage with one decimal.
pub fn format_percent(v: f64) -> String {
    format!("{:.1}%", v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_tolerate_separators_but_not_text() {
        assert_eq!(parse_f64_safe(Some(" 1,234 ")), Some(1234.0));
        assert_eq!(parse_f64_safe(Some("bad")), None);
        assert_eq!(parse_f64_safe(Some("NaN")), None);
        assert_eq!(parse_f64_safe(Some("")), None);
        assert_eq!(parse_f64_safe(None), None);
    }

    #[test]
    fn non_finite_numbers_are_missing() {
        assert_eq!(cell_to_f64(Some(&Cell::Number(f64::NAN))), None);
        assert_eq!(cell_to_f64(Some(&Cell::Number(f64::INFINITY))), None);
        assert_eq!(cell_to_f64(Some(&Cell::Number(4.0))), Some(4.0));
    }

    #[test]
    fn dates_accept_iso_with_or_without_time() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1);
        assert_eq!(parse_date_safe(Some("2024-03-01")), d);
        assert_eq!(parse_date_safe(Some("2024-03-01T08:15:00+03:00")), d);
        assert_eq!(parse_date_safe(Some("2024-03-01 08:15")), d);
        assert_eq!(parse_date_safe(Some("01/03/2024")), None);
        assert_eq!(parse_date_safe(Some("2024-02-30")), None);
        assert_eq!(cell_to_date(Some(&Cell::Number(20240301.0))), None);
    }

    #[test]
    fn labels_trim_and_render_codes() {
        assert_eq!(cell_to_label(Some(&Cell::from("  Kisumu "))), Some("Kisumu".to_string()));
        assert_eq!(cell_to_label(Some(&Cell::from("   "))), None);
        assert_eq!(cell_to_label(Some(&Cell::Number(12.0))), Some("12".to_string()));
        assert_eq!(cell_to_label(Some(&Cell::Missing)), None);
    }

    #[test]
    fn formatting_groups_thousands() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-12.4, 0), "-12");
        assert_eq!(format_number(-0.0, 1), "0.0");
        assert_eq!(format_int(9855), "9,855");
        assert_eq!(format_percent(73.913), "73.9%");
    }

    #[test]
    fn formatting_survives_sums_past_i64() {
        assert_eq!(format_number(1e19, 0), "10,000,000,000,000,000,000");
        assert_eq!(format_number(1e20, 0), "100000000000000000000");
        assert_eq!(format_number(-1e19, 0), "-10,000,000,000,000,000,000");
    }
}
