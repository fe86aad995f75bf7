//! Canonical forms for reported and calculated values.
//!
//! Accepted inputs, tried in order: width-prefixed literals (`16'h0050`),
//! `0x`-prefixed hex, all-decimal-digit strings (read as decimal), and bare
//! hex containing `A`-`F`. Canonical form is `0x` followed by upper-case hex
//! digits without leading zeros.

use crate::equations::normalize::parse_width_literal;

fn parse_unsigned(value: &str) -> Option<u128> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(v) = parse_width_literal(value) {
        return Some(v);
    }
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        return u128::from_str_radix(&hex.replace('_', ""), 16).ok();
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return value.parse().ok();
    }
    if value.chars().all(|c| c.is_ascii_hexdigit()) {
        return u128::from_str_radix(value, 16).ok();
    }
    None
}

/// `0x`-canonical form of `value`, or `None` when it is not a recognizable
/// integer literal.
pub fn normalize_hex_value(value: &str) -> Option<String> {
    parse_unsigned(value).map(|v| format!("0x{v:X}"))
}

/// Numeric reading of `value`: integer literal forms first, then signed or
/// fractional decimals.
pub fn convert_to_decimal(value: &str) -> Option<f64> {
    if let Some(v) = parse_unsigned(value) {
        return Some(v as f64);
    }
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Whether a calculated value and a reported value denote the same quantity.
pub fn compare_values(calculated: &str, reported: &str) -> bool {
    let (calculated, reported) = (calculated.trim(), reported.trim());
    if calculated.is_empty() || reported.is_empty() {
        return false;
    }
    if calculated.eq_ignore_ascii_case(reported) {
        return true;
    }
    if let (Some(a), Some(b)) = (normalize_hex_value(calculated), normalize_hex_value(reported)) {
        if a == b {
            return true;
        }
    }
    match (convert_to_decimal(calculated), convert_to_decimal(reported)) {
        (Some(a), Some(b)) => (a - b).abs() < 1e-9,
        _ => false,
    }
}
