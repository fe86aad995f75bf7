//! Lexical passes applied to equation text before it is parsed.
//!
//! Order matters: placeholders are substituted first, then ternaries are
//! rewritten into `if(cond, a, b)` calls, then literals and rule-language
//! helper names are brought into the grammar's vocabulary.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::equations::models::{stringify_value, AttributeTable};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\blineitem\.([A-Za-z0-9_]+)\.value\b")
            .expect("static pattern compiles")
    })
}

fn width_literal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new("\"?(\\d+)['`´ʼ’]([hHbBdDoO])([0-9a-fA-F_]+)\"?")
            .expect("static pattern compiles")
    })
}

fn rule_helper_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:Math\.(Round|Floor|Ceiling|Max|Min|Abs|Pow)|Convert\.(ToDouble|ToInt32|ToInt64))\s*\(")
            .expect("static pattern compiles")
    })
}

/// Distinct placeholder identifiers in first-seen order.
pub fn discover_attributes(equation: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for caps in placeholder_re().captures_iter(equation) {
        let name = &caps[1];
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Substitution {
    pub text: String,
    /// `NAME: value` for each distinct attribute, in first-seen order.
    pub used: Vec<String>,
    /// Attributes absent from the table; these were replaced with `0`.
    pub missing: Vec<String>,
}

/// An attribute value as equation text. Numbers, booleans and numeric or
/// width-literal strings are spliced bare; other strings become quoted
/// literals so their content cannot change the expression's shape.
pub fn attribute_literal(value: &Value) -> String {
    match value {
        Value::String(s) if !is_bare_literal(s) => quote_literal(s),
        other => stringify_value(other),
    }
}

fn is_bare_literal(s: &str) -> bool {
    let numeric = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && s.parse::<f64>().is_ok();
    let hex = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .is_some_and(|h| !h.is_empty() && h.chars().all(|c| c.is_ascii_hexdigit()));
    let width = width_literal_re()
        .find(s)
        .is_some_and(|m| m.range() == (0..s.len()));
    numeric || hex || width || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("false")
}

fn quote_literal(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Replaces every `lineItem.NAME.Value` with the table's value for `NAME`.
pub fn substitute_attributes(equation: &str, table: &AttributeTable) -> Substitution {
    let mut used = Vec::new();
    let mut missing = Vec::new();

    for name in discover_attributes(equation) {
        match table.stringify(&name) {
            Some(value) => used.push(format!("{name}: {value}")),
            None => {
                used.push(format!("{name}: 0"));
                missing.push(name);
            }
        }
    }

    let text = placeholder_re()
        .replace_all(equation, |caps: &Captures| {
            table
                .get(&caps[1])
                .map(attribute_literal)
                .unwrap_or_else(|| "0".to_string())
        })
        .into_owned();

    Substitution {
        text,
        used,
        missing,
    }
}

/// Rewrites `cond ? a : b` into `if(cond, a, b)`, left-most first, until no
/// ternary remains. Malformed input stops the loop and the partial rewrite is
/// returned unchanged from that point on.
pub fn rewrite_ternaries(expr: &str) -> String {
    let mut expr = map_logical_operators(expr);

    loop {
        let mask = quote_mask(&expr);
        let Some(q) = find_unquoted(&expr, &mask, b'?') else {
            break;
        };
        match rewrite_one(&expr, &mask, q) {
            Some(next) => expr = next,
            None => break,
        }
    }
    expr
}

/// `&&` and `||` outside string literals become `and` and `or`.
fn map_logical_operators(expr: &str) -> String {
    let mask = quote_mask(expr);
    let bytes = expr.as_bytes();
    let mut out = String::with_capacity(expr.len());
    let mut copied = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        let word = match &bytes[i..i + 2] {
            b"&&" if !mask[i] => " and ",
            b"||" if !mask[i] => " or ",
            _ => {
                i += 1;
                continue;
            }
        };
        out.push_str(&expr[copied..i]);
        out.push_str(word);
        i += 2;
        copied = i;
    }
    out.push_str(&expr[copied..]);
    out
}

fn quote_mask(s: &str) -> Vec<bool> {
    let mut in_quotes = false;
    let mut escaped = false;
    s.bytes()
        .map(|b| {
            let inside = in_quotes;
            if in_quotes && b == b'\\' && !escaped {
                escaped = true;
                return true;
            }
            if b == b'"' && !escaped {
                in_quotes = !in_quotes;
            }
            escaped = false;
            inside || b == b'"'
        })
        .collect()
}

fn find_unquoted(s: &str, mask: &[bool], needle: u8) -> Option<usize> {
    s.bytes()
        .enumerate()
        .find(|(i, b)| *b == needle && !mask[*i])
        .map(|(i, _)| i)
}

fn rewrite_one(s: &str, mask: &[bool], q: usize) -> Option<String> {
    let bytes = s.as_bytes();

    // Condition: back to the nearest unbalanced opener, comma, or colon.
    let mut start = 0;
    let mut depth = 0i32;
    for i in (0..q).rev() {
        if mask[i] {
            continue;
        }
        match bytes[i] {
            b')' | b'}' => depth += 1,
            b'(' | b'{' if depth == 0 => {
                start = i + 1;
                break;
            }
            b'(' | b'{' => depth -= 1,
            b',' | b':' if depth == 0 => {
                start = i + 1;
                break;
            }
            _ => {}
        }
    }

    // Matching colon, skipping nested ternaries.
    let mut colon = None;
    let mut depth = 0i32;
    let mut nested = 0;
    for i in q + 1..bytes.len() {
        if mask[i] {
            continue;
        }
        match bytes[i] {
            b'(' | b'{' => depth += 1,
            b')' | b'}' if depth == 0 => return None,
            b')' | b'}' => depth -= 1,
            b',' if depth == 0 => return None,
            b'?' if depth == 0 => nested += 1,
            b':' if depth == 0 && nested > 0 => nested -= 1,
            b':' if depth == 0 => {
                colon = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;

    // False branch: forward to the nearest unbalanced closer or comma.
    let mut end = bytes.len();
    let mut depth = 0i32;
    let mut nested = 0;
    for i in colon + 1..bytes.len() {
        if mask[i] {
            continue;
        }
        match bytes[i] {
            b'(' | b'{' => depth += 1,
            b')' | b'}' if depth == 0 => {
                end = i;
                break;
            }
            b')' | b'}' => depth -= 1,
            b',' if depth == 0 => {
                end = i;
                break;
            }
            b'?' if depth == 0 => nested += 1,
            b':' if depth == 0 && nested > 0 => nested -= 1,
            b':' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }

    let condition_raw = &s[start..q];
    let if_false_raw = &s[colon + 1..end];
    let condition = condition_raw.trim();
    let if_true = s[q + 1..colon].trim();
    let if_false = if_false_raw.trim();
    if condition.is_empty() || if_true.is_empty() || if_false.is_empty() {
        return None;
    }

    let lead = &condition_raw[..condition_raw.len() - condition_raw.trim_start().len()];
    let trail = &if_false_raw[if_false_raw.trim_end().len()..];
    Some(format!(
        "{}{lead}if({condition}, {if_true}, {if_false}){trail}{}",
        &s[..start],
        &s[end..]
    ))
}

/// Converts width-prefixed literals to decimal and maps rule-language helpers
/// (`Math.Round`, `Convert.ToDouble`, ...) to grammar functions.
pub fn normalize_literals(expr: &str) -> String {
    let expr = width_literal_re().replace_all(expr, |caps: &Captures| {
        let radix = match caps[2].to_ascii_lowercase().as_str() {
            "h" => 16,
            "b" => 2,
            "d" => 10,
            _ => 8,
        };
        let digits = caps[3].replace('_', "");
        match u128::from_str_radix(&digits, radix) {
            Ok(value) => value.to_string(),
            Err(_) => caps[0].to_string(),
        }
    });

    rule_helper_re()
        .replace_all(&expr, |caps: &Captures| {
            let helper = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let name = match helper.as_str() {
                "round" => "round",
                "floor" => "floor",
                "ceiling" => "ceil",
                "max" => "max",
                "min" => "min",
                "abs" => "abs",
                "pow" => "pow",
                "todouble" => "float",
                _ => "int",
            };
            format!("{name}(")
        })
        .into_owned()
}

/// Parses a width-prefixed literal such as `16'h0050` anywhere in `value`.
pub fn parse_width_literal(value: &str) -> Option<u128> {
    let caps = width_literal_re().captures(value)?;
    let radix = match caps[2].to_ascii_lowercase().as_str() {
        "h" => 16,
        "b" => 2,
        "d" => 10,
        _ => 8,
    };
    u128::from_str_radix(&caps[3].replace('_', ""), radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn table(pairs: &[(&str, serde_json::Value)]) -> AttributeTable {
        AttributeTable::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_discover_is_distinct_and_ordered() {
        let eq = "lineItem.B.Value + lineItem.A.Value * lineItem.B.Value";
        assert_eq!(discover_attributes(eq), vec!["B", "A"]);
    }

    #[test]
    fn test_discover_is_case_insensitive_on_namespace() {
        assert_eq!(discover_attributes("LINEITEM.CORE_CNT.VALUE"), vec!["CORE_CNT"]);
    }

    #[test]
    fn test_discover_none_for_direct_literal() {
        assert!(discover_attributes("3'h3").is_empty());
    }

    #[test]
    fn test_substitute_replaces_every_occurrence() {
        let t = table(&[("MCR_FREQ", json!(200)), ("SSTPP4_DDR_FREQ", json!(400))]);
        let sub = substitute_attributes(
            "dec2hex(Max(lineItem.MCR_FREQ.Value,lineItem.SSTPP4_DDR_FREQ.Value)/200)",
            &t,
        );
        assert_eq!(sub.text, "dec2hex(Max(200,400)/200)");
        assert_eq!(sub.used, vec!["MCR_FREQ: 200", "SSTPP4_DDR_FREQ: 400"]);
        assert!(sub.missing.is_empty());
    }

    #[test]
    fn test_substitute_defaults_missing_to_zero() {
        let sub = substitute_attributes("lineItem.GONE.Value + 1", &AttributeTable::default());
        assert_eq!(sub.text, "0 + 1");
        assert_eq!(sub.missing, vec!["GONE"]);
    }

    #[test]
    fn test_substitute_quotes_text_values() {
        let t = table(&[("SKU", json!("Xeon Gold")), ("X", json!("1) + (1000"))]);
        let sub = substitute_attributes(r#"if(lineItem.SKU.Value == "Xeon Gold", 1, 0)"#, &t);
        assert_eq!(sub.text, r#"if("Xeon Gold" == "Xeon Gold", 1, 0)"#);
        assert_eq!(sub.used, vec!["SKU: Xeon Gold"]);

        let sub = substitute_attributes("max(lineItem.X.Value, 0)", &t);
        assert_eq!(sub.text, r#"max("1) + (1000", 0)"#);
    }

    #[test]
    fn test_substitute_escapes_quotes_and_backslashes() {
        let t = table(&[("NOTE", json!(r#"say "hi" \ bye"#))]);
        let sub = substitute_attributes("lineItem.NOTE.Value", &t);
        assert_eq!(sub.text, r#""say \"hi\" \\ bye""#);
    }

    #[test]
    fn test_substitute_keeps_numeric_strings_bare() {
        let t = table(&[
            ("A", json!("200")),
            ("B", json!("0x1F")),
            ("C", json!("16'h0050")),
            ("D", json!("TRUE")),
            ("E", json!("-2.5")),
        ]);
        let sub = substitute_attributes(
            "lineItem.A.Value lineItem.B.Value lineItem.C.Value lineItem.D.Value lineItem.E.Value",
            &t,
        );
        assert_eq!(sub.text, "200 0x1F 16'h0050 TRUE -2.5");
    }

    #[test]
    fn test_attribute_literal_non_strings() {
        assert_eq!(attribute_literal(&json!(24)), "24");
        assert_eq!(attribute_literal(&json!(false)), "false");
        assert_eq!(attribute_literal(&json!(null)), "0");
        assert_eq!(attribute_literal(&json!("")), r#""""#);
    }

    #[test]
    fn test_logical_operators_inside_quotes_untouched() {
        assert_eq!(
            rewrite_ternaries(r#"x == "a&&b" || y == "c||d""#),
            r#"x == "a&&b"  or  y == "c||d""#
        );
    }

    #[test]
    fn test_rewrite_many_sibling_ternaries() {
        let input = format!("max({})", vec!["0 > 1 ? 1 : 0"; 300].join(", "));
        let out = rewrite_ternaries(&input);
        assert!(!out.contains('?'));
        assert_eq!(out.matches("if(0 > 1, 1, 0)").count(), 300);
    }

    #[test]
    fn test_rewrite_simple_ternary() {
        assert_eq!(rewrite_ternaries("a > 1 ? 5 : 6"), "if(a > 1, 5, 6)");
    }

    #[test]
    fn test_rewrite_maps_logical_operators() {
        assert_eq!(
            rewrite_ternaries("x == 1 && y == 2 ? 1 : 0"),
            "if(x == 1  and  y == 2, 1, 0)"
        );
    }

    #[test]
    fn test_rewrite_nested_false_branch() {
        let out = rewrite_ternaries("a == 1 ? 10 : a == 2 ? 20 : 30");
        assert_eq!(out, "if(a == 1, 10, if(a == 2, 20, 30))");
    }

    #[test]
    fn test_rewrite_nested_true_branch() {
        let out = rewrite_ternaries("a ? b ? 1 : 2 : 3");
        assert_eq!(out, "if(a, if(b, 1, 2), 3)");
    }

    #[test]
    fn test_rewrite_inside_call_arguments() {
        let out = rewrite_ternaries("dec2hex((x > 4 ? x : 4) * 2)");
        assert_eq!(out, "dec2hex((if(x > 4, x, 4)) * 2)");
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        for input in [
            "a > 1 ? 5 : 6",
            "a == 1 ? 10 : a == 2 ? 20 : 30",
            "max(a ? 1 : 2, b ? 3 : 4)",
            "1 + 2",
        ] {
            let once = rewrite_ternaries(input);
            assert!(!once.contains('?'), "{once}");
            assert_eq!(rewrite_ternaries(&once), once);
        }
    }

    #[test]
    fn test_rewrite_halts_on_missing_colon() {
        let out = rewrite_ternaries("a ? 1");
        assert_eq!(out, "a ? 1");
    }

    #[test]
    fn test_rewrite_ignores_quoted_question_marks() {
        assert_eq!(rewrite_ternaries(r#""why?" == x"#), r#""why?" == x"#);
    }

    #[test]
    fn test_normalize_width_literals() {
        assert_eq!(normalize_literals("16'h0050 + 4'b1010 + 8'd12 + 3'o7"), "80 + 10 + 12 + 7");
    }

    #[test]
    fn test_normalize_strips_quotes_around_width_literals() {
        assert_eq!(
            normalize_literals(r#"{"HEDT":"1'h1"},{"STANDARD":"1'h0"}"#),
            r#"{"HEDT":1},{"STANDARD":0}"#
        );
    }

    #[test]
    fn test_normalize_leaves_invalid_binary_alone() {
        assert_eq!(normalize_literals("2'b12"), "2'b12");
    }

    #[test]
    fn test_normalize_rule_helpers() {
        assert_eq!(
            normalize_literals("Math.Round(Convert.ToDouble(x) / Math.Max(a, b))"),
            "round(float(x) / max(a, b))"
        );
        assert_eq!(normalize_literals("Math.Floor (x)"), "floor(x)");
        assert_eq!(normalize_literals("Math.Ceiling(x)"), "ceil(x)");
    }

    #[test]
    fn test_parse_width_literal_variants() {
        assert_eq!(parse_width_literal("16'h0050"), Some(0x50));
        assert_eq!(parse_width_literal("1’h1"), Some(1));
        assert_eq!(parse_width_literal("8'b0000_0101"), Some(5));
        assert_eq!(parse_width_literal("0x50"), None);
    }
}
