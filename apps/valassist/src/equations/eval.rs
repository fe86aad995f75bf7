//! Tree-walking evaluation of parsed equations.

use std::fmt;

use serde_json::Value as Json;
use thiserror::Error;

use crate::equations::models::AttributeTable;
use crate::equations::parser::{BinaryOp, Expr, Literal, UnaryOp};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("cannot use '{0}' as a number")]
    NotNumeric(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("{name}() expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: &'static str,
        got: usize,
    },
    #[error("{0}() argument out of range")]
    OutOfRange(&'static str),
    #[error("Key '{0}' not found")]
    KeyNotFound(String),
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Upper-case hex digits without a prefix, produced by `dec2hex`.
    HexDigits(String),
}

impl Value {
    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Value::HexDigits(digits) => u128::from_str_radix(digits, 16)
                .map(|v| v as f64)
                .map_err(|_| EvalError::NotNumeric(digits.clone())),
            Value::Text(s) => parse_numeric_text(s).ok_or_else(|| EvalError::NotNumeric(s.clone())),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::HexDigits(d) => d.chars().any(|c| c != '0'),
        }
    }

    /// Integral, non-negative values as `0x` + upper-case hex.
    pub fn canonical_hex(&self) -> Option<String> {
        match self {
            Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n < 1.8e19 => {
                Some(format!("0x{:X}", *n as u64))
            }
            Value::Number(_) => None,
            Value::Bool(b) => Some(if *b { "0x1" } else { "0x0" }.to_string()),
            Value::HexDigits(d) => u128::from_str_radix(d, 16)
                .ok()
                .map(|v| format!("0x{v:X}")),
            Value::Text(s) => crate::equations::compare::normalize_hex_value(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(s) | Value::HexDigits(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Integral values print without a fractional part.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_numeric_text(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u128::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }
    s.parse::<f64>().ok()
}

fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Number(0.0),
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => match parse_numeric_text(s) {
            Some(n) => Value::Number(n),
            None => Value::Text(s.clone()),
        },
        other => Value::Text(other.to_string()),
    }
}

pub struct Evaluator<'a> {
    attributes: &'a AttributeTable,
}

impl<'a> Evaluator<'a> {
    pub fn new(attributes: &'a AttributeTable) -> Self {
        Self { attributes }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(Literal::Number(n)) => Ok(Value::Number(*n)),
            Expr::Literal(Literal::Text(s)) => Ok(Value::Text(s.clone())),
            Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
            Expr::AttributeRef(name) => Ok(self
                .attributes
                .get(name)
                .map(json_to_value)
                .unwrap_or(Value::Number(0.0))),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Neg => Ok(Value::Number(-v.as_number()?)),
                    UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Ternary {
                condition,
                if_true,
                if_false,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(if_true)
                } else {
                    self.eval(if_false)
                }
            }
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                call_function(name, &values)
            }
            Expr::TableLookup { entries, selector } => {
                let key = self.eval(selector)?.to_string().trim().to_uppercase();
                match entries.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => self.eval(value),
                    None => Err(EvalError::KeyNotFound(key)),
                }
            }
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        match op {
            BinaryOp::And => {
                return Ok(Value::Bool(
                    self.eval(left)?.is_truthy() && self.eval(right)?.is_truthy(),
                ))
            }
            BinaryOp::Or => {
                return Ok(Value::Bool(
                    self.eval(left)?.is_truthy() || self.eval(right)?.is_truthy(),
                ))
            }
            _ => {}
        }

        let l = self.eval(left)?;
        let r = self.eval(right)?;

        match op {
            BinaryOp::Eq => return Ok(Value::Bool(values_equal(&l, &r))),
            BinaryOp::Ne => return Ok(Value::Bool(!values_equal(&l, &r))),
            BinaryOp::Add => {
                if let (Err(_), _) | (_, Err(_)) = (l.as_number(), r.as_number()) {
                    return Ok(Value::Text(format!("{l}{r}")));
                }
            }
            _ => {}
        }

        let a = l.as_number()?;
        let b = r.as_number()?;
        let value = match op {
            BinaryOp::Add => Value::Number(a + b),
            BinaryOp::Sub => Value::Number(a - b),
            BinaryOp::Mul => Value::Number(a * b),
            BinaryOp::Div => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Value::Number(a / b)
            }
            BinaryOp::Rem => {
                if b == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Value::Number(a % b)
            }
            BinaryOp::Lt => Value::Bool(a < b),
            BinaryOp::Le => Value::Bool(a <= b),
            BinaryOp::Gt => Value::Bool(a > b),
            BinaryOp::Ge => Value::Bool(a >= b),
            BinaryOp::Shl => Value::Number(((a as i64) << (b as i64).clamp(0, 63)) as f64),
            BinaryOp::Shr => Value::Number(((a as i64) >> (b as i64).clamp(0, 63)) as f64),
            BinaryOp::BitAnd => Value::Number(((a as i64) & (b as i64)) as f64),
            BinaryOp::BitOr => Value::Number(((a as i64) | (b as i64)) as f64),
            BinaryOp::BitXor => Value::Number(((a as i64) ^ (b as i64)) as f64),
            BinaryOp::Eq => Value::Bool(a == b),
            BinaryOp::Ne => Value::Bool(a != b),
            BinaryOp::And => Value::Bool(a != 0.0 && b != 0.0),
            BinaryOp::Or => Value::Bool(a != 0.0 || b != 0.0),
        };
        Ok(value)
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l.as_number(), r.as_number()) {
        (Ok(a), Ok(b)) => a == b,
        _ => l.to_string() == r.to_string(),
    }
}

fn arity(name: &str, args: &[Value], expected: &'static str, ok: bool) -> Result<(), EvalError> {
    if ok {
        Ok(())
    } else {
        Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        })
    }
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let one = |f: fn(f64) -> f64| -> Result<Value, EvalError> {
        arity(name, args, "1", args.len() == 1)?;
        Ok(Value::Number(f(args[0].as_number()?)))
    };

    match name {
        "round" => {
            arity(name, args, "1 or 2", matches!(args.len(), 1 | 2))?;
            let x = args[0].as_number()?;
            let digits = match args.get(1) {
                Some(d) => d.as_number()? as i32,
                None => 0,
            };
            let scale = 10f64.powi(digits);
            Ok(Value::Number((x * scale).round_ties_even() / scale))
        }
        "floor" => one(f64::floor),
        "ceil" => one(f64::ceil),
        "abs" => one(f64::abs),
        "float" => one(|x| x),
        "int" => one(f64::trunc),
        "pow" => {
            arity(name, args, "2", args.len() == 2)?;
            Ok(Value::Number(args[0].as_number()?.powf(args[1].as_number()?)))
        }
        "max" | "min" => {
            arity(name, args, "at least 1", !args.is_empty())?;
            let mut best = args[0].as_number()?;
            for arg in &args[1..] {
                let n = arg.as_number()?;
                best = if name == "max" { best.max(n) } else { best.min(n) };
            }
            Ok(Value::Number(best))
        }
        "dec2hex" => {
            arity(name, args, "1", args.len() == 1)?;
            let n = args[0].as_number()?.round_ties_even();
            if !(0.0..1.8e19).contains(&n) {
                return Err(EvalError::OutOfRange("dec2hex"));
            }
            Ok(Value::HexDigits(format!("{:X}", n as u64)))
        }
        "hex2dec" => {
            arity(name, args, "1", args.len() == 1)?;
            let text = args[0].to_string();
            let digits = text
                .trim()
                .trim_start_matches("0x")
                .trim_start_matches("0X")
                .to_string();
            u128::from_str_radix(&digits, 16)
                .map(|v| Value::Number(v as f64))
                .map_err(|_| EvalError::NotNumeric(text))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::parser::{parse, parse_lookup_table};
    use serde_json::json;
    use std::collections::HashMap;

    fn eval_str(src: &str) -> Result<Value, EvalError> {
        let table = AttributeTable::default();
        Evaluator::new(&table).eval(&parse(src).unwrap())
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_str("1 + 2 * 3").unwrap(), Value::Number(7.0));
        assert_eq!(eval_str("(1 + 2) * 3").unwrap(), Value::Number(9.0));
        assert_eq!(eval_str("-4 + 10 % 3").unwrap(), Value::Number(-3.0));
    }

    #[test]
    fn test_dec2hex_of_max() {
        let v = eval_str("dec2hex(Max(200,400)/200)").unwrap();
        assert_eq!(v, Value::HexDigits("2".into()));
        assert_eq!(v.to_string(), "2");
        assert_eq!(v.canonical_hex().as_deref(), Some("0x2"));
    }

    #[test]
    fn test_dec2hex_rounds_half_even() {
        assert_eq!(eval_str("dec2hex(2.5)").unwrap().to_string(), "2");
        assert_eq!(eval_str("dec2hex(255)").unwrap().to_string(), "FF");
        assert_eq!(eval_str("dec2hex(-1)"), Err(EvalError::OutOfRange("dec2hex")));
    }

    #[test]
    fn test_round_and_friends() {
        assert_eq!(eval_str("round(2.5)").unwrap(), Value::Number(2.0));
        assert_eq!(eval_str("round(3.5)").unwrap(), Value::Number(4.0));
        assert_eq!(eval_str("round(1.25, 1)").unwrap(), Value::Number(1.2));
        assert_eq!(eval_str("floor(2.7) + ceil(2.1)").unwrap(), Value::Number(5.0));
        assert_eq!(eval_str("int(-2.7)").unwrap(), Value::Number(-2.0));
    }

    #[test]
    fn test_bitwise_and_shifts() {
        assert_eq!(eval_str("(0xF0 >> 4) | 0x100").unwrap(), Value::Number(271.0));
        assert_eq!(eval_str("1 << 3 & 12").unwrap(), Value::Number(8.0));
        assert_eq!(eval_str("6 ^ 3").unwrap(), Value::Number(5.0));
    }

    #[test]
    fn test_logic_and_ternary() {
        assert_eq!(eval_str("if(2 > 1 and 0, 5, 6)").unwrap(), Value::Number(6.0));
        assert_eq!(eval_str("not (1 == 2) ? 7 : 8").unwrap(), Value::Number(7.0));
        assert_eq!(eval_str(r#"if("HEDT" == HEDT, 1, 0)"#).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_str("1 / 0"), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        assert_eq!(
            eval_str("frobnicate(1)"),
            Err(EvalError::UnknownFunction("frobnicate".into()))
        );
        assert!(matches!(eval_str("abs(1, 2)"), Err(EvalError::Arity { got: 2, .. })));
    }

    #[test]
    fn test_text_is_not_numeric() {
        assert!(matches!(eval_str("HEDT * 2"), Err(EvalError::NotNumeric(_))));
    }

    #[test]
    fn test_table_lookup_hit_and_miss() {
        let table = AttributeTable::new(HashMap::from([(
            "SKU_TYPE".to_string(),
            json!("standard"),
        )]));
        let entries = parse_lookup_table(r#"{"HEDT":1},{"STANDARD":0}"#).unwrap();
        let expr = Expr::TableLookup {
            entries: entries.clone(),
            selector: Box::new(Expr::AttributeRef("SKU_TYPE".into())),
        };
        assert_eq!(Evaluator::new(&table).eval(&expr).unwrap(), Value::Number(0.0));

        let other = AttributeTable::new(HashMap::from([("SKU_TYPE".to_string(), json!("WS"))]));
        assert_eq!(
            Evaluator::new(&other).eval(&expr),
            Err(EvalError::KeyNotFound("WS".into()))
        );
    }

    #[test]
    fn test_attribute_values_coerced() {
        let table = AttributeTable::new(HashMap::from([
            ("A".to_string(), json!("0x10")),
            ("B".to_string(), json!(null)),
            ("C".to_string(), json!(true)),
        ]));
        let expr = parse("lineItem.A.Value + lineItem.B.Value + lineItem.C.Value").unwrap();
        assert_eq!(Evaluator::new(&table).eval(&expr).unwrap(), Value::Number(17.0));
    }

    #[test]
    fn test_canonical_hex_of_values() {
        assert_eq!(Value::Number(80.0).canonical_hex().as_deref(), Some("0x50"));
        assert_eq!(Value::Number(1.5).canonical_hex(), None);
        assert_eq!(Value::Text("16'h0050".into()).canonical_hex().as_deref(), Some("0x50"));
    }
}
