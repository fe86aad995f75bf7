use crate::equations::models::{EquationRow, EquationSource, EvaluationResult};

pub const REVIEW_SYSTEM: &str = "You evaluate fuse configuration equations. \
    Substitute the given attribute values, resolve lookup tables and conditionals, \
    and read Verilog-style literals such as 1'h0 as numbers. \
    Reply with only the final value in hexadecimal, for example 0x0 or 0xFF.";

/// The user message for one row: the equation, its inputs, and what the
/// automatic evaluation made of it.
pub fn review_prompt(row: &EquationRow, result: &EvaluationResult) -> String {
    let source = match &row.source {
        EquationSource::DirectAssignment => "direct assignment".to_string(),
        EquationSource::TableLookup { selector } => format!("lookup table keyed by {selector}"),
    };
    let attributes = if result.attribute_values.is_empty() {
        "none".to_string()
    } else {
        result.attribute_values.join(", ")
    };
    format!(
        "Fuse: {}\nAssignment: {source}\nAttribute values: {attributes}\nEquation: {}\n\
         Automatic evaluation: {} ({})\n\n\
         Evaluate the equation and reply with the hexadecimal result only.",
        row.target_name, row.raw_equation, result.calculated_value, result.explanation
    )
}
