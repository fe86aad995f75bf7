use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::equations::normalize::discover_attributes;

/// How a fuse value is assigned in the rule source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EquationSource {
    /// `Fuses.X.FuseSetValue = <expr>;`
    DirectAssignment,
    /// A mapping-table wrapper keyed by the value of `selector`.
    TableLookup { selector: String },
}

/// One fuse equation plus the value observed for it in the fuse report.
#[derive(Debug, Clone, Serialize)]
pub struct EquationRow {
    pub source: EquationSource,
    attribute_refs: Vec<String>,
    pub target_name: String,
    pub raw_equation: String,
    pub reported_value: String,
}

impl EquationRow {
    pub fn new(
        source: EquationSource,
        target_name: impl Into<String>,
        raw_equation: impl Into<String>,
        reported_value: impl Into<String>,
    ) -> Self {
        let raw_equation = raw_equation.into();
        let mut attribute_refs = discover_attributes(&raw_equation);
        if let EquationSource::TableLookup { selector } = &source {
            if !attribute_refs.iter().any(|a| a == selector) {
                attribute_refs.push(selector.clone());
            }
        }
        Self {
            source,
            attribute_refs,
            target_name: target_name.into(),
            raw_equation,
            reported_value: reported_value.into(),
        }
    }

    /// Attribute names referenced by this row, in first-seen order.
    pub fn attribute_refs(&self) -> &[String] {
        &self.attribute_refs
    }
}

/// Attribute name → value, read-only for the duration of an evaluation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeTable {
    values: HashMap<String, Value>,
}

impl AttributeTable {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Builds the table from an attribute export:
    /// `{"collections": [{"attributes": [{"attributeName", "attributeValue"}]}]}`.
    pub fn from_export(export: &Value) -> Self {
        let mut values = HashMap::new();
        let collections = export
            .get("collections")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for collection in collections {
            let attributes = collection
                .get("attributes")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for attribute in attributes {
                let Some(name) = attribute.get("attributeName").and_then(Value::as_str) else {
                    continue;
                };
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = attribute.get("attributeValue").cloned().unwrap_or(Value::Null);
                values.insert(name.to_string(), value);
            }
        }

        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The value as it is spliced into equation text.
    pub fn stringify(&self, name: &str) -> Option<String> {
        self.get(name).map(stringify_value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::Null => "0".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvaluationStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub target_name: String,
    pub calculated_value: String,
    pub matches_reported: bool,
    pub explanation: String,
    pub status: EvaluationStatus,
    /// The equation text after substitution and normalization.
    pub processed_equation: String,
    /// `NAME: value` for every attribute used.
    pub attribute_values: Vec<String>,
}
