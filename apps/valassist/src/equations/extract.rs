//! Pulls equation rows out of fuse rule source text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::equations::models::{EquationRow, EquationSource};

/// Reported value used when the fuse report has no entry for a target.
pub const NOT_AVAILABLE: &str = "N/A";

fn mapping_wrapper_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)LIRAMappingWrapper\(\s*lineItem\.(\w+)\.Value\s*,\s*(Fuses\.[^,]+?)\s*,\s*new\s+Dictionary<string,\s*string>\s*\{(.*?)\}\s*\);",
        )
        .expect("static pattern compiles")
    })
}

fn direct_assignment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)(Fuses\.[\w.]+)\.Fuse(?:SetValue|BinaryValue)\s*=\s*(.*?);")
            .expect("static pattern compiles")
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedEquation {
    pub source: EquationSource,
    /// Full dotted fuse path, e.g. `Fuses.Direct.Pcu.PCODE_SST_PP_4_DMFC`.
    pub fuse_path: String,
    pub target_name: String,
    pub equation: String,
}

/// Lower-cased last component of a dotted fuse path.
pub fn target_name(fuse_path: &str) -> String {
    fuse_path
        .rsplit('.')
        .next()
        .unwrap_or(fuse_path)
        .trim()
        .to_lowercase()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Every mapping-table wrapper and direct fuse assignment, in source order.
pub fn extract_equations(rule_text: &str) -> Vec<ExtractedEquation> {
    let mut found: Vec<(usize, ExtractedEquation)> = Vec::new();

    for caps in mapping_wrapper_re().captures_iter(rule_text) {
        let start = caps.get(0).map_or(0, |m| m.start());
        let fuse_path = caps[2].trim().to_string();
        found.push((
            start,
            ExtractedEquation {
                source: EquationSource::TableLookup {
                    selector: caps[1].to_string(),
                },
                target_name: target_name(&fuse_path),
                fuse_path,
                equation: collapse_whitespace(&caps[3]),
            },
        ));
    }

    for caps in direct_assignment_re().captures_iter(rule_text) {
        let start = caps.get(0).map_or(0, |m| m.start());
        let fuse_path = caps[1].trim().to_string();
        found.push((
            start,
            ExtractedEquation {
                source: EquationSource::DirectAssignment,
                target_name: target_name(&fuse_path),
                fuse_path,
                equation: collapse_whitespace(&caps[2]),
            },
        ));
    }

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, eq)| eq).collect()
}

/// Pairs extracted equations with reported values keyed by target name
/// (case-insensitive). Targets without a report get [`NOT_AVAILABLE`].
pub fn attach_reported(
    extracted: Vec<ExtractedEquation>,
    reported: &HashMap<String, String>,
) -> Vec<EquationRow> {
    let reported: HashMap<String, &String> = reported
        .iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v))
        .collect();

    extracted
        .into_iter()
        .map(|eq| {
            let value = reported
                .get(&eq.target_name)
                .map(|v| v.to_string())
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            EquationRow::new(eq.source, eq.target_name, eq.equation, value)
        })
        .collect()
}
