// Fuse equation evaluation: substitute attribute values into rule equations,
// normalize the rule-language syntax, evaluate, and compare against reported
// values.

pub mod compare;
pub mod eval;
pub mod evaluator;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod prompts;
pub mod review;
pub mod summary;
