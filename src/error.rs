//! Tessera error types with error codes
//!
//! Error code ranges:
//! - TSR-000-009: Definition/config errors
//! - TSR-010-019: Template errors
//! - TSR-020-029: Token pattern errors
//! - TSR-030-039: Model errors
//! - TSR-040-049: Script errors
//! - TSR-050-059: View/runtime errors
//!
//! Only fatal conditions surface as errors. Degraded behavior (missing nodes,
//! pattern mismatches, dropped batches) is recorded in the view's event log
//! instead, see [`crate::event`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TesseraError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum TesseraError {
    // ═══════════════════════════════════════════
    // DEFINITION / CONFIG ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[TSR-001] Failed to parse widget definition: {details}")]
    DefinitionParse { details: String },

    #[error("[TSR-002] Invalid binding on node '{node}': {reason}")]
    InvalidBinding { node: String, reason: String },

    #[error("[TSR-003] Configuration error: {reason}")]
    ConfigError { reason: String },

    #[error("[TSR-004] IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[TSR-005] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("[TSR-006] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ═══════════════════════════════════════════
    // TEMPLATE ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[TSR-010] Template parse error at position {position}: {details}")]
    TemplateParse { position: usize, details: String },

    #[error("[TSR-011] Unbalanced markup: {details}")]
    Markup { details: String },

    #[error("[TSR-012] Callback '{method}' on <{tag}> needs an element id")]
    CallbackWithoutNode { method: String, tag: String },

    // ═══════════════════════════════════════════
    // TOKEN PATTERN ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error("[TSR-020] Invalid token pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // ═══════════════════════════════════════════
    // MODEL ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[TSR-030] Invalid model path: {path}")]
    InvalidPath { path: String },

    #[error("[TSR-031] Cannot write '{path}': parent is {value_type}, not an object")]
    ModelWrite { path: String, value_type: String },

    // ═══════════════════════════════════════════
    // SCRIPT ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[TSR-040] Script '{name}' parse error at position {position}: {details}")]
    ScriptParse {
        name: String,
        position: usize,
        details: String,
    },

    #[error("[TSR-041] Script '{name}' failed: {reason}")]
    ScriptRuntime { name: String, reason: String },

    #[error("[TSR-042] Script call depth exceeded {limit} while running '{name}'")]
    ScriptDepth { name: String, limit: usize },

    // ═══════════════════════════════════════════
    // VIEW / RUNTIME ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[TSR-050] View '{id}' has been removed")]
    ViewRemoved { id: String },

    #[error("[TSR-051] Invalid --set argument '{raw}': {reason}")]
    InvalidAssignment { raw: String, reason: String },
}

impl FixSuggestion for TesseraError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TesseraError::DefinitionParse { .. } => {
                Some("Check the widget definition has a 'template' key")
            }
            TesseraError::InvalidBinding { .. } => {
                Some("Bind only nodes that carry an id in the template")
            }
            TesseraError::ConfigError { .. } => Some("Check tessera.toml syntax and values"),
            TesseraError::Io(_) => Some("Check file path and permissions"),
            TesseraError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            TesseraError::Json(_) => Some("Check the model file is valid JSON"),
            TesseraError::TemplateParse { .. } => {
                Some("Close every ${...} placeholder; write \\${ for a literal")
            }
            TesseraError::Markup { .. } => Some("Close every element opened in the template"),
            TesseraError::CallbackWithoutNode { .. } => {
                Some("Add an id attribute to the element that declares the callback")
            }
            TesseraError::InvalidPattern { .. } => {
                Some("Use {field} placeholders, e.g. \"item-{row}-{col}\"")
            }
            TesseraError::InvalidPath { .. } => Some("Use dotted paths like 'a.b.0.c'"),
            TesseraError::ModelWrite { .. } => {
                Some("Write to fields of objects only, not into scalars")
            }
            TesseraError::ScriptParse { .. } => Some("Check the script syntax near the position"),
            TesseraError::ScriptRuntime { .. } => {
                Some("Check the values the script reads have the expected types")
            }
            TesseraError::ScriptDepth { .. } => {
                Some("Break the cycle of scripts calling each other")
            }
            TesseraError::ViewRemoved { .. } => Some("Create a new view instead of reusing it"),
            TesseraError::InvalidAssignment { .. } => {
                Some("Use --set path=<json>, e.g. --set name='\"B\"' or --set count=3")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_codes() {
        let err = TesseraError::TemplateParse {
            position: 4,
            details: "unterminated placeholder".into(),
        };
        assert!(err.to_string().starts_with("[TSR-010]"));
        assert!(err.to_string().contains("position 4"));
    }

    #[test]
    fn every_variant_has_a_suggestion() {
        let errors = [
            TesseraError::InvalidPattern {
                pattern: "{".into(),
                reason: "unclosed".into(),
            },
            TesseraError::ScriptDepth {
                name: "loop".into(),
                limit: 8,
            },
            TesseraError::ViewRemoved { id: "w1".into() },
        ];
        for err in errors {
            assert!(err.fix_suggestion().is_some(), "{err}");
        }
    }
}
