//! Token patterns - parse live attribute values back into model fields
//!
//! A pattern is literal text with `{name}` placeholders:
//! - `{value}` alone is a passthrough: the whole attribute value is the field
//! - `item-{row}-{col}` compiles to an anchored regex, one capture group per
//!   bound placeholder (in pattern order), `.*` for unbound ones
//!
//! Extracted strings are coerced: numbers become numbers, `"true"`/`"false"`
//! become booleans, everything else stays a string.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::error::{Result, TesseraError};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder regex is valid"));

/// Result of running a pattern against one live value
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Extracted {
    /// Coerced values, keyed by field name
    pub values: Map<String, Value>,
    /// Bound names the pattern does not carry
    pub missing: Vec<String>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Passthrough(String),
    Regex { regex: Regex, captured: Vec<String> },
}

/// A compiled token pattern
#[derive(Debug, Clone)]
pub struct TokenPattern {
    source: String,
    names: Vec<String>,
    matcher: Matcher,
}

impl TokenPattern {
    /// Compile `pattern` for the model fields in `names`
    pub fn compile(pattern: &str, names: &[String]) -> Result<Self> {
        // Fast path: exactly one placeholder, no literal text
        if let Some(inner) = pattern
            .strip_prefix('{')
            .and_then(|p| p.strip_suffix('}'))
            .filter(|inner| !inner.contains(['{', '}']))
        {
            return Ok(Self {
                source: pattern.to_string(),
                names: names.to_vec(),
                matcher: Matcher::Passthrough(inner.to_string()),
            });
        }

        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        let mut captured = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(pattern) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            push_literal(&mut expr, &pattern[last..whole.start()], pattern)?;
            if names.iter().any(|n| n == name.as_str()) {
                expr.push_str("(.*)");
                captured.push(name.as_str().to_string());
            } else {
                expr.push_str(".*");
            }
            last = whole.end();
        }
        push_literal(&mut expr, &pattern[last..], pattern)?;
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| TesseraError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            names: names.to_vec(),
            matcher: Matcher::Regex { regex, captured },
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fields this pattern writes
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self.matcher, Matcher::Passthrough(_))
    }

    /// Match `value`; `None` when the value does not fit the pattern
    pub fn extract(&self, value: &str) -> Option<Extracted> {
        let mut out = Extracted::default();
        match &self.matcher {
            Matcher::Passthrough(field) => {
                for name in &self.names {
                    if name == field {
                        out.values.insert(name.clone(), coerce(value));
                    } else {
                        out.missing.push(name.clone());
                    }
                }
            }
            Matcher::Regex { regex, captured } => {
                let caps = regex.captures(value)?;
                let found: Vec<(&String, &str)> = captured
                    .iter()
                    .zip(caps.iter().skip(1))
                    .filter_map(|(name, m)| Some((name, m?.as_str())))
                    .collect();
                for name in &self.names {
                    match found.iter().find(|(n, _)| *n == name) {
                        Some((_, raw)) => {
                            out.values.insert(name.clone(), coerce(raw));
                        }
                        None => out.missing.push(name.clone()),
                    }
                }
            }
        }
        Some(out)
    }
}

fn push_literal(expr: &mut String, literal: &str, pattern: &str) -> Result<()> {
    if literal.contains(['{', '}']) {
        return Err(TesseraError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "unbalanced brace".into(),
        });
    }
    expr.push_str(&regex::escape(literal));
    Ok(())
}

/// Placeholder names in pattern order (`"{a}-{b}"` → `["a", "b"]`)
pub fn placeholders(pattern: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(pattern)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// One-shot compile and extract
pub fn extract(pattern: &str, value: &str, names: &[String]) -> Result<Option<Extracted>> {
    Ok(TokenPattern::compile(pattern, names)?.extract(value))
}

/// Best-effort typing of an extracted string
pub fn coerce(raw: &str) -> Value {
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    if let Some(num) = raw
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
    {
        return Value::Number(num);
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn composite_pattern_extracts_and_coerces() {
        let out = extract("item-{a}-{b}", "item-3-7", &names(&["a", "b"]))
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(out.values), json!({"a": 3, "b": 7}));
        assert!(out.missing.is_empty());
    }

    #[test]
    fn non_matching_value_is_none() {
        let out = extract("item-{a}-{b}", "other-3-7", &names(&["a", "b"])).unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn passthrough_takes_raw_value() {
        let pattern = TokenPattern::compile("{x}", &names(&["x"])).unwrap();
        assert!(pattern.is_passthrough());
        let out = pattern.extract("hello world").unwrap();
        assert_eq!(out.values["x"], json!("hello world"));
    }

    #[test]
    fn literal_metacharacters_are_escaped() {
        let out = extract("($.{n}*)", "($.12*)", &names(&["n"])).unwrap().unwrap();
        assert_eq!(out.values["n"], json!(12));
        assert_eq!(extract("($.{n}*)", "(x.12*)", &names(&["n"])).unwrap(), None);
    }

    #[test]
    fn unbound_placeholders_are_wildcards() {
        let out = extract("{skip}:{keep}", "abc:def", &names(&["keep"]))
            .unwrap()
            .unwrap();
        assert_eq!(Value::Object(out.values), json!({"keep": "def"}));
    }

    #[test]
    fn bound_name_absent_from_pattern_is_missing() {
        let out = extract("row-{a}", "row-1", &names(&["a", "b"])).unwrap().unwrap();
        assert_eq!(out.values["a"], json!(1));
        assert_eq!(out.missing, vec!["b".to_string()]);
    }

    #[test]
    fn unbalanced_brace_is_rejected() {
        let err = TokenPattern::compile("a-{b", &names(&["b"])).unwrap_err();
        assert!(err.to_string().contains("TSR-020"));
    }

    #[test]
    fn placeholder_names_in_order() {
        assert_eq!(placeholders("item-{row}-{col}"), names(&["row", "col"]));
        assert!(placeholders("static").is_empty());
    }

    #[test]
    fn coercion_rules() {
        assert_eq!(coerce("3"), json!(3));
        assert_eq!(coerce("-2.5"), json!(-2.5));
        assert_eq!(coerce("true"), json!(true));
        assert_eq!(coerce("True"), json!("True"));
        assert_eq!(coerce("NaN"), json!("NaN"));
        assert_eq!(coerce("inf"), json!("inf"));
        assert_eq!(coerce(""), json!(""));
    }

    proptest! {
        #[test]
        fn integer_pairs_round_trip(a in 0u32..1_000_000, b in 0u32..1_000_000) {
            let value = format!("item-{a}-{b}");
            let out = extract("item-{a}-{b}", &value, &names(&["a", "b"])).unwrap().unwrap();
            prop_assert_eq!(&out.values["a"], &json!(a));
            prop_assert_eq!(&out.values["b"], &json!(b));
        }

        #[test]
        fn passthrough_keeps_plain_words(s in "[a-z ]{0,24}") {
            prop_assume!(s != "true" && s != "false" && s != "inf" && s != "infinity" && s != "nan");
            let out = extract("{x}", &s, &names(&["x"])).unwrap().unwrap();
            prop_assert_eq!(&out.values["x"], &Value::String(s.clone()));
        }
    }
}
