//! Model paths - dotted addressing into nested JSON values
//!
//! Supports:
//! - a.b.c (dot notation)
//! - a[0].b and a.0.b (array index)
//! - $.a.b ($ prefix is accepted and ignored)
//!
//! Reads borrow; writes create missing intermediate objects but never
//! overwrite a scalar parent.

use serde_json::{Map, Value};

use crate::error::{Result, TesseraError};

/// A parsed path segment
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Object field access: .field
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

/// Parse a dotted path into segments
///
/// Examples:
/// - "price.currency" → [Field("price"), Field("currency")]
/// - "items[0].name" → [Field("items"), Index(0), Field("name")]
pub fn parse(path: &str) -> Result<Vec<Segment>> {
    let path = if let Some(stripped) = path.strip_prefix("$.") {
        stripped
    } else if path == "$" {
        return Ok(vec![]);
    } else {
        path
    };

    if path.is_empty() {
        return Ok(vec![]);
    }

    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            return Err(TesseraError::InvalidPath {
                path: path.to_string(),
            });
        }

        if let Some(bracket_pos) = part.find('[') {
            let field = &part[..bracket_pos];
            if !field.is_empty() {
                segments.push(Segment::Field(field.to_string()));
            }

            if !part.ends_with(']') {
                return Err(TesseraError::InvalidPath {
                    path: path.to_string(),
                });
            }

            let index_str = &part[bracket_pos + 1..part.len() - 1];
            let index: usize = index_str.parse().map_err(|_| TesseraError::InvalidPath {
                path: path.to_string(),
            })?;

            segments.push(Segment::Index(index));
        } else if let Ok(index) = part.parse::<usize>() {
            segments.push(Segment::Index(index));
        } else {
            segments.push(Segment::Field(part.to_string()));
        }
    }

    Ok(segments)
}

/// Borrow the value at `segments`, if every step exists
pub fn get<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Field(name), _) => current.get(name)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            // Numeric keys on objects ("rows.0" where rows is a map)
            (Segment::Index(idx), Value::Object(map)) => map.get(&idx.to_string())?,
            (Segment::Index(_), _) => return None,
        };
    }
    Some(current)
}

/// Parse and read in one step; invalid paths read as missing
pub fn resolve<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path).ok()?;
    get(value, &segments)
}

/// Write `new` at `segments`, returning the previous value
///
/// Missing intermediate fields are created as objects. Writing below a
/// scalar is an error and leaves `root` untouched.
pub fn set(root: &mut Value, segments: &[Segment], new: Value) -> Result<Option<Value>> {
    let Some((last, parents)) = segments.split_last() else {
        return Ok(Some(std::mem::replace(root, new)));
    };

    let mut current = root;
    let mut walked = Vec::with_capacity(parents.len());
    for segment in parents {
        walked.push(segment_label(segment));
        if current.is_null() && matches!(segment, Segment::Field(_)) {
            *current = Value::Object(Map::new());
        }
        // Shape check on a shared reborrow; the descent below cannot fail
        let descends = match (segment, &*current) {
            (Segment::Field(_), Value::Object(_)) => true,
            (Segment::Index(idx), Value::Array(items)) => *idx < items.len(),
            _ => false,
        };
        if !descends {
            return Err(write_error(&walked, current));
        }
        current = match (segment, current) {
            (Segment::Field(name), Value::Object(map)) => map
                .entry(name.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            (Segment::Index(idx), Value::Array(items)) => &mut items[*idx],
            (_, other) => return Err(write_error(&walked, other)),
        };
    }

    walked.push(segment_label(last));
    if current.is_null() && matches!(last, Segment::Field(_)) {
        *current = Value::Object(Map::new());
    }
    match (last, current) {
        (Segment::Field(name), Value::Object(map)) => Ok(map.insert(name.clone(), new)),
        (Segment::Index(idx), Value::Array(items)) if *idx < items.len() => {
            Ok(Some(std::mem::replace(&mut items[*idx], new)))
        }
        (Segment::Index(idx), Value::Array(items)) if *idx == items.len() => {
            items.push(new);
            Ok(None)
        }
        (Segment::Index(idx), Value::Object(map)) => Ok(map.insert(idx.to_string(), new)),
        (_, other) => Err(write_error(&walked, other)),
    }
}

fn segment_label(segment: &Segment) -> String {
    match segment {
        Segment::Field(name) => name.clone(),
        Segment::Index(idx) => idx.to_string(),
    }
}

fn write_error(walked: &[String], parent: &Value) -> TesseraError {
    TesseraError::ModelWrite {
        path: walked.join("."),
        value_type: value_type(parent).to_string(),
    }
}

/// JSON type name for diagnostics
pub fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Join a parent path and a key ("" + "a" → "a", "a" + "" → "a", "a" + "b" → "a.b")
pub fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else if key.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// `path` is `ancestor` or lies below it; every path lies within ""
pub fn within(path: &str, ancestor: &str) -> bool {
    ancestor.is_empty()
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_path() {
        let segments = parse("a.b.c").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Field("a".to_string()),
                Segment::Field("b".to_string()),
                Segment::Field("c".to_string()),
            ]
        );
    }

    #[test]
    fn parse_with_array_index() {
        let segments = parse("$.items[0].name").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Field("items".to_string()),
                Segment::Index(0),
                Segment::Field("name".to_string()),
            ]
        );
    }

    #[test]
    fn parse_rejects_empty_segment() {
        assert!(parse("a..b").is_err());
        assert!(parse("a[x]").is_err());
    }

    #[test]
    fn get_nested_array() {
        let value = json!({"users": [{"name": "Alice"}, {"name": "Bob"}]});
        assert_eq!(resolve(&value, "users.1.name"), Some(&json!("Bob")));
        assert_eq!(resolve(&value, "users[0].name"), Some(&json!("Alice")));
        assert_eq!(resolve(&value, "users.5.name"), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut value = json!({});
        let old = set(&mut value, &parse("a.b").unwrap(), json!(1)).unwrap();
        assert_eq!(old, None);
        assert_eq!(value, json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_returns_previous_value() {
        let mut value = json!({"x": "old"});
        let old = set(&mut value, &parse("x").unwrap(), json!("new")).unwrap();
        assert_eq!(old, Some(json!("old")));
    }

    #[test]
    fn set_below_scalar_is_error_and_leaves_value() {
        let mut value = json!({"a": 5});
        let err = set(&mut value, &parse("a.b").unwrap(), json!(1)).unwrap_err();
        assert!(err.to_string().contains("TSR-031"));
        assert_eq!(value, json!({"a": 5}));
    }

    #[test]
    fn set_appends_at_array_end() {
        let mut value = json!({"items": [1, 2]});
        set(&mut value, &parse("items.2").unwrap(), json!(3)).unwrap();
        assert_eq!(value, json!({"items": [1, 2, 3]}));
        assert!(set(&mut value, &parse("items.9").unwrap(), json!(0)).is_err());
    }

    #[test]
    fn set_descends_through_arrays_and_stops_at_scalars() {
        let mut value = json!({"rows": [{"label": "a"}], "n": 5});
        set(&mut value, &parse("rows.0.label").unwrap(), json!("z")).unwrap();
        assert_eq!(value["rows"][0]["label"], json!("z"));

        let err = set(&mut value, &parse("n.x.y").unwrap(), json!(1)).unwrap_err();
        assert!(err.to_string().contains("TSR-031"));
        assert!(set(&mut value, &parse("rows.4.label").unwrap(), json!(1)).is_err());
        assert_eq!(value["n"], json!(5));
    }

    #[test]
    fn join_paths() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", "b"), "a.b");
        assert_eq!(join("data", ""), "data");
        assert_eq!(join("", ""), "");
    }

    #[test]
    fn within_respects_segment_boundaries() {
        assert!(within("style.color", "style"));
        assert!(within("style", "style"));
        assert!(within("anything", ""));
        assert!(!within("styles", "style"));
        assert!(!within("style", "style.color"));
    }
}
