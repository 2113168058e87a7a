//! Column-to-records projection for table-shaped sub-models
//!
//! `{"a": [1, 2], "b": [3, 4]}` → `[{"a": 1, "b": 3}, {"a": 2, "b": 4}]`

use serde_json::{Map, Value};

/// Project a columnar object into row records
///
/// Row count is the longest column; shorter columns pad with null.
/// Non-array columns repeat their value on every row. Anything that is not an
/// object projects to no rows.
pub fn columns_to_records(columns: &Value) -> Vec<Value> {
    let Value::Object(columns) = columns else {
        return Vec::new();
    };

    let rows = columns
        .values()
        .filter_map(|col| col.as_array().map(Vec::len))
        .max()
        .unwrap_or(0);

    (0..rows)
        .map(|row| {
            let record: Map<String, Value> = columns
                .iter()
                .map(|(name, col)| {
                    let cell = match col {
                        Value::Array(items) => items.get(row).cloned().unwrap_or(Value::Null),
                        scalar => scalar.clone(),
                    };
                    (name.clone(), cell)
                })
                .collect();
            Value::Object(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projects_columns_into_rows() {
        let records = columns_to_records(&json!({"a": [1, 2], "b": ["x", "y"]}));
        assert_eq!(
            records,
            vec![json!({"a": 1, "b": "x"}), json!({"a": 2, "b": "y"})]
        );
    }

    #[test]
    fn pads_short_columns_with_null() {
        let records = columns_to_records(&json!({"a": [1, 2, 3], "b": [true]}));
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], json!({"a": 3, "b": null}));
    }

    #[test]
    fn non_object_has_no_rows() {
        assert!(columns_to_records(&json!([1, 2])).is_empty());
        assert!(columns_to_records(&json!({})).is_empty());
    }
}
