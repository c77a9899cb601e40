use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single decoded table cell.
///
/// Log Analytics returns cells as loosely typed JSON; the column type decides
/// how string cells are interpreted (`datetime`, numeric, `bool`), everything
/// else (including `dynamic` objects) stays a string.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

/// One row of a query result keyed by column name.
pub type RowResult = BTreeMap<String, RowValue>;

impl RowValue {
    pub fn from_json(value: &Value, column_type: &str) -> Self {
        match value {
            Value::Null => RowValue::Null,
            Value::Bool(b) => RowValue::Bool(*b),
            Value::Number(n) => n.as_f64().map(RowValue::Number).unwrap_or(RowValue::Null),
            Value::String(s) => Self::from_typed_str(s, column_type),
            other => RowValue::String(other.to_string()),
        }
    }

    fn from_typed_str(s: &str, column_type: &str) -> Self {
        match column_type.to_ascii_lowercase().as_str() {
            "datetime" | "date" => DateTime::parse_from_rfc3339(s)
                .map(|dt| RowValue::Timestamp(dt.with_timezone(&Utc)))
                .unwrap_or_else(|_| RowValue::String(s.to_string())),
            "int" | "long" | "real" | "decimal" | "double" => s
                .trim()
                .parse::<f64>()
                .map(RowValue::Number)
                .unwrap_or_else(|_| RowValue::String(s.to_string())),
            "bool" | "boolean" => match s.trim().to_ascii_lowercase().as_str() {
                "true" => RowValue::Bool(true),
                "false" => RowValue::Bool(false),
                _ => RowValue::String(s.to_string()),
            },
            _ => RowValue::String(s.to_string()),
        }
    }

    /// Numeric interpretation used for metric values. `None` means the cell
    /// carries no usable number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RowValue::Null => None,
            RowValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RowValue::Number(n) => Some(*n),
            RowValue::String(s) => s.trim().parse::<f64>().ok(),
            RowValue::Timestamp(ts) => Some(ts.timestamp_millis() as f64 / 1000.0),
        }
    }

    /// String form used for label values.
    pub fn to_label_value(&self) -> String {
        match self {
            RowValue::Null => String::new(),
            RowValue::Bool(b) => b.to_string(),
            RowValue::Number(n) => n.to_string(),
            RowValue::String(s) => s.clone(),
            RowValue::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_by_column_type() {
        assert_eq!(RowValue::from_json(&json!(500), "long"), RowValue::Number(500.0));
        assert_eq!(RowValue::from_json(&json!("12.5"), "real"), RowValue::Number(12.5));
        assert_eq!(RowValue::from_json(&json!("True"), "bool"), RowValue::Bool(true));
        assert_eq!(RowValue::from_json(&json!(null), "string"), RowValue::Null);
        assert_eq!(
            RowValue::from_json(&json!("host1"), "string"),
            RowValue::String("host1".into())
        );

        let ts = RowValue::from_json(&json!("2024-03-01T10:00:00Z"), "datetime");
        assert!(matches!(ts, RowValue::Timestamp(_)));
        assert_eq!(ts.as_f64(), Some(1709287200.0));
    }

    #[test]
    fn test_dynamic_object_stays_string() {
        let v = RowValue::from_json(&json!({"a": 1}), "dynamic");
        assert_eq!(v, RowValue::String("{\"a\":1}".into()));
        assert_eq!(v.as_f64(), None);
    }

    #[test]
    fn test_label_values() {
        assert_eq!(RowValue::Number(500.0).to_label_value(), "500");
        assert_eq!(RowValue::Number(0.25).to_label_value(), "0.25");
        assert_eq!(RowValue::Bool(false).to_label_value(), "false");
        assert_eq!(RowValue::Null.to_label_value(), "");
        let ts = RowValue::from_json(&json!("2024-03-01T10:00:00Z"), "datetime");
        assert_eq!(ts.to_label_value(), "2024-03-01T10:00:00Z");
    }

    #[test]
    fn test_unparseable_numeric_string_falls_back() {
        let v = RowValue::from_json(&json!("n/a"), "long");
        assert_eq!(v, RowValue::String("n/a".into()));
        assert_eq!(v.as_f64(), None);
    }
}
