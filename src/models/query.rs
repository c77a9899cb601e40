use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::models::row::RowValue;

/// Top-level query definition file (`queries.toml`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueryConfig {
    #[serde(default)]
    pub queries: Vec<QueryDefinition>,
}

/// One named, metric-producing query.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryDefinition {
    /// Matched exactly against the `module` request parameter; may be empty.
    #[serde(default)]
    pub module: String,
    pub metric: String,
    pub query: String,
    /// ISO-8601 duration or interval (`PT1H`, `2024-01-01/2024-01-02`).
    #[serde(default)]
    pub timespan: Option<String>,
    #[serde(default)]
    pub query_mode: QueryMode,
    /// Explicit workspace list; replaces the request's targets when non-empty.
    #[serde(default)]
    pub workspaces: Option<Vec<String>>,
    #[serde(default)]
    pub metric_config: LabelRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum QueryMode {
    /// One query per workspace.
    #[default]
    Single,
    /// One cross-workspace query; rows are not attributable to a workspace.
    Multi,
}

impl TryFrom<String> for QueryMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "single" => Ok(QueryMode::Single),
            "multi" | "all" => Ok(QueryMode::Multi),
            other => Err(format!("invalid query_mode \"{other}\"")),
        }
    }
}

impl QueryDefinition {
    /// Workspaces pinned by the definition itself, if any.
    pub fn target_override(&self) -> Option<&[String]> {
        self.workspaces.as_deref().filter(|list| !list.is_empty())
    }
}

/// Rules turning one result row into one or more metrics.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LabelRules {
    /// Value of the main metric when no value column provides one.
    #[serde(default)]
    pub value: Option<f64>,
    /// Static labels added to every metric built from the row.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: Vec<FieldRule>,
    #[serde(default)]
    pub default_field: FieldRule,
}

impl LabelRules {
    pub fn field(&self, column: &str) -> &FieldRule {
        self.fields
            .iter()
            .find(|f| f.name == column)
            .unwrap_or(&self.default_field)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FieldRule {
    #[serde(default)]
    pub name: String,
    /// Label name (or metric suffix) to use instead of the column name.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: FieldKind,
    /// Emit the value as a separate `<metric>_<suffix>` series instead of
    /// setting the main metric's value.
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    #[serde(alias = "id")]
    Label,
    Value,
    Ignore,
    Expand,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldFilter {
    ToLower,
    ToUpper,
    Trim,
    Regexp {
        pattern: Pattern,
        #[serde(default)]
        replacement: String,
    },
    ToUnixTime,
}

/// Regex compiled once when the definition file is loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern(Regex);

impl TryFrom<String> for Pattern {
    type Error = regex::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Regex::new(&value).map(Pattern)
    }
}

impl FieldRule {
    pub fn transform(&self, value: &RowValue) -> RowValue {
        self.filters
            .iter()
            .fold(value.clone(), |current, filter| filter.apply(current))
    }
}

impl FieldFilter {
    fn apply(&self, value: RowValue) -> RowValue {
        match self {
            FieldFilter::ToLower => RowValue::String(value.to_label_value().to_lowercase()),
            FieldFilter::ToUpper => RowValue::String(value.to_label_value().to_uppercase()),
            FieldFilter::Trim => RowValue::String(value.to_label_value().trim().to_string()),
            FieldFilter::Regexp {
                pattern,
                replacement,
            } => RowValue::String(
                pattern
                    .0
                    .replace_all(&value.to_label_value(), replacement.as_str())
                    .into_owned(),
            ),
            FieldFilter::ToUnixTime => match &value {
                RowValue::Timestamp(ts) => RowValue::Number(ts.timestamp() as f64),
                RowValue::String(s) => match chrono::DateTime::parse_from_rfc3339(s.trim()) {
                    Ok(dt) => RowValue::Number(dt.timestamp() as f64),
                    Err(_) => value.clone(),
                },
                _ => value.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> QueryConfig {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn test_query_mode_parsing() {
        let cfg = parse(
            r#"
            [[queries]]
            module = "m1"
            metric = "a"
            query = "T"

            [[queries]]
            module = "m1"
            metric = "b"
            query = "T"
            query_mode = "ALL"
            "#,
        );
        assert_eq!(cfg.queries[0].query_mode, QueryMode::Single);
        assert_eq!(cfg.queries[1].query_mode, QueryMode::Multi);
    }

    #[test]
    fn test_invalid_query_mode_rejected() {
        let res: Result<QueryConfig, _> = toml::from_str(
            r#"
            [[queries]]
            module = "m1"
            metric = "a"
            query = "T"
            query_mode = "sometimes"
            "#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_field_rules_and_filters() {
        let cfg = parse(
            r#"
            [[queries]]
            module = "m1"
            metric = "disk_free"
            query = "Perf"
            timespan = "PT1H"

            [queries.metric_config]
            labels = { source = "perf" }

            [[queries.metric_config.fields]]
            name = "FreeMB"
            type = "value"

            [[queries.metric_config.fields]]
            name = "Computer"
            target = "host"
            filters = [{ type = "tolower" }, { type = "regexp", pattern = "\\.contoso\\.com$", replacement = "" }]
            "#,
        );
        let rules = &cfg.queries[0].metric_config;
        assert_eq!(rules.field("FreeMB").kind, FieldKind::Value);
        assert_eq!(rules.field("Unknown").kind, FieldKind::Label);

        let host = rules.field("Computer");
        let out = host.transform(&RowValue::String("HOST1.Contoso.com".into()));
        assert_eq!(out, RowValue::String("host1".into()));
    }

    #[test]
    fn test_unix_time_filter() {
        let rule = FieldRule {
            filters: vec![FieldFilter::ToUnixTime],
            ..Default::default()
        };
        let out = rule.transform(&RowValue::String("1970-01-01T00:01:00Z".into()));
        assert_eq!(out, RowValue::Number(60.0));
    }

    #[test]
    fn test_target_override_ignores_empty_list() {
        let cfg = parse(
            r#"
            [[queries]]
            module = "m1"
            metric = "a"
            query = "T"
            workspaces = []
            "#,
        );
        assert!(cfg.queries[0].target_override().is_none());
    }
}
