use std::collections::BTreeMap;

use crate::models::metrics::Metric;
use crate::models::query::{FieldKind, LabelRules};
use crate::models::row::{RowResult, RowValue};

const MAX_EXPAND_DEPTH: usize = 4;

/// Apply `rules` to one result row.
///
/// The main metric is always emitted under `name` (possibly without a value);
/// value columns with a `metric` suffix produce additional `<name>_<suffix>`
/// series that inherit the main metric's labels.
pub fn build_metric_list(
    name: &str,
    rules: &LabelRules,
    row: &RowResult,
) -> BTreeMap<String, Vec<Metric>> {
    let name = sanitize_metric_name(name);
    let mut builder = RowBuilder {
        rules,
        name: &name,
        main: Metric::new(sanitize_labels(&rules.labels), rules.value),
        separate: Vec::new(),
    };

    for (column, value) in row {
        builder.apply(column, value, 0);
    }

    builder.finish()
}

struct RowBuilder<'a> {
    rules: &'a LabelRules,
    name: &'a str,
    main: Metric,
    separate: Vec<(String, Metric)>,
}

impl RowBuilder<'_> {
    fn apply(&mut self, column: &str, value: &RowValue, depth: usize) {
        let rule = self.rules.field(column);
        match rule.kind {
            FieldKind::Ignore => {}
            FieldKind::Expand => self.expand(column, value, depth),
            FieldKind::Value => {
                let number = rule.transform(value).as_f64();
                match &rule.metric {
                    Some(suffix) => {
                        let name = sanitize_metric_name(&format!("{}_{suffix}", self.name));
                        self.separate
                            .push((name, Metric::new(sanitize_labels(&rule.labels), number)));
                    }
                    None => self.main.value = number,
                }
            }
            FieldKind::Label => {
                let label = sanitize_label_name(rule.target.as_deref().unwrap_or(column));
                self.main
                    .labels
                    .insert(label, rule.transform(value).to_label_value());
            }
        }
    }

    /// Flatten a JSON object cell into `<column>_<key>` columns.
    fn expand(&mut self, column: &str, value: &RowValue, depth: usize) {
        if depth >= MAX_EXPAND_DEPTH {
            return;
        }
        let RowValue::String(raw) = value else {
            return;
        };
        let Ok(serde_json::Value::Object(fields)) = serde_json::from_str(raw) else {
            return;
        };
        for (key, nested) in &fields {
            self.apply(
                &format!("{column}_{key}"),
                &RowValue::from_json(nested, ""),
                depth + 1,
            );
        }
    }

    fn finish(self) -> BTreeMap<String, Vec<Metric>> {
        let mut out: BTreeMap<String, Vec<Metric>> = BTreeMap::new();
        for (name, metric) in self.separate {
            let mut labels = self.main.labels.clone();
            labels.extend(metric.labels);
            out.entry(name)
                .or_default()
                .push(Metric::new(labels, metric.value));
        }
        out.entry(self.name.to_string()).or_default().push(self.main);
        out
    }
}

fn sanitize_labels(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (sanitize_label_name(k), v.clone()))
        .collect()
}

/// Coerce to `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn sanitize_label_name(name: &str) -> String {
    sanitize(name, false)
}

/// Coerce to `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn sanitize_metric_name(name: &str) -> String {
    sanitize(name, true)
}

fn sanitize(name: &str, allow_colon: bool) -> String {
    let mut out: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_colon && c == ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::{FieldFilter, FieldRule};

    fn row(cells: &[(&str, RowValue)]) -> RowResult {
        cells
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn value_field(name: &str) -> FieldRule {
        FieldRule {
            name: name.to_string(),
            kind: FieldKind::Value,
            ..Default::default()
        }
    }

    #[test]
    fn test_value_and_label_columns() {
        let rules = LabelRules {
            fields: vec![value_field("FreeMB")],
            ..Default::default()
        };
        let out = build_metric_list(
            "disk_free",
            &rules,
            &row(&[
                ("Computer", RowValue::String("host1".into())),
                ("FreeMB", RowValue::Number(500.0)),
            ]),
        );

        assert_eq!(out.len(), 1);
        let metric = &out["disk_free"][0];
        assert_eq!(metric.value, Some(500.0));
        assert_eq!(metric.labels.len(), 1);
        assert_eq!(metric.labels["Computer"], "host1");
    }

    #[test]
    fn test_default_value_and_static_labels() {
        let rules = LabelRules {
            value: Some(1.0),
            labels: BTreeMap::from([("source".to_string(), "perf".to_string())]),
            ..Default::default()
        };
        let out = build_metric_list("info", &rules, &row(&[("Name", RowValue::String("x".into()))]));
        let metric = &out["info"][0];
        assert_eq!(metric.value, Some(1.0));
        assert_eq!(metric.labels["source"], "perf");
        assert_eq!(metric.labels["Name"], "x");
    }

    #[test]
    fn test_separate_value_metric_inherits_labels() {
        let rules = LabelRules {
            fields: vec![
                FieldRule {
                    metric: Some("count".into()),
                    labels: BTreeMap::from([("kind".to_string(), "events".to_string())]),
                    ..value_field("Count")
                },
                FieldRule {
                    name: "Internal".into(),
                    kind: FieldKind::Ignore,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let out = build_metric_list(
            "app",
            &rules,
            &row(&[
                ("App", RowValue::String("shop".into())),
                ("Count", RowValue::Number(7.0)),
                ("Internal", RowValue::String("secret".into())),
            ]),
        );

        let main = &out["app"][0];
        assert_eq!(main.value, None);
        assert!(!main.labels.contains_key("Internal"));

        let count = &out["app_count"][0];
        assert_eq!(count.value, Some(7.0));
        assert_eq!(count.labels["App"], "shop");
        assert_eq!(count.labels["kind"], "events");
    }

    #[test]
    fn test_expand_json_column() {
        let rules = LabelRules {
            fields: vec![
                FieldRule {
                    name: "Props".into(),
                    kind: FieldKind::Expand,
                    ..Default::default()
                },
                value_field("Props_size"),
            ],
            ..Default::default()
        };
        let out = build_metric_list(
            "blob",
            &rules,
            &row(&[(
                "Props",
                RowValue::String(r#"{"size": 42, "tier": "Hot"}"#.into()),
            )]),
        );
        let metric = &out["blob"][0];
        assert_eq!(metric.value, Some(42.0));
        assert_eq!(metric.labels["Props_tier"], "Hot");
        assert!(!metric.labels.contains_key("Props"));
    }

    #[test]
    fn test_label_rename_and_filters() {
        let rules = LabelRules {
            fields: vec![FieldRule {
                name: "Computer Name".into(),
                target: Some("host".into()),
                filters: vec![FieldFilter::ToUpper],
                ..Default::default()
            }],
            ..Default::default()
        };
        let out = build_metric_list(
            "m",
            &rules,
            &row(&[
                ("Computer Name", RowValue::String("web01".into())),
                ("Other Column", RowValue::Null),
            ]),
        );
        let metric = &out["m"][0];
        assert_eq!(metric.labels["host"], "WEB01");
        assert_eq!(metric.labels["Other_Column"], "");
    }

    #[test]
    fn test_sanitize_names() {
        assert_eq!(sanitize_label_name("Free MB"), "Free_MB");
        assert_eq!(sanitize_label_name("1st"), "_1st");
        assert_eq!(sanitize_label_name("a:b"), "a_b");
        assert_eq!(sanitize_metric_name("ns:metric-name"), "ns:metric_name");
        assert_eq!(sanitize_metric_name(""), "_");
    }
}
