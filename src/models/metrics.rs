use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One sample of a named metric. A `None` value means the row was observed but
/// carried no number; such samples still contribute their label keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub labels: BTreeMap<String, String>,
    #[serde(default, with = "sample_value")]
    pub value: Option<f64>,
}

/// JSON has no NaN or infinities, so those are stored as the strings used by
/// the exposition format.
mod sample_value {
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            None => serializer.serialize_none(),
            Some(v) if v.is_nan() => serializer.serialize_str("NaN"),
            Some(v) if v.is_infinite() && *v > 0.0 => serializer.serialize_str("+Inf"),
            Some(v) if v.is_infinite() => serializer.serialize_str("-Inf"),
            Some(v) => serializer.serialize_f64(*v),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(v)) => Ok(Some(v)),
            Some(Repr::Text(text)) => match text.as_str() {
                "NaN" => Ok(Some(f64::NAN)),
                "+Inf" => Ok(Some(f64::INFINITY)),
                "-Inf" => Ok(Some(f64::NEG_INFINITY)),
                other => Err(de::Error::custom(format!("invalid sample value \"{other}\""))),
            },
        }
    }
}

impl Metric {
    pub fn new(labels: BTreeMap<String, String>, value: Option<f64>) -> Self {
        Self { labels, value }
    }
}

/// Per-request reduction of all rows into named metrics.
///
/// Label schemas differ between rows (and between workspaces), so the label
/// set of a metric name is only known once every row has been added. Readers
/// therefore go through [`MetricList::metric_label_names`] and
/// [`MetricList::metric_list`], which compute the union and pad missing keys
/// with `""`. The list itself is not synchronized: only the fan-in consumer
/// mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricList {
    list: BTreeMap<String, Vec<Metric>>,
}

impl MetricList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: &str, metrics: impl IntoIterator<Item = Metric>) {
        self.list.entry(name.to_string()).or_default().extend(metrics);
    }

    pub fn merge(&mut self, other: MetricList) {
        for (name, metrics) in other.list {
            self.add(&name, metrics);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.list.values().all(Vec::is_empty)
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.list.keys().cloned().collect()
    }

    /// Union of label keys across every sample of `name`, sorted.
    pub fn metric_label_names(&self, name: &str) -> Vec<String> {
        let keys: BTreeSet<&String> = self
            .list
            .get(name)
            .into_iter()
            .flatten()
            .flat_map(|m| m.labels.keys())
            .collect();
        keys.into_iter().cloned().collect()
    }

    /// Samples of `name`, each padded to the full label key set.
    pub fn metric_list(&self, name: &str) -> Vec<Metric> {
        let label_names = self.metric_label_names(name);
        self.list
            .get(name)
            .into_iter()
            .flatten()
            .map(|m| {
                let mut padded = m.clone();
                for label in &label_names {
                    padded.labels.entry(label.clone()).or_default();
                }
                padded
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_label_union_and_padding() {
        let mut list = MetricList::new();
        list.add(
            "disk_free",
            [Metric::new(labels(&[("workspaceID", "ws-a"), ("Computer", "h1")]), Some(500.0))],
        );
        list.add(
            "disk_free",
            [Metric::new(labels(&[("workspaceID", "ws-b"), ("Drive", "C:")]), Some(10.0))],
        );
        list.add("other", [Metric::new(labels(&[("x", "1")]), None)]);

        assert_eq!(list.metric_names(), vec!["disk_free", "other"]);
        assert_eq!(
            list.metric_label_names("disk_free"),
            vec!["Computer", "Drive", "workspaceID"]
        );

        let padded = list.metric_list("disk_free");
        assert_eq!(padded.len(), 2);
        for metric in &padded {
            let keys: Vec<&String> = metric.labels.keys().collect();
            assert_eq!(keys, vec!["Computer", "Drive", "workspaceID"]);
        }
        assert_eq!(padded[0].labels["Drive"], "");
        assert_eq!(padded[1].labels["Computer"], "");
    }

    #[test]
    fn test_absent_values_are_kept() {
        let mut list = MetricList::new();
        list.add("m", [Metric::new(labels(&[("only_here", "v")]), None)]);
        list.add("m", [Metric::new(BTreeMap::new(), Some(1.0))]);

        assert_eq!(list.metric_label_names("m"), vec!["only_here"]);
        let padded = list.metric_list("m");
        assert_eq!(padded[0].value, None);
        assert_eq!(padded[1].labels["only_here"], "");
    }

    #[test]
    fn test_unknown_metric_is_empty() {
        let list = MetricList::new();
        assert!(list.is_empty());
        assert!(list.metric_label_names("nope").is_empty());
        assert!(list.metric_list("nope").is_empty());
    }

    #[test]
    fn test_json_shape_survives_serialization() {
        let mut list = MetricList::new();
        list.add("m", [Metric::new(labels(&[("a", "1")]), Some(2.5))]);
        list.add("m", [Metric::new(labels(&[("b", "2")]), None)]);

        let data = serde_json::to_vec(&list).unwrap();
        let restored: MetricList = serde_json::from_slice(&data).unwrap();
        assert_eq!(restored, list);
        assert_eq!(restored.metric_label_names("m"), vec!["a", "b"]);
    }
}
