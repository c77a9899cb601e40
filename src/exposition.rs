use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::models::metrics::MetricList;

/// Content type of the text exposition format.
pub fn content_type() -> String {
    TextEncoder::new().format_type().to_string()
}

/// Build a throwaway registry with one gauge vector per metric name.
///
/// Each vector is declared with the label union of its name, and samples
/// without a value are left out.
pub fn build_registry(list: &MetricList) -> Result<Registry, prometheus::Error> {
    let registry = Registry::new();
    for name in list.metric_names() {
        let label_names = list.metric_label_names(&name);
        let label_refs: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let gauge = GaugeVec::new(Opts::new(name.as_str(), name.as_str()), &label_refs)?;

        for metric in list.metric_list(&name) {
            let Some(value) = metric.value else {
                continue;
            };
            let values: Vec<&str> = label_names
                .iter()
                .map(|label| metric.labels.get(label).map(String::as_str).unwrap_or_default())
                .collect();
            gauge.get_metric_with_label_values(&values)?.set(value);
        }

        registry.register(Box::new(gauge))?;
    }
    Ok(registry)
}

pub fn encode(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Render `list` in the text exposition format.
pub fn render(list: &MetricList) -> Result<String, prometheus::Error> {
    encode(&build_registry(list)?)
}
