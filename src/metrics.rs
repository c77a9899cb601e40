use chrono::Utc;
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::time::Duration;

use crate::exposition;

/// The exporter's own metrics, registered in a registry owned by this struct.
///
/// Built once in `main` and shared through `AppState`.
#[derive(Clone)]
pub struct ExporterMetrics {
    registry: Registry,
    query_time: HistogramVec,
    query_results: GaugeVec,
    query_requests: CounterVec,
    status: GaugeVec,
    last_success: GaugeVec,
    workspace_count: GaugeVec,
}

impl ExporterMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let query_time = HistogramVec::new(
            HistogramOpts::new(
                "azure_loganalytics_query_time",
                "Loganalytics wall time of one query definition across all workspaces in seconds",
            )
            .buckets(vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 90.0, 120.0, 300.0]),
            &["module", "metric"],
        )?;
        let query_results = GaugeVec::new(
            Opts::new(
                "azure_loganalytics_query_results",
                "Loganalytics query result rows",
            ),
            &["module", "metric"],
        )?;
        let query_requests = CounterVec::new(
            Opts::new(
                "azure_loganalytics_query_requests",
                "Loganalytics query requests",
            ),
            &["workspaceID", "module", "metric"],
        )?;
        let status = GaugeVec::new(
            Opts::new(
                "azure_loganalytics_status",
                "Azure loganalytics workspace status",
            ),
            &["workspaceID", "module", "metric"],
        )?;
        let last_success = GaugeVec::new(
            Opts::new(
                "azure_loganalytics_last_query_successfull",
                "Azure loganalytics workspace last successfull scrape time",
            ),
            &["workspaceID", "module", "metric"],
        )?;
        let workspace_count = GaugeVec::new(
            Opts::new(
                "azure_loganalytics_workspace_query_count",
                "Number of workspaces queried per module",
            ),
            &["module"],
        )?;

        registry.register(Box::new(query_time.clone()))?;
        registry.register(Box::new(query_results.clone()))?;
        registry.register(Box::new(query_requests.clone()))?;
        registry.register(Box::new(status.clone()))?;
        registry.register(Box::new(last_success.clone()))?;
        registry.register(Box::new(workspace_count.clone()))?;

        Ok(Self {
            registry,
            query_time,
            query_results,
            query_requests,
            status,
            last_success,
            workspace_count,
        })
    }

    pub fn observe_query_time(&self, module: &str, metric: &str, elapsed: Duration) {
        self.query_time
            .with_label_values(&[module, metric])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_query_results(&self, module: &str, metric: &str, rows: usize) {
        self.query_results
            .with_label_values(&[module, metric])
            .set(rows as f64);
    }

    pub fn record_request(&self, workspace_id: &str, module: &str, metric: &str) {
        self.query_requests
            .with_label_values(&[workspace_id, module, metric])
            .inc();
    }

    pub fn record_success(&self, workspace_id: &str, module: &str, metric: &str) {
        let labels = [workspace_id, module, metric];
        self.status.with_label_values(&labels).set(1.0);
        self.last_success
            .with_label_values(&labels)
            .set(Utc::now().timestamp() as f64);
    }

    pub fn record_failure(&self, workspace_id: &str, module: &str, metric: &str) {
        self.status
            .with_label_values(&[workspace_id, module, metric])
            .set(0.0);
    }

    pub fn set_workspace_count(&self, module: &str, count: usize) {
        self.workspace_count
            .with_label_values(&[module])
            .set(count as f64);
    }

    /// Current status gauge value, if the target was ever probed.
    pub fn status(&self, workspace_id: &str, module: &str, metric: &str) -> Option<f64> {
        self.gauge_value(
            "azure_loganalytics_status",
            &[("workspaceID", workspace_id), ("module", module), ("metric", metric)],
        )
    }

    pub fn query_results(&self, module: &str, metric: &str) -> Option<f64> {
        self.gauge_value(
            "azure_loganalytics_query_results",
            &[("module", module), ("metric", metric)],
        )
    }

    // Reads through gather() so that lookups never create a series.
    fn gauge_value(&self, family: &str, wanted: &[(&str, &str)]) -> Option<f64> {
        self.registry
            .gather()
            .iter()
            .filter(|f| f.get_name() == family)
            .flat_map(|f| f.get_metric())
            .find(|m| {
                wanted.iter().all(|(name, value)| {
                    m.get_label()
                        .iter()
                        .any(|l| l.get_name() == *name && l.get_value() == *value)
                })
            })
            .map(|m| m.get_gauge().get_value())
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        exposition::encode(&self.registry)
    }
}
