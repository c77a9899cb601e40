use futures_util::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::backend::{QueryBackend, QueryResponse};
use crate::concurrency::RequestScope;
use crate::error::ProbeError;
use crate::metric_builder::build_metric_list;
use crate::models::metrics::MetricList;
use crate::models::query::{QueryDefinition, QueryMode};
use crate::models::target::TargetRef;

pub const LABEL_WORKSPACE_ID: &str = "workspaceID";
pub const LABEL_WORKSPACE_TABLE: &str = "workspaceTable";

/// Metrics produced by one backend call.
#[derive(Debug, Clone, Default)]
pub struct TargetMetrics {
    pub rows: usize,
    pub metrics: MetricList,
    /// Time spent in the backend call.
    pub elapsed: Duration,
}

/// Outcome of one worker, tagged with the workspace it queried. Multi-mode
/// results carry an empty `workspace_id`.
#[derive(Debug)]
pub struct ProbeResult {
    pub metric: String,
    pub workspace_id: String,
    pub outcome: Result<TargetMetrics, ProbeError>,
}

/// Runs query definitions against workspaces and turns result tables into metrics.
#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn QueryBackend>,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn QueryBackend>) -> Self {
        Self { backend }
    }

    /// Query one workspace. Every metric is attributed to it.
    pub async fn query_single(
        &self,
        def: &QueryDefinition,
        timespan: &str,
        target: &TargetRef,
    ) -> Result<TargetMetrics, ProbeError> {
        tracing::debug!(workspace_id = %target.opaque_id, "sending query");
        let started = Instant::now();
        let response = self
            .backend
            .execute_query(&target.opaque_id, &[], &def.query, timespan)
            .await?;

        let mut labels = target.labels.clone();
        labels.insert(LABEL_WORKSPACE_ID.to_string(), target.opaque_id.clone());
        Ok(build_target_metrics(def, &response, &labels, started.elapsed()))
    }

    /// One cross-workspace query: the first target is primary, the rest are
    /// passed as additional workspaces. Rows cannot be attributed to a
    /// workspace, so no `workspaceID` label is set.
    pub async fn query_multi(
        &self,
        def: &QueryDefinition,
        timespan: &str,
        targets: &[TargetRef],
    ) -> Result<TargetMetrics, ProbeError> {
        let Some((primary, rest)) = targets.split_first() else {
            return Ok(TargetMetrics::default());
        };
        let additional: Vec<String> = rest.iter().map(|t| t.opaque_id.clone()).collect();
        tracing::debug!(
            workspace_id = %primary.opaque_id,
            additional = additional.len(),
            "sending multi-workspace query"
        );
        let started = Instant::now();
        let response = self
            .backend
            .execute_query(&primary.opaque_id, &additional, &def.query, timespan)
            .await?;
        Ok(build_target_metrics(
            def,
            &response,
            &BTreeMap::new(),
            started.elapsed(),
        ))
    }

    /// Spawn the workers for `def` and report each outcome on `tx`.
    ///
    /// Every worker owns a clone of `tx`; the receiver sees the channel close
    /// once the last worker has finished.
    pub fn fan_out(
        &self,
        def: Arc<QueryDefinition>,
        timespan: Arc<str>,
        targets: Vec<TargetRef>,
        scope: RequestScope,
        tx: mpsc::Sender<ProbeResult>,
    ) {
        match def.query_mode {
            QueryMode::Single => {
                for target in targets {
                    let executor = self.clone();
                    let (def, timespan, scope, tx) =
                        (def.clone(), timespan.clone(), scope.clone(), tx.clone());
                    tokio::spawn(async move {
                        let workspace_id = target.opaque_id.clone();
                        let outcome = isolate(async {
                            let _permit = acquire(&scope).await?;
                            executor.query_single(&def, &timespan, &target).await
                        })
                        .await;
                        send(&tx, &def.metric, workspace_id, outcome).await;
                    });
                }
            }
            QueryMode::Multi => {
                let executor = self.clone();
                tokio::spawn(async move {
                    let outcome = isolate(async {
                        let _permit = acquire(&scope).await?;
                        executor.query_multi(&def, &timespan, &targets).await
                    })
                    .await;
                    send(&tx, &def.metric, String::new(), outcome).await;
                });
            }
        }
    }
}

async fn acquire(scope: &RequestScope) -> Result<crate::concurrency::QueryPermit, ProbeError> {
    scope
        .acquire()
        .await
        .map_err(|_| ProbeError::Query("query limiter closed".to_string()))
}

async fn send(
    tx: &mpsc::Sender<ProbeResult>,
    metric: &str,
    workspace_id: String,
    outcome: Result<TargetMetrics, ProbeError>,
) {
    let result = ProbeResult {
        metric: metric.to_string(),
        workspace_id,
        outcome,
    };
    if tx.send(result).await.is_err() {
        tracing::debug!("probe result dropped, receiver gone");
    }
}

/// Run a worker body, converting a panic into a query error.
async fn isolate<F>(fut: F) -> Result<TargetMetrics, ProbeError>
where
    F: std::future::Future<Output = Result<TargetMetrics, ProbeError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(ProbeError::Query(format!(
            "query worker panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn build_target_metrics(
    def: &QueryDefinition,
    response: &QueryResponse,
    labels: &BTreeMap<String, String>,
    elapsed: Duration,
) -> TargetMetrics {
    let mut out = TargetMetrics {
        elapsed,
        ..TargetMetrics::default()
    };
    for table in &response.tables {
        let Some(rows) = table.decode_rows() else {
            tracing::debug!(table = %table.name, "skipping table without rows or columns");
            continue;
        };
        out.rows += rows.len();
        for row in &rows {
            for (name, mut metrics) in build_metric_list(&def.metric, &def.metric_config, row) {
                for metric in &mut metrics {
                    metric.labels.extend(labels.clone());
                    metric
                        .labels
                        .insert(LABEL_WORKSPACE_TABLE.to_string(), table.name.clone());
                }
                out.metrics.add(&name, metrics);
            }
        }
    }
    out
}
