use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::AppState;
use crate::cache::{CacheStatus, fingerprint};
use crate::error::ProbeError;
use crate::executor::ProbeResult;
use crate::models::metrics::MetricList;
use crate::models::probe::ProbeRequest;
use crate::models::query::{QueryDefinition, QueryMode};
use crate::models::target::{ResourceId, TargetRef};

const FAN_IN_BUFFER: usize = 8;

/// Result of a probe together with the cache state of both cache layers.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub metrics: MetricList,
    pub cache: CacheStatus,
    /// Only set for discovery-based probes.
    pub discovery: Option<CacheStatus>,
}

/// One query batch, validated before anything is sent.
struct Batch {
    def: Arc<QueryDefinition>,
    timespan: Arc<str>,
    targets: Vec<TargetRef>,
}

/// Serves one scrape: resolves targets, runs every query definition of the
/// requested module and reduces all rows into one [`MetricList`].
pub struct Prober<'a> {
    state: &'a AppState,
    request: ProbeRequest,
}

impl<'a> Prober<'a> {
    pub fn new(state: &'a AppState, request: ProbeRequest) -> Self {
        Self { state, request }
    }

    #[tracing::instrument(skip(self), fields(module = %self.request.module_name))]
    pub async fn run(self) -> Result<ProbeOutcome, ProbeError> {
        let cache_key = format!("metrics:{}", fingerprint([&self.request.fingerprint]));
        let cache_ttl = self.request.cache_ttl();

        if cache_ttl.is_some() {
            if let Some((metrics, until)) = self
                .state
                .metric_cache
                .get_json::<MetricList>(&cache_key)
                .await
            {
                tracing::debug!("fetched metrics from cache");
                return Ok(ProbeOutcome {
                    metrics,
                    cache: CacheStatus::hit(until),
                    discovery: None,
                });
            }
        }

        let (targets, discovery) = self.resolve_targets().await?;
        let metrics = self.execute(targets).await?;

        let mut cache = CacheStatus::default();
        if let Some(ttl) = cache_ttl {
            cache.until = self.state.metric_cache.set_json(cache_key, &metrics, ttl).await;
        }

        Ok(ProbeOutcome {
            metrics,
            cache,
            discovery,
        })
    }

    async fn resolve_targets(&self) -> Result<(Vec<TargetRef>, Option<CacheStatus>), ProbeError> {
        if let Some(filters) = &self.request.discovery {
            let outcome = self.state.discovery.resolve(filters).await?;
            return Ok((outcome.targets, Some(outcome.cache)));
        }
        let targets = self.resolve_explicit(&self.request.explicit_targets).await?;
        Ok((targets, None))
    }

    /// Bare ids are used as they are; ARM resource paths are looked up.
    async fn resolve_explicit(&self, ids: &[String]) -> Result<Vec<TargetRef>, ProbeError> {
        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            if ResourceId::is_resource_path(id) {
                targets.push(self.state.discovery.get_target(id).await?);
            } else {
                targets.push(TargetRef::from_id(id.as_str()));
            }
        }
        Ok(targets)
    }

    async fn plan(&self, targets: &[TargetRef]) -> Result<Vec<Batch>, ProbeError> {
        let mut batches = Vec::new();
        for def in self.state.queries.for_module(&self.request.module_name) {
            let targets = match def.target_override() {
                Some(ids) => self.resolve_explicit(ids).await?,
                None => targets.to_vec(),
            };
            if targets.is_empty() {
                if self.request.optional {
                    tracing::debug!(metric = %def.metric, "no workspaces, skipping optional query");
                    continue;
                }
                return Err(ProbeError::NoTargets);
            }

            let timespan = def
                .timespan
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| {
                    ProbeError::Configuration(format!(
                        "timespan for metric \"{}\" is not set",
                        def.metric
                    ))
                })?;

            batches.push(Batch {
                def: Arc::new(def.clone()),
                timespan: Arc::from(timespan),
                targets,
            });
        }
        Ok(batches)
    }

    async fn execute(&self, targets: Vec<TargetRef>) -> Result<MetricList, ProbeError> {
        let module = self.request.module_name.as_str();
        let batches = self.plan(&targets).await?;
        if batches.is_empty() {
            tracing::debug!("nothing to query for module {module}");
            return Ok(MetricList::new());
        }
        let workspaces: BTreeSet<&str> = batches
            .iter()
            .flat_map(|b| b.targets.iter().map(|t| t.opaque_id.as_str()))
            .collect();
        self.state.metrics.set_workspace_count(module, workspaces.len());

        let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
        for batch in &batches {
            tallies.entry(batch.def.metric.clone()).or_default().pending += match batch.def.query_mode {
                QueryMode::Single => batch.targets.len(),
                QueryMode::Multi => 1,
            };
        }

        let started = Instant::now();
        let scope = self.state.concurrency.request_scope(self.request.parallel);
        let (tx, mut rx) = mpsc::channel::<ProbeResult>(FAN_IN_BUFFER);
        for batch in batches {
            self.state.executor.fan_out(
                batch.def,
                batch.timespan,
                batch.targets,
                scope.clone(),
                tx.clone(),
            );
        }
        drop(tx);

        let mut list = MetricList::new();
        let mut failures = 0usize;
        let self_metrics = &self.state.metrics;
        while let Some(result) = rx.recv().await {
            let ProbeResult {
                metric,
                workspace_id,
                outcome,
            } = result;
            self_metrics.record_request(&workspace_id, module, &metric);
            let tally = tallies.entry(metric.clone()).or_default();
            match outcome {
                Ok(target) => {
                    tracing::debug!(
                        %workspace_id,
                        %metric,
                        rows = target.rows,
                        elapsed_ms = target.elapsed.as_millis() as u64,
                        "query finished"
                    );
                    self_metrics.record_success(&workspace_id, module, &metric);
                    tally.rows += target.rows;
                    list.merge(target.metrics);
                }
                Err(err) => {
                    failures += 1;
                    tracing::warn!(%workspace_id, %metric, "query failed: {err}");
                    self_metrics.record_failure(&workspace_id, module, &metric);
                }
            }
            tally.pending = tally.pending.saturating_sub(1);
            if tally.pending == 0 {
                tracing::debug!(%metric, results = tally.rows, "fetched {} results", tally.rows);
                self_metrics.observe_query_time(module, &metric, started.elapsed());
                self_metrics.set_query_results(module, &metric, tally.rows);
            }
        }

        if failures > 0 {
            tracing::info!("probe finished with {failures} failed queries");
        }
        Ok(list)
    }
}

/// Progress of one metric's queries within a probe.
#[derive(Debug, Default)]
struct Tally {
    pending: usize,
    rows: usize,
}
