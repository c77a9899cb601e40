pub mod backend;
pub mod cache;
pub mod concurrency;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod exposition;
pub mod handlers;
pub mod metric_builder;
pub mod metrics;
pub mod models;
pub mod params;
pub mod prober;

use std::sync::Arc;

use backend::{DiscoveryBackend, QueryBackend};
use cache::TtlCache;
use concurrency::ConcurrencyController;
use config::ExporterConfig;
use discovery::ServiceDiscovery;
use executor::QueryExecutor;
use metrics::ExporterMetrics;
use models::query::QueryConfig;

/// Process-wide state shared by every request. Built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<QueryConfig>,
    pub executor: QueryExecutor,
    pub discovery: ServiceDiscovery,
    pub metric_cache: TtlCache,
    pub concurrency: ConcurrencyController,
    pub metrics: ExporterMetrics,
    pub default_workspaces: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(
        config: &ExporterConfig,
        queries: QueryConfig,
        query_backend: Arc<dyn QueryBackend>,
        discovery_backend: Arc<dyn DiscoveryBackend>,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            queries: Arc::new(queries),
            executor: QueryExecutor::new(query_backend),
            discovery: ServiceDiscovery::new(
                discovery_backend,
                TtlCache::new("servicediscovery"),
                config.discovery_cache_ttl,
                config.discovery_tags.clone(),
            ),
            metric_cache: TtlCache::new("metrics"),
            concurrency: ConcurrencyController::new(config.concurrency, config.parallel),
            metrics: ExporterMetrics::new()?,
            default_workspaces: Arc::new(config.default_workspaces.clone()),
        })
    }
}
