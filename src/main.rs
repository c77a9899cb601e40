use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use loganalytics_exporter::AppState;
use loganalytics_exporter::backend::auth::{Credential, TokenProvider};
use loganalytics_exporter::backend::{LogAnalyticsClient, ResourceGraphClient};
use loganalytics_exporter::config::ExporterConfig;
use loganalytics_exporter::handlers;
use loganalytics_exporter::models::query::QueryConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ExporterConfig::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loganalytics_exporter=info,tower_http=info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        "starting loganalytics-exporter v{}",
        env!("CARGO_PKG_VERSION")
    );

    let queries = QueryConfig::load(&config.config_path)?;

    if matches!(config.credential, Credential::Anonymous) {
        tracing::warn!("no Azure credentials configured, requests are sent without authorization");
    }

    let http = reqwest::Client::builder()
        .user_agent(concat!("loganalytics-exporter/", env!("CARGO_PKG_VERSION")))
        .timeout(config.request_timeout)
        .build()?;
    let tokens = Arc::new(TokenProvider::new(
        config.credential.clone(),
        config.authority_host.clone(),
        http.clone(),
    ));
    let query_backend = Arc::new(LogAnalyticsClient::new(
        http.clone(),
        &config.loganalytics_endpoint,
        tokens.clone(),
    ));
    let discovery_backend = Arc::new(ResourceGraphClient::new(
        http,
        &config.resource_manager_endpoint,
        tokens,
    ));

    tracing::info!(
        "concurrency {} (parallel {}), servicediscovery cache {:?}",
        config.concurrency,
        config.parallel,
        config.discovery_cache_ttl
    );

    let state = AppState::new(&config, queries, query_backend, discovery_backend)?;

    let app = handlers::app(state, config.request_timeout);

    tracing::info!("loganalytics-exporter listening on {}", config.bind);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
