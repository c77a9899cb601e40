use anyhow::Context;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::auth::Credential;
use crate::models::query::{QueryConfig, QueryDefinition};
use crate::params::parse_duration;

/// Process options, read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub bind: SocketAddr,
    pub request_timeout: Duration,
    pub config_path: PathBuf,
    /// Workspaces probed by `/probe` when the request names none.
    pub default_workspaces: Vec<String>,
    pub concurrency: usize,
    pub parallel: usize,
    pub loganalytics_endpoint: String,
    pub resource_manager_endpoint: String,
    /// Zero disables the discovery cache.
    pub discovery_cache_ttl: Duration,
    pub discovery_tags: Vec<String>,
    pub credential: Credential,
    pub authority_host: String,
    pub log_json: bool,
}

impl ExporterConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind = var("SERVER_BIND")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid SERVER_BIND")?;
        let request_timeout = duration_var(var("SERVER_TIMEOUT"), "SERVER_TIMEOUT", "60s")?;
        let discovery_cache_ttl = duration_var(
            var("AZURE_SERVICEDISCOVERY_CACHE"),
            "AZURE_SERVICEDISCOVERY_CACHE",
            "30m",
        )?;

        let concurrency = match var("LOGANALYTICS_CONCURRENCY") {
            Some(v) => v.parse::<usize>().context("invalid LOGANALYTICS_CONCURRENCY")?,
            None => 5,
        };
        let parallel = match var("LOGANALYTICS_PARALLEL") {
            Some(v) => v.parse::<usize>().context("invalid LOGANALYTICS_PARALLEL")?,
            None => concurrency,
        };
        if concurrency == 0 || parallel == 0 {
            anyhow::bail!("LOGANALYTICS_CONCURRENCY and LOGANALYTICS_PARALLEL must be at least 1");
        }

        let credential = match (
            var("AZURE_ACCESS_TOKEN"),
            var("AZURE_TENANT_ID"),
            var("AZURE_CLIENT_ID"),
            var("AZURE_CLIENT_SECRET"),
        ) {
            (Some(token), ..) => Credential::Static(token),
            (None, Some(tenant_id), Some(client_id), Some(client_secret)) => Credential::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            },
            _ => Credential::Anonymous,
        };

        Ok(Self {
            bind,
            request_timeout,
            config_path: PathBuf::from(var("CONFIG").unwrap_or_else(|| "./queries.toml".to_string())),
            default_workspaces: split_list(var("LOGANALYTICS_WORKSPACE")),
            concurrency,
            parallel,
            loganalytics_endpoint: var("LOGANALYTICS_ENDPOINT")
                .unwrap_or_else(|| "https://api.loganalytics.io".to_string()),
            resource_manager_endpoint: var("AZURE_RESOURCEMANAGER_ENDPOINT")
                .unwrap_or_else(|| "https://management.azure.com".to_string()),
            discovery_cache_ttl,
            discovery_tags: split_list(var("AZURE_SERVICEDISCOVERY_TAGS")),
            credential,
            authority_host: var("AZURE_AUTHORITY_HOST")
                .unwrap_or_else(|| "https://login.microsoftonline.com".to_string()),
            log_json: matches!(
                var("LOG_JSON").map(|v| v.to_ascii_lowercase()).as_deref(),
                Some("1" | "true" | "yes")
            ),
        })
    }
}

fn duration_var(value: Option<String>, key: &str, default: &str) -> anyhow::Result<Duration> {
    let value = value.unwrap_or_else(|| default.to_string());
    parse_duration(&value).map_err(|e| anyhow::anyhow!("invalid {key} \"{value}\": {e}"))
}

fn split_list(value: Option<String>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl QueryConfig {
    /// Load query definitions from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read query config {}", path.display()))?;
        let config = Self::parse(&contents)
            .with_context(|| format!("invalid query config {}", path.display()))?;
        tracing::info!(
            "loaded {} query definitions from {}",
            config.queries.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: QueryConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (idx, def) in self.queries.iter().enumerate() {
            let which = || format!("query #{} ({:?})", idx + 1, def.metric);
            if def.metric.trim().is_empty() {
                anyhow::bail!("{}: metric name is empty", which());
            }
            if def.query.trim().is_empty() {
                anyhow::bail!("{}: query is empty", which());
            }
        }
        Ok(())
    }

    pub fn for_module<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a QueryDefinition> + 'a {
        self.queries.iter().filter(move |def| def.module == module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<ExporterConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExporterConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.concurrency, 5);
        assert_eq!(cfg.parallel, 5);
        assert_eq!(cfg.discovery_cache_ttl, Duration::from_secs(1800));
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert!(matches!(cfg.credential, Credential::Anonymous));
        assert!(cfg.default_workspaces.is_empty());
        assert!(!cfg.log_json);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("LOGANALYTICS_WORKSPACE", "ws-a ws-b,ws-c"),
            ("LOGANALYTICS_CONCURRENCY", "10"),
            ("LOGANALYTICS_PARALLEL", "2"),
            ("AZURE_SERVICEDISCOVERY_CACHE", "0"),
            ("AZURE_SERVICEDISCOVERY_TAGS", "owner,env"),
            ("AZURE_TENANT_ID", "t"),
            ("AZURE_CLIENT_ID", "c"),
            ("AZURE_CLIENT_SECRET", "s"),
            ("LOG_JSON", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.default_workspaces, vec!["ws-a", "ws-b", "ws-c"]);
        assert_eq!(cfg.concurrency, 10);
        assert_eq!(cfg.parallel, 2);
        assert!(cfg.discovery_cache_ttl.is_zero());
        assert_eq!(cfg.discovery_tags, vec!["owner", "env"]);
        assert!(matches!(cfg.credential, Credential::ClientSecret { .. }));
        assert!(cfg.log_json);
    }

    #[test]
    fn test_static_token_wins() {
        let cfg = config(&[("AZURE_ACCESS_TOKEN", "tok"), ("AZURE_TENANT_ID", "t")]).unwrap();
        assert!(matches!(cfg.credential, Credential::Static(_)));
    }

    #[test]
    fn test_invalid_values() {
        assert!(config(&[("LOGANALYTICS_CONCURRENCY", "0")]).is_err());
        assert!(config(&[("SERVER_TIMEOUT", "soon")]).is_err());
        assert!(config(&[("SERVER_BIND", "nowhere")]).is_err());
    }

    #[test]
    fn test_query_config_validation() {
        let ok = QueryConfig::parse(
            r#"
            [[queries]]
            module = "m1"
            metric = "disk_free"
            query = "Perf"
            timespan = "PT1H"

            [[queries]]
            module = "m2"
            metric = "heartbeat"
            query = "Heartbeat"
            "#,
        )
        .unwrap();
        assert_eq!(ok.for_module("m1").count(), 1);
        assert_eq!(ok.for_module("none").count(), 0);

        let err = QueryConfig::parse(
            r#"
            [[queries]]
            module = "m1"
            metric = "disk_free"
            query = "  "
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("query is empty"));

        assert!(QueryConfig::parse(
            r#"
            [[queries]]
            module = "m1"
            metric = "x"
            query = "T"
            query_mode = "fanout"
            "#,
        )
        .is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(QueryConfig::load("/nonexistent/queries.toml").is_err());
    }
}
