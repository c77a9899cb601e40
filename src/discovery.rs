use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{DiscoveryBackend, ResourceRow};
use crate::cache::{CacheStatus, TtlCache, fingerprint};
use crate::error::{BackendError, ProbeError};
use crate::metric_builder::sanitize_label_name;
use crate::models::probe::DiscoveryFilters;
use crate::models::target::{ResourceId, TargetRef};

const WORKSPACE_RESOURCE_TYPE: &str = "Microsoft.OperationalInsights/workspaces";

/// Result of a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub targets: Vec<TargetRef>,
    pub cache: CacheStatus,
}

/// Finds Log Analytics workspaces through Azure Resource Graph.
///
/// Results are cached per `(subscriptions, filter)` and single workspace
/// lookups per lower-cased resource id, both in the discovery cache. A zero
/// cache duration disables both layers.
#[derive(Clone)]
pub struct ServiceDiscovery {
    backend: Arc<dyn DiscoveryBackend>,
    cache: TtlCache,
    cache_ttl: Duration,
    tags: Vec<String>,
}

impl ServiceDiscovery {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        cache: TtlCache,
        cache_ttl: Duration,
        tags: Vec<String>,
    ) -> Self {
        Self {
            backend,
            cache,
            cache_ttl,
            tags,
        }
    }

    fn cache_enabled(&self) -> bool {
        !self.cache_ttl.is_zero()
    }

    pub async fn resolve(&self, filters: &DiscoveryFilters) -> Result<DiscoveryOutcome, ProbeError> {
        if filters.subscriptions.is_empty() {
            return Err(ProbeError::ClientInput(
                "parameter \"subscription\" is missing".to_string(),
            ));
        }

        let filter = normalize_filter(filters.filter.as_deref());
        let mut key_parts: Vec<&str> = filters.subscriptions.iter().map(String::as_str).collect();
        key_parts.push("|");
        key_parts.push(filter.unwrap_or_default());
        let cache_key = format!("sd:{}", fingerprint(key_parts));

        if self.cache_enabled() {
            if let Some((targets, until)) = self.cache.get_json::<Vec<TargetRef>>(&cache_key).await {
                tracing::debug!("fetched servicediscovery from cache");
                return Ok(DiscoveryOutcome {
                    targets,
                    cache: CacheStatus::hit(until),
                });
            }
        }

        let query = build_query(filter);
        tracing::debug!(
            subscriptions = ?filters.subscriptions,
            "requesting list of workspaces via resource graph"
        );
        let rows = self
            .backend
            .execute_resource_graph_query(&filters.subscriptions, &query)
            .await
            .map_err(ProbeError::Discovery)?;

        let targets: Vec<TargetRef> = rows
            .into_iter()
            .filter_map(|row| self.target_from_row(row))
            .collect();
        tracing::debug!("servicediscovery found {} workspaces", targets.len());

        let mut cache = CacheStatus::default();
        if self.cache_enabled() {
            cache.until = self
                .cache
                .set_json(cache_key, &targets, self.cache_ttl)
                .await;
        }

        Ok(DiscoveryOutcome { targets, cache })
    }

    /// Resolve a workspace given by its ARM resource id.
    pub async fn get_target(&self, resource_id: &str) -> Result<TargetRef, ProbeError> {
        let id = ResourceId::parse(resource_id).map_err(|e| ProbeError::ClientInput(e.to_string()))?;
        let cache_key = format!("sd:workspace:{}", id.as_str().to_lowercase());

        if self.cache_enabled() {
            if let Some((target, _)) = self.cache.get_json::<TargetRef>(&cache_key).await {
                tracing::debug!("fetched workspace {} from cache", id.as_str());
                return Ok(target);
            }
        }

        let workspace = self
            .backend
            .get_workspace(&id)
            .await
            .map_err(ProbeError::Discovery)?;
        let customer_id = workspace
            .properties
            .customer_id
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ProbeError::Discovery(BackendError::Decode(format!(
                    "workspace {} has no customerId",
                    id.as_str()
                )))
            })?;

        let target = self.build_target(customer_id, &id, workspace.tags.as_ref());
        if self.cache_enabled() {
            self.cache.set_json(cache_key, &target, self.cache_ttl).await;
        }
        Ok(target)
    }

    fn target_from_row(&self, row: ResourceRow) -> Option<TargetRef> {
        let customer_id = row.customer_id.filter(|c| !c.is_empty())?;
        match ResourceId::parse(&row.id) {
            Ok(id) => Some(self.build_target(customer_id, &id, row.tags.as_ref())),
            Err(e) => {
                tracing::warn!("servicediscovery: {e}");
                Some(TargetRef {
                    resource_id: Some(row.id),
                    ..TargetRef::from_id(customer_id)
                })
            }
        }
    }

    fn build_target(
        &self,
        opaque_id: String,
        id: &ResourceId,
        tags: Option<&BTreeMap<String, String>>,
    ) -> TargetRef {
        let mut labels = id.labels();
        for tag in &self.tags {
            let value = tags
                .and_then(|t| t.iter().find(|(k, _)| k.eq_ignore_ascii_case(tag)))
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            labels.insert(format!("tag_{}", sanitize_label_name(tag)), value);
        }
        TargetRef {
            opaque_id,
            resource_id: Some(id.as_str().to_string()),
            labels,
        }
    }
}

fn normalize_filter(filter: Option<&str>) -> Option<&str> {
    filter
        .map(|f| f.trim().trim_start_matches('|').trim())
        .filter(|f| !f.is_empty())
}

/// Resource Graph query listing workspaces, optionally narrowed by a KQL
/// fragment such as `where resourceGroup == "rg"`.
pub fn build_query(filter: Option<&str>) -> String {
    let mut query = String::from("resources\n");
    query.push_str(&format!("| where type =~ \"{WORKSPACE_RESOURCE_TYPE}\"\n"));
    if let Some(filter) = normalize_filter(filter) {
        query.push_str(&format!("| {filter}\n"));
    }
    query.push_str("| project id, customerId=properties.customerId, tags");
    query
}
