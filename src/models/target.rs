use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::BackendError;

/// One Log Analytics workspace to query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    /// Workspace customer id used by the query API.
    pub opaque_id: String,
    /// ARM resource id; only set when the target was resolved from a resource path.
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl TargetRef {
    pub fn from_id(opaque_id: impl Into<String>) -> Self {
        Self {
            opaque_id: opaque_id.into(),
            resource_id: None,
            labels: BTreeMap::new(),
        }
    }
}

/// Decomposed ARM resource id:
/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription: String,
    pub resource_group: String,
    pub provider: String,
    pub resource_type: String,
    pub name: String,
    raw: String,
}

impl ResourceId {
    pub fn is_resource_path(value: &str) -> bool {
        value.trim_start().to_ascii_lowercase().starts_with("/subscriptions/")
    }

    pub fn parse(value: &str) -> Result<Self, BackendError> {
        let invalid = || BackendError::InvalidResourceId(value.to_string());
        let parts: Vec<&str> = value.trim().trim_matches('/').split('/').collect();
        if parts.len() < 8 {
            return Err(invalid());
        }
        let segment_is = |idx: usize, name: &str| parts[idx].eq_ignore_ascii_case(name);
        if !segment_is(0, "subscriptions") || !segment_is(2, "resourceGroups") || !segment_is(4, "providers") {
            return Err(invalid());
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid());
        }
        Ok(Self {
            subscription: parts[1].to_string(),
            resource_group: parts[3].to_string(),
            provider: parts[5].to_string(),
            resource_type: parts[6].to_string(),
            name: parts[parts.len() - 1].to_string(),
            raw: format!("/{}", parts.join("/")),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Labels describing the resource location.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("subscriptionID".to_string(), self.subscription.clone()),
            ("resourceGroup".to_string(), self.resource_group.clone()),
            ("resourceName".to_string(), self.name.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "/subscriptions/0000-1111/resourceGroups/rg-logs/providers/Microsoft.OperationalInsights/workspaces/ws-prod";

    #[test]
    fn test_parse_resource_id() {
        let id = ResourceId::parse(ID).unwrap();
        assert_eq!(id.subscription, "0000-1111");
        assert_eq!(id.resource_group, "rg-logs");
        assert_eq!(id.provider, "Microsoft.OperationalInsights");
        assert_eq!(id.resource_type, "workspaces");
        assert_eq!(id.name, "ws-prod");
        assert_eq!(id.as_str(), ID);
        assert_eq!(id.labels()["resourceGroup"], "rg-logs");
    }

    #[test]
    fn test_parse_is_case_insensitive_on_segments() {
        let id = ResourceId::parse(&ID.replace("resourceGroups", "RESOURCEGROUPS")).unwrap();
        assert_eq!(id.resource_group, "rg-logs");
    }

    #[test]
    fn test_parse_rejects_bare_ids() {
        assert!(ResourceId::parse("8a7b6c5d-0000-1111-2222-333344445555").is_err());
        assert!(ResourceId::parse("/subscriptions/x/resourceGroups/rg").is_err());
        assert!(!ResourceId::is_resource_path("8a7b6c5d"));
        assert!(ResourceId::is_resource_path(ID));
    }
}
