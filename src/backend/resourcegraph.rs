use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::{TokenProvider, scope_for};
use super::{DiscoveryBackend, ResourceRow, WorkspaceResource, check_status};
use crate::error::BackendError;
use crate::models::target::ResourceId;

const RESOURCE_GRAPH_API_VERSION: &str = "2021-03-01";
const WORKSPACE_API_VERSION: &str = "2022-10-01";
const PAGE_SIZE: u32 = 1000;
const MAX_PAGES: usize = 100;

/// Azure Resource Manager client: Resource Graph queries and workspace lookups.
#[derive(Debug, Clone)]
pub struct ResourceGraphClient {
    http: reqwest::Client,
    endpoint: String,
    scope: String,
    tokens: Arc<TokenProvider>,
}

#[derive(Debug, Serialize)]
struct GraphRequest<'a> {
    subscriptions: &'a [String],
    query: &'a str,
    options: GraphOptions,
}

#[derive(Debug, Serialize)]
struct GraphOptions {
    #[serde(rename = "resultFormat")]
    result_format: &'static str,
    #[serde(rename = "$top")]
    top: u32,
    #[serde(rename = "$skipToken", skip_serializing_if = "Option::is_none")]
    skip_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    #[serde(default)]
    data: Vec<ResourceRow>,
    #[serde(rename = "$skipToken", default)]
    skip_token: Option<String>,
}

impl ResourceGraphClient {
    pub fn new(http: reqwest::Client, endpoint: &str, tokens: Arc<TokenProvider>) -> Self {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Self {
            http,
            scope: scope_for(&endpoint),
            endpoint,
            tokens,
        }
    }

    async fn authorize(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, BackendError> {
        Ok(match self.tokens.token(&self.scope).await? {
            Some(token) => req.bearer_auth(token),
            None => req,
        })
    }

    fn graph_url(&self) -> String {
        format!(
            "{}/providers/Microsoft.ResourceGraph/resources?api-version={RESOURCE_GRAPH_API_VERSION}",
            self.endpoint
        )
    }

    fn workspace_url(&self, resource_id: &ResourceId) -> String {
        format!(
            "{}{}?api-version={WORKSPACE_API_VERSION}",
            self.endpoint,
            resource_id.as_str()
        )
    }
}

#[async_trait]
impl DiscoveryBackend for ResourceGraphClient {
    async fn execute_resource_graph_query(
        &self,
        subscriptions: &[String],
        query: &str,
    ) -> Result<Vec<ResourceRow>, BackendError> {
        let mut rows = Vec::new();
        let mut skip_token = None;

        for _ in 0..MAX_PAGES {
            let body = GraphRequest {
                subscriptions,
                query,
                options: GraphOptions {
                    result_format: "objectArray",
                    top: PAGE_SIZE,
                    skip_token: skip_token.take(),
                },
            };
            let req = self.authorize(self.http.post(self.graph_url()).json(&body)).await?;
            let resp = check_status(req.send().await?).await?;
            let page: GraphResponse = resp
                .json()
                .await
                .map_err(|e| BackendError::Decode(e.to_string()))?;

            rows.extend(page.data);
            match page.skip_token.filter(|t| !t.is_empty()) {
                Some(token) => skip_token = Some(token),
                None => return Ok(rows),
            }
        }

        tracing::warn!("resource graph paging stopped after {MAX_PAGES} pages");
        Ok(rows)
    }

    async fn get_workspace(&self, resource_id: &ResourceId) -> Result<WorkspaceResource, BackendError> {
        let req = self.authorize(self.http.get(self.workspace_url(resource_id))).await?;
        let resp = check_status(req.send().await?).await?;
        resp.json::<WorkspaceResource>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ResourceGraphClient {
        ResourceGraphClient::new(
            reqwest::Client::new(),
            "https://management.azure.com/",
            Arc::new(TokenProvider::anonymous()),
        )
    }

    #[test]
    fn test_urls() {
        let client = client();
        assert_eq!(
            client.graph_url(),
            "https://management.azure.com/providers/Microsoft.ResourceGraph/resources?api-version=2021-03-01"
        );
        let id = ResourceId::parse(
            "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/ws",
        )
        .unwrap();
        assert_eq!(
            client.workspace_url(&id),
            "https://management.azure.com/subscriptions/s1/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/ws?api-version=2022-10-01"
        );
    }

    #[test]
    fn test_graph_request_shape() {
        let subs = vec!["s1".to_string(), "s2".to_string()];
        let body = GraphRequest {
            subscriptions: &subs,
            query: "resources",
            options: GraphOptions {
                result_format: "objectArray",
                top: PAGE_SIZE,
                skip_token: None,
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["subscriptions"][1], "s2");
        assert_eq!(value["options"]["resultFormat"], "objectArray");
        assert!(value["options"].get("$skipToken").is_none());
    }

    #[test]
    fn test_graph_response_decoding() {
        let page: GraphResponse = serde_json::from_str(
            r#"{
                "totalRecords": 2,
                "$skipToken": "next",
                "data": [
                    {"id": "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/a", "customerId": "cid-a", "tags": {"env": "prod"}},
                    {"id": "/subscriptions/s1/resourceGroups/rg/providers/Microsoft.OperationalInsights/workspaces/b", "customerId": null, "tags": null}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(page.skip_token.as_deref(), Some("next"));
        assert_eq!(page.data[0].customer_id.as_deref(), Some("cid-a"));
        assert_eq!(page.data[0].tags.as_ref().unwrap()["env"], "prod");
        assert!(page.data[1].customer_id.is_none());
    }
}
