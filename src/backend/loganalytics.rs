use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use super::auth::{TokenProvider, scope_for};
use super::{QueryBackend, QueryResponse, check_status};
use crate::error::BackendError;

/// Client for the Log Analytics query API (`POST /v1/workspaces/{id}/query`).
#[derive(Debug, Clone)]
pub struct LogAnalyticsClient {
    http: reqwest::Client,
    endpoint: String,
    scope: String,
    tokens: Arc<TokenProvider>,
}

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    timespan: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    workspaces: Option<&'a [String]>,
}

impl LogAnalyticsClient {
    pub fn new(http: reqwest::Client, endpoint: &str, tokens: Arc<TokenProvider>) -> Self {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Self {
            http,
            scope: scope_for(&endpoint),
            endpoint,
            tokens,
        }
    }

    fn query_url(&self, workspace_id: &str) -> String {
        format!(
            "{}/v1/workspaces/{}/query",
            self.endpoint,
            urlencoding::encode(workspace_id)
        )
    }
}

#[async_trait]
impl QueryBackend for LogAnalyticsClient {
    async fn execute_query(
        &self,
        workspace_id: &str,
        additional_workspaces: &[String],
        query: &str,
        timespan: &str,
    ) -> Result<QueryResponse, BackendError> {
        let body = QueryBody {
            query,
            timespan,
            workspaces: (!additional_workspaces.is_empty()).then_some(additional_workspaces),
        };

        let mut req = self.http.post(self.query_url(workspace_id)).json(&body);
        if let Some(token) = self.tokens.token(&self.scope).await? {
            req = req.bearer_auth(token);
        }

        let resp = check_status(req.send().await?).await?;
        resp.json::<QueryResponse>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_url_and_scope() {
        let client = LogAnalyticsClient::new(
            reqwest::Client::new(),
            "https://api.loganalytics.io/",
            Arc::new(TokenProvider::anonymous()),
        );
        assert_eq!(
            client.query_url("ws a"),
            "https://api.loganalytics.io/v1/workspaces/ws%20a/query"
        );
        assert_eq!(client.scope, "https://api.loganalytics.io/.default");
    }

    #[test]
    fn test_body_omits_empty_workspace_list() {
        let body = QueryBody {
            query: "Perf",
            timespan: "PT1H",
            workspaces: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"query": "Perf", "timespan": "PT1H"})
        );

        let extra = vec!["ws-b".to_string()];
        let body = QueryBody {
            query: "Perf",
            timespan: "PT1H",
            workspaces: Some(&extra),
        };
        assert_eq!(serde_json::to_value(&body).unwrap()["workspaces"][0], "ws-b");
    }
}
