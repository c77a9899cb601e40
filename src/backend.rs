pub mod auth;
pub mod loganalytics;
pub mod resourcegraph;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::BackendError;
use crate::models::row::{RowResult, RowValue};
use crate::models::target::ResourceId;

pub use loganalytics::LogAnalyticsClient;
pub use resourcegraph::ResourceGraphClient;

/// Tabular result of a Log Analytics query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub tables: Vec<ResultTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultTable {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Option<Vec<ResultColumn>>,
    #[serde(default)]
    pub rows: Option<Vec<Vec<serde_json::Value>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: String,
}

impl ResultTable {
    /// Rows decoded against this table's own columns; `None` for tables
    /// without rows or columns.
    pub fn decode_rows(&self) -> Option<Vec<RowResult>> {
        let columns = self.columns.as_ref()?;
        let rows = self.rows.as_ref()?;
        Some(
            rows.iter()
                .map(|cells| {
                    columns
                        .iter()
                        .zip(cells)
                        .map(|(col, cell)| (col.name.clone(), RowValue::from_json(cell, &col.column_type)))
                        .collect()
                })
                .collect(),
        )
    }
}

/// Executes analytical queries against one or more workspaces.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// `additional_workspaces` turns the call into a cross-workspace query whose
    /// rows cannot be attributed to a single workspace.
    async fn execute_query(
        &self,
        workspace_id: &str,
        additional_workspaces: &[String],
        query: &str,
        timespan: &str,
    ) -> Result<QueryResponse, BackendError>;
}

/// One row of the workspace discovery query.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRow {
    pub id: String,
    #[serde(rename = "customerId", default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

/// A workspace as returned by the resource manager.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceResource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: WorkspaceProperties,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceProperties {
    #[serde(rename = "customerId", default)]
    pub customer_id: Option<String>,
}

/// Resource graph and resource manager lookups used for service discovery.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    async fn execute_resource_graph_query(
        &self,
        subscriptions: &[String],
        query: &str,
    ) -> Result<Vec<ResourceRow>, BackendError>;

    async fn get_workspace(&self, resource_id: &ResourceId) -> Result<WorkspaceResource, BackendError>;
}

/// Turn a non-success response into [`BackendError::Status`].
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body: truncate(&body, 512),
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rows_uses_own_columns() {
        let resp: QueryResponse = serde_json::from_str(
            r#"{
                "tables": [
                    {
                        "name": "PrimaryResult",
                        "columns": [{"name": "Computer", "type": "string"}, {"name": "FreeMB", "type": "real"}],
                        "rows": [["host1", 500], ["host2", "12.5"]]
                    },
                    {
                        "name": "Second",
                        "columns": [{"name": "Count", "type": "long"}],
                        "rows": [[3]]
                    },
                    {"name": "Empty", "columns": null, "rows": null}
                ]
            }"#,
        )
        .unwrap();

        let first = resp.tables[0].decode_rows().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["Computer"], RowValue::String("host1".into()));
        assert_eq!(first[1]["FreeMB"], RowValue::Number(12.5));

        let second = resp.tables[1].decode_rows().unwrap();
        assert_eq!(second[0]["Count"], RowValue::Number(3.0));
        assert!(!second[0].contains_key("Computer"));

        assert!(resp.tables[2].decode_rows().is_none());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
