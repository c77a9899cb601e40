use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::BackendError;

/// How the exporter authenticates against Azure.
#[derive(Clone)]
pub enum Credential {
    /// No `Authorization` header (local endpoints, tests).
    Anonymous,
    /// Pre-issued bearer token.
    Static(String),
    /// OAuth2 client credentials grant.
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Anonymous => f.write_str("Anonymous"),
            Credential::Static(_) => f.write_str("Static(***)"),
            Credential::ClientSecret {
                tenant_id, client_id, ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Hands out bearer tokens per scope, refreshing them shortly before expiry.
pub struct TokenProvider {
    credential: Credential,
    authority: String,
    http: reqwest::Client,
    tokens: Mutex<HashMap<String, CachedToken>>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("credential", &self.credential)
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}

const REFRESH_MARGIN_SECS: i64 = 300;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

impl TokenProvider {
    pub fn new(credential: Credential, authority: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            credential,
            authority: authority.into().trim_end_matches('/').to_string(),
            http,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Credential::Anonymous, "", reqwest::Client::new())
    }

    /// Bearer token for `scope`, or `None` for anonymous access.
    pub async fn token(&self, scope: &str) -> Result<Option<String>, BackendError> {
        let (tenant_id, client_id, client_secret) = match &self.credential {
            Credential::Anonymous => return Ok(None),
            Credential::Static(token) => return Ok(Some(token.clone())),
            Credential::ClientSecret {
                tenant_id,
                client_id,
                client_secret,
            } => (tenant_id, client_id, client_secret),
        };

        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(scope) {
            if cached.expires_at - chrono::Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(Some(cached.access_token.clone()));
            }
        }

        tracing::debug!("requesting access token for scope {scope}");
        let url = format!("{}/{tenant_id}/oauth2/v2.0/token", self.authority);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("scope", scope),
        ];
        let resp = self.http.post(&url).form(&form).send().await?;
        let resp = super::check_status(resp)
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?;
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Auth(format!("invalid token response: {e}")))?;

        let lifetime = parse_expires_in(body.expires_in.as_ref());
        tokens.insert(
            scope.to_string(),
            CachedToken {
                access_token: body.access_token.clone(),
                expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
            },
        );
        Ok(Some(body.access_token))
    }
}

/// `expires_in` is a number in v2 responses and a string in some v1 ones.
fn parse_expires_in(value: Option<&serde_json::Value>) -> i64 {
    let secs = match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    };
    secs.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS)
}

/// Default scope for an Azure API endpoint.
pub fn scope_for(endpoint: &str) -> String {
    format!("{}/.default", endpoint.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_anonymous_and_static_tokens() {
        let anon = TokenProvider::anonymous();
        assert_eq!(anon.token("s").await.unwrap(), None);

        let fixed = TokenProvider::new(Credential::Static("abc".into()), "", reqwest::Client::new());
        assert_eq!(fixed.token("s").await.unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_parse_expires_in() {
        assert_eq!(parse_expires_in(Some(&json!(1800))), 1800);
        assert_eq!(parse_expires_in(Some(&json!("900"))), 900);
        assert_eq!(parse_expires_in(None), DEFAULT_TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn test_scope_for() {
        assert_eq!(
            scope_for("https://api.loganalytics.io/"),
            "https://api.loganalytics.io/.default"
        );
    }
}
