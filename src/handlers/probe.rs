use axum::{
    extract::{RawQuery, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::AppState;
use crate::cache::CacheStatus;
use crate::error::ProbeError;
use crate::exposition;
use crate::models::probe::{DiscoveryFilters, ProbeRequest};
use crate::params::QueryParams;
use crate::prober::{ProbeOutcome, Prober};

const METRICS_CACHED: &str = "x-metrics-cached";
const METRICS_CACHED_UNTIL: &str = "x-metrics-cached-until";
const SD_CACHED: &str = "x-servicediscovery-cached";
const SD_CACHED_UNTIL: &str = "x-servicediscovery-cached-until";

/// Probe the workspaces named by `workspace`, or the configured defaults.
pub async fn probe(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
) -> Result<Response, ProbeError> {
    let params = QueryParams::from_raw(raw.as_deref());
    let mut request = base_request(&params, &method, &uri)?;
    request.explicit_targets = params.get_list("workspace");
    if request.explicit_targets.is_empty() {
        request.explicit_targets = state.default_workspaces.to_vec();
    }
    run(&state, request).await
}

/// Probe the workspaces named by the required `workspace` parameter.
pub async fn probe_workspace(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
) -> Result<Response, ProbeError> {
    let params = QueryParams::from_raw(raw.as_deref());
    let mut request = base_request(&params, &method, &uri)?;
    request.explicit_targets = params.get_list_required("workspace")?;
    run(&state, request).await
}

/// Probe every workspace discovered in the given subscriptions.
pub async fn probe_subscription(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    RawQuery(raw): RawQuery,
) -> Result<Response, ProbeError> {
    let params = QueryParams::from_raw(raw.as_deref());
    let mut request = base_request(&params, &method, &uri)?;
    request.discovery = Some(DiscoveryFilters {
        subscriptions: params.get_list_required("subscription")?,
        filter: params.get("filter").map(str::to_string),
    });
    run(&state, request).await
}

fn base_request(params: &QueryParams, method: &Method, uri: &Uri) -> Result<ProbeRequest, ProbeError> {
    let mut request = ProbeRequest::new(params.get("module").unwrap_or_default());
    request.cache_ttl = params.get_duration("cache")?;
    request.parallel = params.get_usize("parallel")?;
    request.optional = params.get_bool("optional")?;
    request.fingerprint = format!("{method} {uri}");
    Ok(request)
}

async fn run(state: &AppState, request: ProbeRequest) -> Result<Response, ProbeError> {
    let outcome = Prober::new(state, request).run().await.inspect_err(|err| {
        tracing::warn!("probe failed: {err}");
    })?;
    let body = exposition::render(&outcome.metrics)?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&exposition::content_type()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    cache_headers(&mut headers, &outcome);
    Ok((headers, body).into_response())
}

fn cache_headers(headers: &mut HeaderMap, outcome: &ProbeOutcome) {
    set_cache_status(headers, METRICS_CACHED, METRICS_CACHED_UNTIL, outcome.cache);
    if let Some(discovery) = outcome.discovery {
        set_cache_status(headers, SD_CACHED, SD_CACHED_UNTIL, discovery);
    }
}

fn set_cache_status(headers: &mut HeaderMap, flag: &'static str, until: &'static str, status: CacheStatus) {
    let flag_value = if status.hit { "true" } else { "false" };
    headers.insert(HeaderName::from_static(flag), HeaderValue::from_static(flag_value));
    if let Some(value) = status.until.map(format_until).and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(HeaderName::from_static(until), value);
    }
}

fn format_until(until: DateTime<Utc>) -> String {
    until.to_rfc3339_opts(SecondsFormat::Secs, true)
}
