use std::time::Duration;

/// Discovery filters of a `/probe/subscription` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilters {
    pub subscriptions: Vec<String>,
    pub filter: Option<String>,
}

/// Everything the prober needs to know about one inbound scrape.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub module_name: String,
    /// Workspace ids or ARM resource paths given by the caller.
    pub explicit_targets: Vec<String>,
    pub cache_ttl: Option<Duration>,
    pub parallel: Option<usize>,
    pub discovery: Option<DiscoveryFilters>,
    /// When set, an empty target list yields an empty result instead of an error.
    pub optional: bool,
    /// Identity of the request (method, path and query) used as cache key input.
    pub fingerprint: String,
}

impl ProbeRequest {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            explicit_targets: Vec::new(),
            cache_ttl: None,
            parallel: None,
            discovery: None,
            optional: false,
            fingerprint: String::new(),
        }
    }

    /// Cache TTL if response caching was requested.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl.filter(|ttl| !ttl.is_zero())
    }
}
