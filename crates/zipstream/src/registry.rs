use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::fetcher::Fetcher;

/// No fetcher is registered for a source's scheme.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Protocol '{scheme}' not supported.")]
pub struct UnsupportedProtocol {
    pub scheme: String,
}

/// Maps URI schemes to the fetcher that streams them.
///
/// Populated once at startup; lookups afterwards are read-only.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` for `scheme`, replacing any earlier registration.
    pub fn register(&mut self, scheme: &str, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(scheme.to_ascii_lowercase(), fetcher);
    }

    pub fn with(mut self, scheme: &str, fetcher: Arc<dyn Fetcher>) -> Self {
        self.register(scheme, fetcher);
        self
    }

    /// Select the fetcher for a source URI by its scheme.
    pub fn resolve(&self, source: &Url) -> Result<Arc<dyn Fetcher>, UnsupportedProtocol> {
        let scheme = source.scheme().to_ascii_lowercase();
        self.fetchers
            .get(&scheme)
            .cloned()
            .ok_or(UnsupportedProtocol { scheme })
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.fetchers.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
