use super::{ClientBuilder, ClientConnectError, DynamicClient};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

/// A client shared between the users of a [`ClientCache`].
pub type SharedClient = Arc<tokio::sync::Mutex<DynamicClient>>;

static GLOBAL_CACHE: OnceLock<ClientCache> = OnceLock::new();

/// Keeps at most one live client per endpoint.
///
/// Entries never expire; they are dropped with [`ClientCache::reset`] or
/// [`ClientCache::reset_all`]. Endpoints are compared exactly as given.
#[derive(Debug, Default)]
pub struct ClientCache {
    clients: Mutex<HashMap<String, SharedClient>>,
}

impl ClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache used by [`get_by_endpoint`] and [`reset_cached_client`].
    pub fn global() -> &'static ClientCache {
        GLOBAL_CACHE.get_or_init(ClientCache::new)
    }

    /// Returns the client of `builder`'s endpoint, connecting it first if it is not cached.
    ///
    /// If another task cached a client for the same endpoint while this one was connecting,
    /// theirs is kept and returned.
    pub async fn get_or_connect(
        &self,
        builder: ClientBuilder,
    ) -> Result<SharedClient, ClientConnectError> {
        let endpoint = builder.endpoint().to_string();

        if let Some(client) = self.get(&endpoint) {
            return Ok(client);
        }

        let client = builder.connect().await?;
        Ok(self.get_or_insert_with(&endpoint, || client))
    }

    /// Returns the client cached for `endpoint`, caching the one built by `f` otherwise.
    pub fn get_or_insert_with(
        &self,
        endpoint: &str,
        f: impl FnOnce() -> DynamicClient,
    ) -> SharedClient {
        self.lock()
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                tracing::debug!(endpoint, "caching client");
                Arc::new(tokio::sync::Mutex::new(f()))
            })
            .clone()
    }

    pub fn get(&self, endpoint: &str) -> Option<SharedClient> {
        self.lock().get(endpoint).cloned()
    }

    /// Drops the client cached for `endpoint`. Returns whether there was one.
    pub fn reset(&self, endpoint: &str) -> bool {
        self.lock().remove(endpoint).is_some()
    }

    pub fn reset_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the process-wide client for `endpoint`, connecting it on first use.
pub async fn get_by_endpoint(endpoint: &str) -> Result<SharedClient, ClientConnectError> {
    ClientCache::global()
        .get_or_connect(ClientBuilder::new(endpoint))
        .await
}

/// Drops the process-wide client of `endpoint`, or every cached client when `None`.
pub fn reset_cached_client(endpoint: Option<&str>) {
    let cache = ClientCache::global();
    match endpoint {
        Some(endpoint) => {
            cache.reset(endpoint);
        }
        None => cache.reset_all(),
    }
}
