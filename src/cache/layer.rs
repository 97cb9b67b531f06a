//! Network-first serving strategy with cache fallback.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use super::storage::CacheStore;
use super::traits::{RequestKey, ResponseSnapshot, Served, ServeSource};
use crate::fetch::{FetchResponse, Method};

/// Serves intercepted requests network-first against a single named store.
///
/// Training and competition data changes often, so staleness is worse than an
/// extra round-trip: the cache is a resilience fallback for intermittent
/// connectivity, not a performance layer.
pub struct CacheLayer<S: CacheStore> {
  storage: Arc<S>,
  store_name: String,
}

impl<S: CacheStore + 'static> CacheLayer<S> {
  /// Create a layer serving from the given versioned store.
  pub fn new(storage: Arc<S>, store_name: impl Into<String>) -> Self {
    Self {
      storage,
      store_name: store_name.into(),
    }
  }

  pub fn store_name(&self) -> &str {
    &self.store_name
  }

  /// Serve one request.
  ///
  /// 1. Attempt the live fetch
  /// 2. On a cacheable GET response, write the snapshot off the response path
  /// 3. On a network failure, fall back to the store
  /// 4. On a miss, propagate the original network error
  pub async fn serve<F, Fut>(&self, key: &RequestKey, fetcher: F) -> Result<Served>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<FetchResponse>>,
  {
    match fetcher().await {
      Ok(response) => {
        if key.method == Method::Get && response.is_cacheable() {
          self.write_behind(key.clone(), ResponseSnapshot::from(&response));
        }
        Ok(Served {
          response,
          source: ServeSource::Network,
        })
      }
      Err(network_err) => match self.storage.get(&self.store_name, key)? {
        Some(cached) => {
          info!(url = %key.url, "network unavailable, serving from shell cache");
          Ok(Served {
            response: cached.snapshot.into(),
            source: ServeSource::Cache,
          })
        }
        // No synthesized offline response: the caller sees the fetch error.
        None => Err(network_err),
      },
    }
  }

  /// Fire-and-forget cache write. Never on the response path; a failed write
  /// is logged and dropped.
  fn write_behind(&self, key: RequestKey, snapshot: ResponseSnapshot) {
    let storage = Arc::clone(&self.storage);
    let store_name = self.store_name.clone();

    tokio::spawn(async move {
      if let Err(e) = storage.put(&store_name, &key, &snapshot) {
        debug!(url = %key.url, "discarding failed cache write: {}", e);
      }
    });
  }
}

impl<S: CacheStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      store_name: self.store_name.clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryCacheStore;
  use color_eyre::eyre::eyre;
  use std::time::Duration;

  fn layer() -> CacheLayer<MemoryCacheStore> {
    CacheLayer::new(Arc::new(MemoryCacheStore::new()), "shell-1.0.0")
  }

  fn response(status: u16, body: &[u8]) -> FetchResponse {
    FetchResponse {
      status,
      headers: vec![],
      body: body.to_vec(),
    }
  }

  #[tokio::test]
  async fn test_network_success_returns_live_and_caches() {
    let layer = layer();
    let key = RequestKey::new(Method::Get, "/trainings");

    let served = layer
      .serve(&key, || async { Ok(response(200, b"fresh")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body, b"fresh");

    // Write is off the response path; give the spawned task a beat
    tokio::time::sleep(Duration::from_millis(10)).await;
    let cached = layer.storage.get("shell-1.0.0", &key).unwrap().unwrap();
    assert_eq!(cached.snapshot.body, b"fresh");
  }

  #[tokio::test]
  async fn test_network_failure_with_cache_hit_serves_cached_bytes() {
    let layer = layer();
    let key = RequestKey::new(Method::Get, "/trainings");

    layer
      .serve(&key, || async { Ok(response(200, b"cached-body")) })
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let served = layer
      .serve(&key, || async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Cache);
    assert_eq!(served.response.status, 200);
    assert_eq!(served.response.body, b"cached-body");
  }

  #[tokio::test]
  async fn test_network_failure_with_no_cache_propagates_error() {
    let layer = layer();
    let key = RequestKey::new(Method::Get, "/never-fetched");

    let result = layer
      .serve(&key, || async { Err(eyre!("dns failure")) })
      .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("dns failure"));
  }

  #[tokio::test]
  async fn test_network_first_prefers_live_over_cached() {
    let layer = layer();
    let key = RequestKey::new(Method::Get, "/rankings");

    layer
      .serve(&key, || async { Ok(response(200, b"old")) })
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let served = layer
      .serve(&key, || async { Ok(response(200, b"new")) })
      .await
      .unwrap();

    assert_eq!(served.source, ServeSource::Network);
    assert_eq!(served.response.body, b"new");
  }

  #[tokio::test]
  async fn test_non_200_response_is_not_cached() {
    let layer = layer();
    let key = RequestKey::new(Method::Get, "/flaky");

    layer
      .serve(&key, || async { Ok(response(500, b"oops")) })
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(layer.storage.get("shell-1.0.0", &key).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_post_is_not_cached() {
    let layer = layer();
    let key = RequestKey::new(Method::Post, "/trainings");

    layer
      .serve(&key, || async { Ok(response(200, b"created")) })
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(layer.storage.entry_count("shell-1.0.0").unwrap(), 0);
  }
}
