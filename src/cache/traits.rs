//! Core types for the shell cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::fetch::{FetchRequest, FetchResponse, Method};

/// Identity of a cached request: method plus resolved URL.
///
/// The entry key is a SHA-256 over `METHOD URL`, which keeps the storage
/// schema free of URL-length and escaping concerns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
    }
  }

  /// Stable storage key for this request identity.
  pub fn entry_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl From<&FetchRequest> for RequestKey {
  fn from(request: &FetchRequest) -> Self {
    Self {
      method: request.method,
      url: request.url.clone(),
    }
  }
}

/// A stored copy of a response: status, headers, body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl From<&FetchResponse> for ResponseSnapshot {
  fn from(response: &FetchResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
    }
  }
}

impl From<ResponseSnapshot> for FetchResponse {
  fn from(snapshot: ResponseSnapshot) -> Self {
    Self {
      status: snapshot.status,
      headers: snapshot.headers,
      body: snapshot.body,
    }
  }
}

/// A snapshot as read back from storage.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
  pub snapshot: ResponseSnapshot,
  pub cached_at: DateTime<Utc>,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Fresh data from the network.
  Network,
  /// Network unavailable, served from the shell cache.
  Cache,
}

/// Result of serving an intercepted request.
#[derive(Debug, Clone)]
pub struct Served {
  pub response: FetchResponse,
  pub source: ServeSource,
}
