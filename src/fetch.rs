//! Network fetching abstraction.
//!
//! The offline controller never talks to `reqwest` directly; it goes through
//! the [`Fetcher`] trait so tests can substitute a scripted in-memory fetcher
//! and so the HTTP details (base URL resolution, bearer auth) live in one
//! place.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP method of an intercepted request. Only GETs are cacheable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

/// An outgoing request as seen by the offline controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub method: Method,
  /// Absolute path (e.g. "/index.html") or full URL.
  pub url: String,
}

impl FetchRequest {
  /// A GET request for the given path.
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::Get,
      url: url.into(),
    }
  }
}

/// A response as returned from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  /// Whether this response may be committed to the cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200
  }
}

/// Trait for network backends.
///
/// Implementations must not retry internally; the caching layer decides what
/// a failure means.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// `reqwest`-backed fetcher that resolves request paths against a base URL
/// and attaches bearer authentication when a token is configured.
pub struct HttpFetcher {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl HttpFetcher {
  pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid base URL {}: {}", base_url, e))?;

    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      client,
      base,
      token,
    })
  }

  /// Resolve a request path against the base URL. Full URLs pass through.
  fn resolve(&self, url: &str) -> Result<Url> {
    self
      .base
      .join(url)
      .map_err(|e| eyre!("Cannot resolve {} against {}: {}", url, self.base, e))
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
    let url = self.resolve(&request.url)?;

    let mut builder = match request.method {
      Method::Get => self.client.get(url.clone()),
      Method::Post => self.client.post(url.clone()),
      Method::Put => self.client.put(url.clone()),
      Method::Delete => self.client.delete(url.clone()),
    };

    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
      .to_vec();

    Ok(FetchResponse {
      status,
      headers,
      body,
    })
  }
}
