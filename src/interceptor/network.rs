//! The network side of the interceptor.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::InterceptError;

use super::request::{Request, ResponseSnapshot};

/// Something that can turn a request into a response.
///
/// An `Err` means no response was obtained at all (offline, DNS, reset). HTTP
/// error statuses are responses, not errors.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot, InterceptError>;
}

/// HTTP network backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(config: &NetworkConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(&config.user_agent)
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot, InterceptError> {
    let url = request.url.as_str();
    let method = Method::from_bytes(request.method.as_bytes())
      .map_err(|e| InterceptError::network(url, e))?;

    let response = self
      .client
      .request(method, request.url.clone())
      .send()
      .await
      .map_err(|e| InterceptError::network(url, e))?;

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
      .map_err(|e| InterceptError::network(url, e))?;

    Ok(ResponseSnapshot {
      status,
      headers,
      body: body.to_vec(),
    })
  }
}

/// A network with no connectivity. Every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineNetwork;

#[async_trait]
impl Network for OfflineNetwork {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot, InterceptError> {
    Err(InterceptError::network(request.url.as_str(), "offline"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  #[tokio::test]
  async fn test_offline_network_always_fails() {
    let request = Request::get(Url::parse("http://localhost:8000/static/style.css").unwrap());
    let err = OfflineNetwork.fetch(&request).await.unwrap_err();

    assert!(err.is_network());
    assert_eq!(
      err.to_string(),
      "network request to http://localhost:8000/static/style.css failed: offline"
    );
  }
}
