//! Core types shared by the storage backends and the interceptor.

use chrono::{DateTime, Utc};

use crate::interceptor::ResponseSnapshot;

/// A stored response and when it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
  pub response: ResponseSnapshot,
  pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
  pub fn new(response: ResponseSnapshot) -> Self {
    Self {
      response,
      cached_at: Utc::now(),
    }
  }
}

/// Result of dispatching a request, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data stored under the request's own key.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// The offline shell standing in for a navigation.
  pub fn shell(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Shell,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Stored entry for this request
  Cache,
  /// Root document substituted for an uncached navigation
  Shell,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Shell => "shell",
    })
  }
}
