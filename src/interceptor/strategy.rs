//! Per-class response strategies.
//!
//! Producing the response and persisting a copy are separate steps: the copy
//! is written by a detached task, so a slow or failing cache write never
//! delays or alters what the caller receives.

use std::sync::{Arc, MutexGuard, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::{CacheResult, CacheStorage, CachedEntry};
use crate::error::InterceptError;

use super::network::Network;
use super::request::{Request, ResponseSnapshot};
use super::Interceptor;

type Served = Result<CacheResult<ResponseSnapshot>, InterceptError>;

impl<N, S> Interceptor<N, S>
where
  N: Network,
  S: CacheStorage + 'static,
{
  /// Network only. No lookup, no write, no fallback.
  pub(super) async fn passthrough(&self, request: &Request) -> Served {
    let response = self.network.fetch(request).await?;
    Ok(CacheResult::from_network(response))
  }

  /// Cache, then network. A status-OK network response is stored.
  pub(super) async fn cache_first(&self, request: &Request) -> Served {
    let key = request.cache_key();
    if let Some(entry) = self.lookup(&key) {
      debug!(key = %key, "Cache hit");
      return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
    }

    debug!(key = %key, "Cache miss");
    let response = self.network.fetch(request).await?;
    if response.is_ok() {
      self.persist(key, response.clone());
    }
    Ok(CacheResult::from_network(response))
  }

  /// Network, then the stored entry, then the shell.
  pub(super) async fn network_first(&self, request: &Request) -> Served {
    let key = request.cache_key();
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_ok() {
          self.persist(key, response.clone());
        }
        Ok(CacheResult::from_network(response))
      }
      Err(e) => {
        debug!(key = %key, error = %e, "Network failed, trying cache");
        if let Some(entry) = self.lookup(&key) {
          return Ok(CacheResult::from_cache(entry.response, entry.cached_at));
        }
        if let Some(entry) = self.lookup(&self.shell_key) {
          debug!(key = %key, "Serving offline shell");
          return Ok(CacheResult::shell(entry.response, entry.cached_at));
        }
        Err(e)
      }
    }
  }

  /// Network, then the stored entry. Nothing is written.
  pub(super) async fn network_or_cache(&self, request: &Request) -> Served {
    match self.network.fetch(request).await {
      Ok(response) => Ok(CacheResult::from_network(response)),
      Err(e) => {
        let key = request.cache_key();
        debug!(key = %key, error = %e, "Network failed, trying cache");
        match self.lookup(&key) {
          Some(entry) => Ok(CacheResult::from_cache(entry.response, entry.cached_at)),
          None => Err(e),
        }
      }
    }
  }

  /// Storage read where failure counts as a miss.
  fn lookup(&self, key: &str) -> Option<CachedEntry> {
    match self.storage.match_entry(&self.generation, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(generation = %self.generation, key = %key, error = %e, "Cache read failed");
        None
      }
    }
  }

  /// Write a copy in the background. Failure is logged and otherwise ignored.
  fn persist(&self, key: String, response: ResponseSnapshot) {
    let storage = Arc::clone(&self.storage);
    let generation = self.generation.clone();

    let mut pending = self.pending_writes();
    // Reap finished writes so the set does not grow without bound
    while pending.try_join_next().is_some() {}

    pending.spawn(async move {
      match storage.put(&generation, &key, &response) {
        Ok(()) => debug!(generation = %generation, key = %key, "Stored"),
        Err(e) => warn!(generation = %generation, key = %key, error = %e, "Cache write failed"),
      }
    });
  }

  pub(super) fn pending_writes(&self) -> MutexGuard<'_, JoinSet<()>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }
}
