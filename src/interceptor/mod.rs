//! The request interceptor: lifecycle plus per-request dispatch.
//!
//! One `Interceptor` corresponds to one deployed version of the front end. It
//! precaches its manifest into its own generation on install, deletes every
//! other generation on activate, and from then on answers each request with the
//! strategy its route class selects.

pub mod lifecycle;
pub mod network;
pub mod request;
pub mod route;
mod strategy;
#[cfg(test)]
pub(crate) mod testing;

use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheResult, CacheStorage};
use crate::config::Config;
use crate::error::InterceptError;

use lifecycle::{Lifecycle, LifecycleState};
pub use network::{HttpNetwork, Network, OfflineNetwork};
pub use request::{Request, RequestMode, ResponseSnapshot};
use route::{RouteClass, RoutePolicy};

pub struct Interceptor<N: Network, S: CacheStorage> {
  generation: String,
  manifest: Vec<Request>,
  shell_key: String,
  policy: RoutePolicy,
  fingerprint: String,
  network: Arc<N>,
  storage: Arc<S>,
  lifecycle: Lifecycle,
  /// Detached cache writes not yet reaped
  pending: Mutex<JoinSet<()>>,
}

impl<N, S> Interceptor<N, S>
where
  N: Network,
  S: CacheStorage + 'static,
{
  pub fn new(config: &Config, network: Arc<N>, storage: Arc<S>) -> Result<Self, InterceptError> {
    let policy = RoutePolicy::from_config(config);
    let origin = policy.origin().clone();

    let mut manifest: Vec<Request> = Vec::with_capacity(config.precache.len());
    for path in &config.precache {
      let request = Request::get(resolve(&origin, path)?);
      if !manifest.contains(&request) {
        manifest.push(request);
      }
    }

    let shell_key = Request::get(resolve(&origin, &config.shell_path)?).cache_key();

    let mut hasher = Sha256::new();
    let parts = [config.version.as_str(), config.shell_path.as_str()]
      .into_iter()
      .chain(manifest.iter().map(|r| r.url.as_str()))
      .chain(policy.fingerprint_parts());
    for part in parts {
      hasher.update(part.as_bytes());
      hasher.update(b"\n");
    }
    let fingerprint = hex::encode(hasher.finalize());

    Ok(Self {
      generation: config.version.clone(),
      manifest,
      shell_key,
      policy,
      fingerprint,
      network,
      storage,
      lifecycle: Lifecycle::default(),
      pending: Mutex::new(JoinSet::new()),
    })
  }

  /// The generation this instance reads and writes.
  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Identity of this instance's configuration; equal fingerprints are the same script.
  pub fn fingerprint(&self) -> &str {
    &self.fingerprint
  }

  pub fn state(&self) -> LifecycleState {
    self.lifecycle.state()
  }

  /// Precache the manifest into this instance's generation.
  ///
  /// Every manifest entry is fetched before anything is stored; a single
  /// failed fetch or non-OK status fails the whole install and leaves the
  /// instance redundant. Returns the number of entries stored.
  pub async fn install(&self) -> Result<usize, InterceptError> {
    self
      .lifecycle
      .begin("install", LifecycleState::Parsed, LifecycleState::Installing)?;
    info!(generation = %self.generation, assets = self.manifest.len(), "Installing");

    match self.precache().await {
      Ok(count) => {
        self.lifecycle.finish(LifecycleState::Installed);
        info!(generation = %self.generation, entries = count, "Installed");
        Ok(count)
      }
      Err(e) => {
        self.lifecycle.finish(LifecycleState::Redundant);
        warn!(generation = %self.generation, error = %e, "Install failed");
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<usize, InterceptError> {
    if let Err(e) = self.storage.open(&self.generation) {
      warn!(generation = %self.generation, error = %e, "Failed to open cache generation");
    }

    let fetches = self.manifest.iter().map(|request| async move {
      let path = request.url.path().to_string();
      let response = self
        .network
        .fetch(request)
        .await
        .map_err(|e| InterceptError::Precache {
          path: path.clone(),
          reason: e.to_string(),
        })?;

      if !response.is_ok() {
        return Err(InterceptError::Precache {
          path,
          reason: format!("status {}", response.status),
        });
      }
      Ok((request.cache_key(), response))
    });

    let entries = futures::future::try_join_all(fetches).await?;

    self
      .storage
      .put_all(&self.generation, &entries)
      .map_err(|e| InterceptError::Precache {
        path: self.generation.clone(),
        reason: format!("cache write failed: {}", e),
      })?;

    Ok(entries.len())
  }

  /// Delete every generation other than this one and take over request handling.
  ///
  /// Cleanup is best-effort: generations that fail to delete are logged and
  /// left behind. Returns the generations that were removed.
  pub fn activate(&self) -> Result<Vec<String>, InterceptError> {
    self
      .lifecycle
      .begin("activate", LifecycleState::Installed, LifecycleState::Activating)?;

    let removed = self.remove_stale_generations();

    self.lifecycle.finish(LifecycleState::Active);
    info!(generation = %self.generation, removed = ?removed, "Activated");
    Ok(removed)
  }

  fn remove_stale_generations(&self) -> Vec<String> {
    let generations = match self.storage.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Failed to enumerate cache generations");
        return Vec::new();
      }
    };

    generations
      .into_iter()
      .filter(|name| name != &self.generation)
      .filter_map(|name| match self.storage.delete(&name) {
        Ok(_) => {
          debug!(generation = %name, "Deleted stale generation");
          Some(name)
        }
        Err(e) => {
          warn!(generation = %name, error = %e, "Failed to delete stale generation");
          None
        }
      })
      .collect()
  }

  /// Take over an already installed generation without precaching again.
  ///
  /// Used when a new process attaches to storage populated by an earlier one.
  /// Returns false (and stays parsed) if the generation does not exist.
  pub fn resume(&self) -> Result<bool, InterceptError> {
    match self.storage.has(&self.generation) {
      Ok(true) => {
        self
          .lifecycle
          .begin("resume", LifecycleState::Parsed, LifecycleState::Active)?;
        debug!(generation = %self.generation, "Resumed installed generation");
        Ok(true)
      }
      Ok(false) => Ok(false),
      Err(e) => {
        warn!(generation = %self.generation, error = %e, "Failed to look up cache generation");
        Ok(false)
      }
    }
  }

  /// Mark this instance as superseded. It stops intercepting.
  pub fn retire(&self) {
    self.lifecycle.finish(LifecycleState::Redundant);
  }

  /// Answer a request from a page of the origin.
  ///
  /// Until the instance is active every request goes straight to the network,
  /// exactly as if no interceptor were installed. Non-GET requests are never
  /// intercepted.
  pub async fn handle_fetch(
    &self,
    request: &Request,
  ) -> Result<CacheResult<ResponseSnapshot>, InterceptError> {
    if self.state() != LifecycleState::Active || !request.is_get() {
      return self.passthrough(request).await;
    }

    let class = self.policy.classify(&request.url, request.mode);
    debug!(method = %request.method, url = %request.url, ?class, "Dispatch");

    match class {
      RouteClass::Bypass => self.passthrough(request).await,
      RouteClass::CacheFirst => self.cache_first(request).await,
      RouteClass::NetworkFirst => self.network_first(request).await,
      RouteClass::Default => self.network_or_cache(request).await,
    }
  }

  /// Wait for every detached cache write started so far.
  pub async fn settle(&self) {
    let mut pending = std::mem::take(&mut *self.pending_writes());
    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "Cache write task failed");
      }
    }
  }

  /// Build a request for a path of this origin.
  pub fn request(&self, path: &str, mode: RequestMode) -> Result<Request, InterceptError> {
    let url = resolve(self.policy.origin(), path)?;
    Ok(match mode {
      RequestMode::Navigate => Request::navigate(url),
      RequestMode::SubResource => Request::get(url),
    })
  }
}

fn resolve(origin: &Url, path: &str) -> Result<Url, InterceptError> {
  origin.join(path).map_err(|e| InterceptError::InvalidPath {
    path: path.to_string(),
    reason: e.to_string(),
  })
}
