//! Per-origin registration: which interceptor instance currently controls pages.

use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, CacheStorage};
use crate::config::Config;
use crate::error::InterceptError;
use crate::interceptor::{Interceptor, Network, Request, ResponseSnapshot};

/// Owns the active interceptor for one origin.
///
/// Registering a changed configuration installs a new instance next to the
/// active one and, once precaching succeeds, activates it straight away
/// instead of waiting for open pages to close. A failed install leaves the
/// previous instance in control.
pub struct Registration<N: Network, S: CacheStorage> {
  network: Arc<N>,
  storage: Arc<S>,
  active: RwLock<Option<Arc<Interceptor<N, S>>>>,
}

impl<N, S> Registration<N, S>
where
  N: Network,
  S: CacheStorage + 'static,
{
  pub fn new(network: Arc<N>, storage: Arc<S>) -> Self {
    Self {
      network,
      storage,
      active: RwLock::new(None),
    }
  }

  /// The instance currently controlling pages, if any.
  pub fn active(&self) -> Option<Arc<Interceptor<N, S>>> {
    self
      .active
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Install and activate an interceptor for `config`.
  ///
  /// Re-registering the configuration of the active instance is a no-op.
  pub async fn register(&self, config: &Config) -> Result<Arc<Interceptor<N, S>>, InterceptError> {
    let candidate = Interceptor::new(config, Arc::clone(&self.network), Arc::clone(&self.storage))?;

    if let Some(current) = self.active() {
      if current.fingerprint() == candidate.fingerprint() {
        debug!(generation = %current.generation(), "Configuration unchanged, keeping active interceptor");
        return Ok(current);
      }
    }

    candidate.install().await?;

    let candidate = Arc::new(candidate);
    candidate.activate()?;
    self.claim(Arc::clone(&candidate));

    Ok(candidate)
  }

  /// Attach to a generation installed by an earlier process.
  ///
  /// Returns None when the generation has not been installed yet.
  pub fn resume(&self, config: &Config) -> Result<Option<Arc<Interceptor<N, S>>>, InterceptError> {
    let candidate = Interceptor::new(config, Arc::clone(&self.network), Arc::clone(&self.storage))?;
    if !candidate.resume()? {
      return Ok(None);
    }

    let candidate = Arc::new(candidate);
    self.claim(Arc::clone(&candidate));
    Ok(Some(candidate))
  }

  /// Make `interceptor` control all pages; the previous instance retires.
  /// Requests already running on the previous instance finish there.
  fn claim(&self, interceptor: Arc<Interceptor<N, S>>) {
    let generation = interceptor.generation().to_string();
    let previous = self
      .active
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .replace(interceptor);

    if let Some(previous) = previous {
      previous.retire();
    }
    info!(generation = %generation, "Claimed clients");
  }

  /// Route a request through the active interceptor, or straight to the
  /// network when there is none.
  pub async fn handle_fetch(
    &self,
    request: &Request,
  ) -> Result<CacheResult<ResponseSnapshot>, InterceptError> {
    match self.active() {
      Some(interceptor) => interceptor.handle_fetch(request).await,
      None => Ok(CacheResult::from_network(self.network.fetch(request).await?)),
    }
  }

  /// Drop the active interceptor and delete every generation.
  /// Returns the generations that were deleted.
  pub async fn unregister(&self) -> Vec<String> {
    let previous = self
      .active
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(previous) = previous {
      previous.settle().await;
      previous.retire();
    }

    let generations = match self.storage.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Failed to enumerate cache generations");
        return Vec::new();
      }
    };

    generations
      .into_iter()
      .filter(|name| match self.storage.delete(name) {
        Ok(_) => true,
        Err(e) => {
          warn!(generation = %name, error = %e, "Failed to delete generation");
          false
        }
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, MemoryStorage};
  use crate::interceptor::lifecycle::LifecycleState;
  use crate::interceptor::testing::{config, FakeNetwork};
  use crate::interceptor::RequestMode;

  fn registration() -> (Arc<FakeNetwork>, Registration<FakeNetwork, MemoryStorage>) {
    let network = Arc::new(FakeNetwork::site());
    let storage = Arc::new(MemoryStorage::new());
    let registration = Registration::new(Arc::clone(&network), storage);
    (network, registration)
  }

  #[tokio::test]
  async fn test_offline_scenario_across_deployments() {
    let (network, registration) = registration();

    let v3 = registration.register(&config("v3")).await.unwrap();
    assert_eq!(v3.state(), LifecycleState::Active);

    network.set_online(false);

    let css = v3.request("/static/style.css", RequestMode::SubResource).unwrap();
    let served = registration.handle_fetch(&css).await.unwrap();
    assert_eq!(served.data.status, 200);
    assert_eq!(served.source, CacheSource::Cache);
    assert_eq!(served.data.body, b"body { direction: rtl; }");

    let api = v3
      .request("/api/places?limit=3", RequestMode::SubResource)
      .unwrap();
    assert!(registration.handle_fetch(&api).await.unwrap_err().is_network());

    let places = v3.request("/places", RequestMode::Navigate).unwrap();
    let served = registration.handle_fetch(&places).await.unwrap();
    assert_eq!(served.source, CacheSource::Shell);
    assert_eq!(served.data.body, FakeNetwork::SHELL.as_bytes());

    network.set_online(true);
    let mut v4_config = config("v4");
    v4_config.precache = vec![
      "/".to_string(),
      "/static/style.css".to_string(),
      "/manifest.json".to_string(),
    ];
    let v4 = registration.register(&v4_config).await.unwrap();

    assert_eq!(registration.storage().keys().unwrap(), vec!["v4"]);
    assert_eq!(
      registration.storage().entry_keys("v4").unwrap(),
      vec![
        "GET http://localhost:8000/",
        "GET http://localhost:8000/manifest.json",
        "GET http://localhost:8000/static/style.css",
      ]
    );
    assert!(registration.storage().entry_keys("v3").unwrap().is_empty());
    assert_eq!(v3.state(), LifecycleState::Redundant);
    assert_eq!(v4.state(), LifecycleState::Active);
    assert_eq!(registration.active().unwrap().generation(), "v4");
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_active() {
    let (network, registration) = registration();
    registration.register(&config("v3")).await.unwrap();

    network.unserve("/static/ramallah.js");
    let err = registration.register(&config("v4")).await.err().unwrap();

    assert!(matches!(err, InterceptError::Precache { .. }));
    let active = registration.active().unwrap();
    assert_eq!(active.generation(), "v3");
    assert_eq!(active.state(), LifecycleState::Active);
    assert!(registration.storage().has("v3").unwrap());

    network.set_online(false);
    let css = active
      .request("/static/style.css", RequestMode::SubResource)
      .unwrap();
    assert_eq!(
      registration.handle_fetch(&css).await.unwrap().source,
      CacheSource::Cache
    );
  }

  #[tokio::test]
  async fn test_identical_registration_is_noop() {
    let (network, registration) = registration();
    let first = registration.register(&config("v3")).await.unwrap();
    let calls = network.calls().len();

    let second = registration.register(&config("v3")).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(network.calls().len(), calls);
  }

  #[tokio::test]
  async fn test_unregistered_origin_goes_to_network() {
    let (network, registration) = registration();
    let request = Interceptor::new(
      &config("v3"),
      Arc::clone(&network),
      Arc::new(MemoryStorage::new()),
    )
    .unwrap()
    .request("/static/style.css", RequestMode::SubResource)
    .unwrap();

    let served = registration.handle_fetch(&request).await.unwrap();
    assert_eq!(served.source, CacheSource::Network);

    network.set_online(false);
    assert!(registration.handle_fetch(&request).await.unwrap_err().is_network());
  }

  #[tokio::test]
  async fn test_resume_and_unregister() {
    let network = Arc::new(FakeNetwork::site());
    let storage = Arc::new(MemoryStorage::new());

    let first = Registration::new(Arc::clone(&network), Arc::clone(&storage));
    assert!(first.resume(&config("v3")).unwrap().is_none());
    first.register(&config("v3")).await.unwrap();

    let second = Registration::new(Arc::clone(&network), Arc::clone(&storage));
    let resumed = second.resume(&config("v3")).unwrap().unwrap();
    assert_eq!(resumed.state(), LifecycleState::Active);

    assert_eq!(second.unregister().await, vec!["v3"]);
    assert!(second.active().is_none());
    assert_eq!(resumed.state(), LifecycleState::Redundant);
    assert!(storage.keys().unwrap().is_empty());
  }
}
