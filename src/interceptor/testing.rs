//! Test doubles for the network and storage.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::cache::{CacheStorage, CachedEntry, MemoryStorage};
use crate::config::Config;
use crate::error::InterceptError;

use super::network::Network;
use super::request::{Request, ResponseSnapshot};

pub(crate) fn config(version: &str) -> Config {
  Config {
    version: version.to_string(),
    ..Config::default()
  }
}

/// A scripted origin keyed by path. Unknown paths answer 404.
pub(crate) struct FakeNetwork {
  routes: Mutex<HashMap<String, ResponseSnapshot>>,
  online: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub const SHELL: &'static str = "<html><body>Ramallah</body></html>";

  pub fn site() -> Self {
    let network = Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: Mutex::new(Vec::new()),
    };
    network.serve("/", 200, Self::SHELL);
    network.serve("/places", 200, "<html>places</html>");
    network.serve("/add-place", 200, "<html>add</html>");
    network.serve("/static/style.css", 200, "body { direction: rtl; }");
    network.serve("/static/ramallah.js", 200, "navigator.serviceWorker.register('/sw.js');");
    network.serve("/manifest.json", 200, "{}");
    network.serve("/api/places", 200, "[]");
    network
  }

  pub fn serve(&self, path: &str, status: u16, body: &str) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(path.to_string(), ResponseSnapshot::new(status, body));
  }

  pub fn unserve(&self, path: &str) {
    self.routes.lock().unwrap().remove(path);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Paths requested so far, including attempts made while offline.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot, InterceptError> {
    let path = request.url.path().to_string();
    self.calls.lock().unwrap().push(path.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(InterceptError::network(request.url.as_str(), "offline"));
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or_else(|| ResponseSnapshot::new(404, "not found")),
    )
  }
}

/// Memory storage whose reads and writes can be switched to fail.
#[derive(Default)]
pub(crate) struct FailingStorage {
  inner: MemoryStorage,
  failing: AtomicBool,
}

impl FailingStorage {
  pub fn fail(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  fn check(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      Err(eyre!("quota exceeded"))
    } else {
      Ok(())
    }
  }
}

impl CacheStorage for FailingStorage {
  fn open(&self, generation: &str) -> Result<()> {
    self.check()?;
    self.inner.open(generation)
  }

  fn has(&self, generation: &str) -> Result<bool> {
    self.check()?;
    self.inner.has(generation)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.check()?;
    self.inner.keys()
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    self.check()?;
    self.inner.delete(generation)
  }

  fn match_entry(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>> {
    self.check()?;
    self.inner.match_entry(generation, key)
  }

  fn put(&self, generation: &str, key: &str, response: &ResponseSnapshot) -> Result<()> {
    self.check()?;
    self.inner.put(generation, key, response)
  }

  fn put_all(&self, generation: &str, entries: &[(String, ResponseSnapshot)]) -> Result<()> {
    self.check()?;
    self.inner.put_all(generation, entries)
  }

  fn entry_keys(&self, generation: &str) -> Result<Vec<String>> {
    self.check()?;
    self.inner.entry_keys(generation)
  }
}
