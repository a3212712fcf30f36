//! Request classification.

use std::collections::BTreeSet;
use url::Url;

use crate::config::Config;

use super::request::RequestMode;

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
  /// Straight to the network, never cached, no fallback
  Bypass,
  /// Static asset: cache, then network
  CacheFirst,
  /// Page navigation: network, then cache, then the shell
  NetworkFirst,
  /// Other same-origin traffic: network, then cache
  Default,
}

/// Path conventions used to classify requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
  origin: Url,
  api_prefix: String,
  static_prefix: String,
  static_paths: BTreeSet<String>,
  /// Paths of precached entries; cache-first when fetched as sub-resources
  precached: BTreeSet<String>,
}

impl RoutePolicy {
  pub fn new(
    origin: Url,
    api_prefix: impl Into<String>,
    static_prefix: impl Into<String>,
    static_paths: impl IntoIterator<Item = String>,
  ) -> Self {
    Self {
      origin,
      api_prefix: api_prefix.into(),
      static_prefix: static_prefix.into(),
      static_paths: static_paths.into_iter().collect(),
      precached: BTreeSet::new(),
    }
  }

  /// Treat these manifest paths as static assets when requested as
  /// sub-resources. Navigations to them (`/`, `/places`) stay network-first.
  pub fn with_precached(mut self, paths: impl IntoIterator<Item = String>) -> Self {
    self.precached.extend(paths);
    self
  }

  /// Build from configuration. Manifest entries are resolved against the
  /// origin so `/a.css?v=2` is matched by its path.
  pub fn from_config(config: &Config) -> Self {
    let precached = config
      .precache
      .iter()
      .filter_map(|p| config.origin.join(p).ok())
      .map(|url| url.path().to_string());

    Self::new(
      config.origin.clone(),
      &config.routes.api_prefix,
      &config.routes.static_prefix,
      config.routes.static_paths.iter().cloned(),
    )
    .with_precached(precached)
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  /// Classify a request. First match wins.
  pub fn classify(&self, url: &Url, mode: RequestMode) -> RouteClass {
    let path = url.path();

    if url.origin() != self.origin.origin() || path.starts_with(&self.api_prefix) {
      return RouteClass::Bypass;
    }

    if self.is_static(path) {
      return RouteClass::CacheFirst;
    }

    match mode {
      RequestMode::Navigate => RouteClass::NetworkFirst,
      RequestMode::SubResource if self.precached.contains(path) => RouteClass::CacheFirst,
      RequestMode::SubResource => RouteClass::Default,
    }
  }

  fn is_static(&self, path: &str) -> bool {
    path.starts_with(&self.static_prefix) || self.static_paths.contains(path)
  }

  /// Feed the classification inputs into a fingerprint.
  pub(crate) fn fingerprint_parts(&self) -> impl Iterator<Item = &str> {
    [
      self.origin.as_str(),
      self.api_prefix.as_str(),
      self.static_prefix.as_str(),
    ]
    .into_iter()
    .chain(self.static_paths.iter().map(String::as_str))
    .chain(self.precached.iter().map(String::as_str))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use RequestMode::{Navigate, SubResource};
  use RouteClass::*;

  fn policy() -> RoutePolicy {
    RoutePolicy::new(
      Url::parse("http://localhost:8000").unwrap(),
      "/api/",
      "/static/",
      ["/manifest.json".to_string()],
    )
    .with_precached(
      ["/", "/static/style.css", "/static/ramallah.js", "/favicon.ico"]
        .into_iter()
        .map(String::from),
    )
  }

  #[test]
  fn test_classification_table() {
    let cases = [
      ("http://localhost:8000/api/places?limit=3", SubResource, Bypass),
      ("http://localhost:8000/api/places", Navigate, Bypass),
      ("http://localhost:8000/api/admin/places/7", SubResource, Bypass),
      ("https://cdn.example.com/static/leaflet.css", SubResource, Bypass),
      ("https://maps.example.com/", Navigate, Bypass),
      ("http://localhost:9000/static/style.css", SubResource, Bypass),
      ("http://localhost:8000/static/style.css", SubResource, CacheFirst),
      ("http://localhost:8000/static/ramallah.js", SubResource, CacheFirst),
      ("http://localhost:8000/static/uploads/a.png", Navigate, CacheFirst),
      ("http://localhost:8000/manifest.json", SubResource, CacheFirst),
      ("http://localhost:8000/", Navigate, NetworkFirst),
      ("http://localhost:8000/places", Navigate, NetworkFirst),
      ("http://localhost:8000/add-place?x=1", Navigate, NetworkFirst),
      ("http://localhost:8000/places", SubResource, Default),
      ("http://localhost:8000/favicon.ico", SubResource, CacheFirst),
      ("http://localhost:8000/favicon.ico", Navigate, NetworkFirst),
      ("http://localhost:8000/", SubResource, CacheFirst),
      ("http://localhost:8000/robots.txt", SubResource, Default),
      ("http://localhost:8000/apix", SubResource, Default),
    ];

    let policy = policy();
    for (url, mode, expected) in cases {
      let url = Url::parse(url).unwrap();
      assert_eq!(
        policy.classify(&url, mode),
        expected,
        "{} ({:?})",
        url,
        mode
      );
    }
  }

  #[test]
  fn test_default_port_matches_origin() {
    let policy = policy();
    let same = Url::parse("http://localhost:8000/static/style.css").unwrap();
    assert_eq!(policy.classify(&same, SubResource), CacheFirst);

    let https = RoutePolicy::new(
      Url::parse("https://ramallah.example").unwrap(),
      "/api/",
      "/static/",
      [],
    );
    let explicit_port = Url::parse("https://ramallah.example:443/places").unwrap();
    assert_eq!(https.classify(&explicit_port, Navigate), NetworkFirst);
  }
}
