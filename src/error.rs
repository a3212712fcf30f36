//! Error types surfaced by the interceptor.

use thiserror::Error;

use crate::interceptor::lifecycle::LifecycleState;

/// Errors produced while installing, activating or dispatching.
///
/// Cache storage failures never appear here: they are logged and the
/// operation carries on as if caching had been skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterceptError {
  /// The network could not produce a response and no fallback applied.
  #[error("network request to {url} failed: {reason}")]
  Network { url: String, reason: String },

  /// A precache manifest entry could not be fetched during install.
  #[error("precache of {path} failed: {reason}")]
  Precache { path: String, reason: String },

  /// A manifest path could not be resolved against the origin.
  #[error("invalid path {path}: {reason}")]
  InvalidPath { path: String, reason: String },

  /// A lifecycle method was called in the wrong state.
  #[error("cannot {action} while {state}")]
  InvalidTransition {
    action: &'static str,
    state: LifecycleState,
  },
}

impl InterceptError {
  pub fn network(url: impl Into<String>, reason: impl ToString) -> Self {
    Self::Network {
      url: url.into(),
      reason: reason.to_string(),
    }
  }

  /// True if this is a plain network failure of the requested resource.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network { .. })
  }
}
