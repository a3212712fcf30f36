//! Interceptor lifecycle state machine.
//!
//! ```text
//! parsed -> installing -> installed -> activating -> active
//!               |                                      |
//!               +------------> redundant <-------------+
//! ```

use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::error::InterceptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// Created, nothing cached yet
  Parsed,
  /// Precaching the manifest
  Installing,
  /// Precache complete, waiting to take over
  Installed,
  /// Removing stale generations
  Activating,
  /// Intercepting requests
  Active,
  /// Failed to install, or superseded by a newer instance
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Parsed => "parsed",
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Active => "active",
      Self::Redundant => "redundant",
    };
    f.write_str(name)
  }
}

/// Current lifecycle state of one interceptor instance.
#[derive(Debug)]
pub struct Lifecycle {
  state: RwLock<LifecycleState>,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: RwLock::new(LifecycleState::Parsed),
    }
  }
}

impl Lifecycle {
  pub fn state(&self) -> LifecycleState {
    *self.state.read().unwrap_or_else(PoisonError::into_inner)
  }

  /// Move `from -> to` atomically, failing if the current state is not `from`.
  pub fn begin(
    &self,
    action: &'static str,
    from: LifecycleState,
    to: LifecycleState,
  ) -> Result<(), InterceptError> {
    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
    if *state != from {
      return Err(InterceptError::InvalidTransition {
        action,
        state: *state,
      });
    }
    *state = to;
    Ok(())
  }

  /// Unconditionally set the state; used to complete a step begun with `begin`.
  pub fn finish(&self, to: LifecycleState) {
    *self.state.write().unwrap_or_else(PoisonError::into_inner) = to;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use LifecycleState::*;

  #[test]
  fn test_happy_path() {
    let lifecycle = Lifecycle::default();
    assert_eq!(lifecycle.state(), Parsed);

    lifecycle.begin("install", Parsed, Installing).unwrap();
    lifecycle.finish(Installed);
    lifecycle.begin("activate", Installed, Activating).unwrap();
    lifecycle.finish(Active);

    assert_eq!(lifecycle.state(), Active);
  }

  #[test]
  fn test_out_of_order_transition_is_rejected() {
    let lifecycle = Lifecycle::default();

    let err = lifecycle
      .begin("activate", Installed, Activating)
      .unwrap_err();
    assert_eq!(
      err,
      InterceptError::InvalidTransition {
        action: "activate",
        state: Parsed
      }
    );
    assert_eq!(err.to_string(), "cannot activate while parsed");
    assert_eq!(lifecycle.state(), Parsed);
  }

  #[test]
  fn test_install_runs_once() {
    let lifecycle = Lifecycle::default();
    lifecycle.begin("install", Parsed, Installing).unwrap();

    assert!(lifecycle.begin("install", Parsed, Installing).is_err());
  }
}
