//! Offline controller lifecycle states.
//!
//! The browser-style worker lifecycle is kept exactly: a controller installs,
//! waits (instantaneously, since this controller always skips waiting),
//! activates, then intercepts fetches. A controller that fails to install or
//! activate becomes redundant and never serves a request.

use color_eyre::{eyre::eyre, Result};
use std::fmt;

/// Lifecycle state of an offline controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, nothing fetched yet.
  New,
  /// Pre-populating the shell cache.
  Installing,
  /// Install complete, not yet controlling pages.
  Installed,
  /// Purging old stores and claiming pages.
  Activating,
  /// Controlling pages and intercepting fetches.
  Active,
  /// Failed or replaced; terminal.
  Redundant,
}

impl WorkerState {
  /// Whether a controller in this state may intercept fetches.
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Active)
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, WorkerState::Redundant)
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::New => "new",
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Active => "active",
      WorkerState::Redundant => "redundant",
    };
    write!(f, "{}", s)
  }
}

/// Check whether a lifecycle transition is allowed.
pub fn is_valid_transition(from: WorkerState, to: WorkerState) -> bool {
  use WorkerState::*;

  matches!(
    (from, to),
    (New, Installing)
      | (Installing, Installed)
      | (Installing, Redundant)   // install failed
      | (Installed, Activating)
      | (Activating, Active)
      | (Activating, Redundant)   // activate failed
      | (Active, Redundant) // replaced by a newer version
  )
}

/// Validate and return the new state, or error on an illegal transition.
pub fn transition(from: WorkerState, to: WorkerState) -> Result<WorkerState> {
  if !is_valid_transition(from, to) {
    return Err(eyre!("Invalid lifecycle transition: {} -> {}", from, to));
  }
  Ok(to)
}
