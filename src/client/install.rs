//! Install prompt coordination.
//!
//! Decides whether and when to surface the "add to home screen" offer,
//! without pestering: never after an install, never more than a configured
//! number of times, and never inside the cooldown window after a dismissal.
//! The browser's deferred install event is modeled as a single-use
//! [`InstallPromptSource`] so the policy is testable without a browser.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::kv::KvStore;

/// Storage key for the persisted prompt record.
const STATE_KEY: &str = "install_prompt_state";

/// How the app is being displayed at page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
  /// Normal browser tab.
  Browser,
  /// Running without browser chrome, i.e. already installed.
  Standalone,
}

/// The user's choice on the native install dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
  Accepted,
  Dismissed,
}

/// What came of a [`InstallPromptCoordinator::maybe_prompt`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptDecision {
  /// Policy said no: installed, over the count limit, or cooling down.
  Suppressed,
  /// Policy said yes but no deferred prompt is armed.
  NotArmed,
  /// Prompt shown; the user installed.
  Accepted,
  /// Prompt shown; the user declined.
  Dismissed,
}

/// The deferred browser install event. Consumable exactly once.
#[async_trait]
pub trait InstallPromptSource: Send + Sync {
  async fn prompt(&self) -> Result<PromptOutcome>;
}

/// Persisted prompt record. Survives reloads and restarts, scoped to one
/// profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptState {
  pub dismissed_at: Option<DateTime<Utc>>,
  pub installed_at: Option<DateTime<Utc>>,
  pub prompt_shown_count: u32,
}

/// Rate-limiting policy for the install offer.
#[derive(Debug, Clone)]
pub struct PromptPolicy {
  /// Minimum time between a dismissal and the next offer.
  pub cooldown: Duration,
  /// Hard ceiling on how many times the offer is shown, ever.
  pub max_prompts: u32,
  /// Delay before presenting, so the offer never interrupts page load.
  pub arm_delay: std::time::Duration,
}

impl Default for PromptPolicy {
  fn default() -> Self {
    Self {
      cooldown: Duration::days(7),
      max_prompts: 3,
      arm_delay: std::time::Duration::from_secs(3),
    }
  }
}

/// Coordinates the captured install event against the persisted policy.
pub struct InstallPromptCoordinator<K: KvStore> {
  kv: K,
  policy: PromptPolicy,
  display_mode: DisplayMode,
  deferred: Option<Box<dyn InstallPromptSource>>,
}

impl<K: KvStore> InstallPromptCoordinator<K> {
  pub fn new(kv: K, policy: PromptPolicy, display_mode: DisplayMode) -> Self {
    Self {
      kv,
      policy,
      display_mode,
      deferred: None,
    }
  }

  /// Capture the deferred install event.
  ///
  /// In standalone display mode the app is already installed and the
  /// listener is never armed.
  pub fn arm(&mut self, source: Box<dyn InstallPromptSource>) {
    if self.display_mode == DisplayMode::Standalone {
      debug!("running standalone, install prompt stays disarmed");
      return;
    }
    self.deferred = Some(source);
  }

  pub fn is_armed(&self) -> bool {
    self.deferred.is_some()
  }

  /// Load the persisted prompt record, defaulting when absent.
  pub fn state(&self) -> Result<PromptState> {
    match self.kv.get(STATE_KEY)? {
      Some(raw) => {
        serde_json::from_str(&raw).map_err(|e| eyre!("Corrupt install prompt state: {}", e))
      }
      None => Ok(PromptState::default()),
    }
  }

  fn save_state(&self, state: &PromptState) -> Result<()> {
    let raw =
      serde_json::to_string(state).map_err(|e| eyre!("Failed to serialize prompt state: {}", e))?;
    // No TTL: the record outlives sessions by design
    self.kv.set(STATE_KEY, &raw, None)
  }

  /// Whether policy allows showing the offer at `now`.
  ///
  /// An installed app never prompts again, regardless of any other state.
  pub fn should_show_install_prompt(&self, now: DateTime<Utc>) -> Result<bool> {
    let state = self.state()?;

    if state.installed_at.is_some() {
      return Ok(false);
    }
    if state.prompt_shown_count >= self.policy.max_prompts {
      return Ok(false);
    }
    if let Some(dismissed_at) = state.dismissed_at {
      if now - dismissed_at < self.policy.cooldown {
        return Ok(false);
      }
    }

    Ok(true)
  }

  /// Offer the install if policy allows and a prompt is armed.
  ///
  /// The deferred source is consumed whether the user accepts or declines;
  /// the browser enforces single use and so does this coordinator.
  pub async fn maybe_prompt(&mut self) -> Result<PromptDecision> {
    if !self.should_show_install_prompt(Utc::now())? {
      return Ok(PromptDecision::Suppressed);
    }

    let source = match self.deferred.take() {
      Some(source) => source,
      None => return Ok(PromptDecision::NotArmed),
    };

    // Let the initial page load settle before interrupting
    tokio::time::sleep(self.policy.arm_delay).await;

    let outcome = source.prompt().await?;

    let mut state = self.state()?;
    state.prompt_shown_count += 1;
    match outcome {
      PromptOutcome::Accepted => {
        info!("install prompt accepted");
        state.installed_at = Some(Utc::now());
      }
      PromptOutcome::Dismissed => {
        debug!("install prompt dismissed, cooling down");
        state.dismissed_at = Some(Utc::now());
      }
    }
    self.save_state(&state)?;

    Ok(match outcome {
      PromptOutcome::Accepted => PromptDecision::Accepted,
      PromptOutcome::Dismissed => PromptDecision::Dismissed,
    })
  }

  /// The platform reported an install that happened outside our dialog
  /// (e.g. via browser chrome). Record it and drop any pending prompt.
  pub fn on_app_installed(&mut self) -> Result<()> {
    self.deferred = None;

    let mut state = self.state()?;
    if state.installed_at.is_none() {
      state.installed_at = Some(Utc::now());
    }
    self.save_state(&state)
  }
}
