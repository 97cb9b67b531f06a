//! Page-side update notification listener.
//!
//! Listens for update signals from the offline controller and exposes a
//! single dismissible "new version available" slot. Acting on it means a
//! full reload of the embedding surface (a soft navigation would not re-run
//! the controller handshake), so the listener only reports state; it never
//! reloads anything itself.

use tokio::sync::broadcast;
use tracing::debug;

use crate::message::ClientMessage;
use crate::worker::ControllerHandle;

/// Poll-driven listener for controller messages, one per page context.
pub struct UpdateListener {
  subscription: Option<broadcast::Receiver<ClientMessage>>,
  latest_version: Option<String>,
  dismissed: bool,
}

impl UpdateListener {
  /// Mount on a page controlled by the given worker.
  ///
  /// Mounting implies an active controller, so the listener immediately asks
  /// it to check for updates: an update that happened while this tab was
  /// backgrounded would otherwise go unnoticed.
  pub fn mount(handle: &ControllerHandle) -> Self {
    let listener = Self::attach(handle.subscribe());
    handle.request_update_check();
    listener
  }

  fn attach(receiver: broadcast::Receiver<ClientMessage>) -> Self {
    Self {
      subscription: Some(receiver),
      latest_version: None,
      dismissed: false,
    }
  }

  /// Drain pending messages without blocking. Returns true if the visible
  /// state changed. Call from the page's tick loop.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.subscription {
      Some(rx) => rx,
      None => return false,
    };

    let mut changed = false;
    loop {
      match receiver.try_recv() {
        Ok(ClientMessage::UpdateAvailable { version }) => {
          // One slot: a second signal replaces the advertised version
          // instead of stacking another notification
          self.latest_version = Some(version);
          self.dismissed = false;
          changed = true;
        }
        Ok(ClientMessage::Unknown) => {
          debug!("ignoring unknown controller message");
        }
        Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
          debug!(skipped, "update listener lagged, catching up");
        }
        Err(broadcast::error::TryRecvError::Empty) => break,
        Err(broadcast::error::TryRecvError::Closed) => {
          self.subscription = None;
          break;
        }
      }
    }

    changed
  }

  /// Whether the "update available" control should be visible.
  pub fn update_available(&self) -> bool {
    self.latest_version.is_some() && !self.dismissed
  }

  /// The advertised version, kept even while dismissed.
  pub fn latest_version(&self) -> Option<&str> {
    self.latest_version.as_deref()
  }

  /// Hide the notification until the next signal.
  pub fn dismiss(&mut self) {
    self.dismissed = true;
  }

  /// Drop the subscription. The page is going away.
  pub fn unmount(self) {}
}
