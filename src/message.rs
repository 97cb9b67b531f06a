//! Message protocol between the offline controller and page contexts.
//!
//! Messages are JSON-shaped with a `type` discriminator so the page side can
//! skip message kinds it does not know about. A controller from a newer build
//! may broadcast types this build has never heard of; those deserialize to
//! [`ClientMessage::Unknown`] and are dropped by listeners.

use serde::{Deserialize, Serialize};

/// A message broadcast from the offline controller to every open page context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// A new application version has taken control; the page should offer a
  /// reload.
  #[serde(rename = "UPDATE_AVAILABLE")]
  UpdateAvailable { version: String },

  /// Any message type this build does not recognize. Treated as a no-op.
  #[serde(other)]
  Unknown,
}

impl ClientMessage {
  /// The version carried by an update signal, if this is one.
  pub fn update_version(&self) -> Option<&str> {
    match self {
      ClientMessage::UpdateAvailable { version } => Some(version),
      ClientMessage::Unknown => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_update_available_wire_shape() {
    let msg = ClientMessage::UpdateAvailable {
      version: "2.3.0".to_string(),
    };
    let json = serde_json::to_value(&msg).unwrap();
    assert_eq!(json["type"], "UPDATE_AVAILABLE");
    assert_eq!(json["version"], "2.3.0");
  }

  #[test]
  fn test_round_trip() {
    let msg = ClientMessage::UpdateAvailable {
      version: "1.0.0".to_string(),
    };
    let json = serde_json::to_string(&msg).unwrap();
    let back: ClientMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back, msg);
  }

  #[test]
  fn test_unknown_type_is_noop() {
    let back: ClientMessage =
      serde_json::from_str(r#"{"type":"SYNC_COMPLETE","count":3}"#).unwrap();
    assert_eq!(back, ClientMessage::Unknown);
    assert_eq!(back.update_version(), None);
  }
}
