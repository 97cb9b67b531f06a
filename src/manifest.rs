//! Web app manifest model.
//!
//! The manifest is consumed by the browser's install machinery, not by the
//! controller, but shipping a broken one silently disables installability.
//! This model exists so the build can validate the document it serves.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebAppManifest {
  pub name: String,
  pub short_name: String,
  pub start_url: String,
  pub display: String,
  pub background_color: String,
  pub theme_color: String,
  pub icons: Vec<ManifestIcon>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestIcon {
  pub src: String,
  pub sizes: String,
  #[serde(rename = "type")]
  pub mime_type: String,
  #[serde(default)]
  pub purpose: Option<String>,
}

impl ManifestIcon {
  fn is_maskable(&self) -> bool {
    self
      .purpose
      .as_deref()
      .map(|p| p.split_whitespace().any(|part| part == "maskable"))
      .unwrap_or(false)
  }
}

impl WebAppManifest {
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read(path)
      .map_err(|e| eyre!("Failed to read manifest {}: {}", path.display(), e))?;
    Self::parse(&contents)
  }

  pub fn parse(bytes: &[u8]) -> Result<Self> {
    serde_json::from_slice(bytes).map_err(|e| eyre!("Failed to parse manifest: {}", e))
  }

  /// Check the installability requirements the browser enforces.
  pub fn validate(&self) -> Result<()> {
    if self.name.is_empty() {
      return Err(eyre!("Manifest name must not be empty"));
    }
    if self.start_url.is_empty() {
      return Err(eyre!("Manifest start_url must not be empty"));
    }
    if self.display != "standalone" {
      return Err(eyre!(
        "Manifest display must be \"standalone\", got \"{}\"",
        self.display
      ));
    }
    if self.icons.is_empty() {
      return Err(eyre!("Manifest must declare at least one icon"));
    }
    if !self.icons.iter().any(|icon| icon.is_maskable()) {
      return Err(eyre!("Manifest must declare at least one maskable icon"));
    }

    Ok(())
  }
}
