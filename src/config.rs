use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::client::PromptPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub app: AppConfig,
  #[serde(default)]
  pub shell: ShellConfig,
  #[serde(default)]
  pub install_prompt: InstallPromptConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Display name, used for logging only.
  pub name: String,
  /// Application version. Names the shell cache store; changing it is what
  /// makes a deploy an "update".
  pub version: String,
  /// Base URL of the backend serving the shell and the REST API.
  pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
  /// Ordered shell manifest. Every path must answer HTTP 200 at install
  /// time; the first entry is the entry document.
  pub precache: Vec<String>,
}

impl Default for ShellConfig {
  fn default() -> Self {
    Self {
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/favicon.png".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallPromptConfig {
  /// Days to wait after a dismissal before offering again.
  pub cooldown_days: i64,
  /// Ceiling on how many times the offer is ever shown.
  pub max_prompts: u32,
  /// Delay before presenting the offer, in milliseconds.
  pub arm_delay_ms: u64,
}

impl Default for InstallPromptConfig {
  fn default() -> Self {
    Self {
      cooldown_days: 7,
      max_prompts: 3,
      arm_delay_ms: 3000,
    }
  }
}

impl InstallPromptConfig {
  pub fn policy(&self) -> PromptPolicy {
    PromptPolicy {
      cooldown: Duration::days(self.cooldown_days),
      max_prompts: self.max_prompts,
      arm_delay: std::time::Duration::from_millis(self.arm_delay_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tatame.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tatame/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tatame/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tatame.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tatame").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.app.version.trim().is_empty() {
      return Err(eyre!("app.version must not be empty"));
    }
    if self.shell.precache.is_empty() {
      return Err(eyre!("shell.precache must list at least one path"));
    }
    for path in &self.shell.precache {
      if !path.starts_with('/') {
        return Err(eyre!("shell.precache paths must be absolute, got {}", path));
      }
    }
    Ok(())
  }

  /// Bearer token for the backend API, if configured in the environment.
  /// The shell resources themselves are public.
  pub fn get_api_token() -> Option<String> {
    std::env::var("TATAME_API_TOKEN").ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(yaml: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config = parse(
      r#"
app:
  name: Tatame
  version: "1.4.2"
  base_url: https://app.tatame.example
"#,
    )
    .unwrap();

    assert_eq!(config.shell.precache.len(), 4);
    assert_eq!(config.shell.precache[0], "/");
    assert_eq!(config.install_prompt.cooldown_days, 7);
    assert_eq!(config.install_prompt.max_prompts, 3);
  }

  #[test]
  fn test_empty_version_rejected() {
    let result = parse(
      r#"
app:
  name: Tatame
  version: ""
  base_url: https://app.tatame.example
"#,
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_relative_precache_path_rejected() {
    let result = parse(
      r#"
app:
  name: Tatame
  version: "1.0.0"
  base_url: https://app.tatame.example
shell:
  precache: ["index.html"]
"#,
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_policy_conversion() {
    let config = InstallPromptConfig {
      cooldown_days: 14,
      max_prompts: 1,
      arm_delay_ms: 500,
    };
    let policy = config.policy();
    assert_eq!(policy.cooldown, Duration::days(14));
    assert_eq!(policy.max_prompts, 1);
    assert_eq!(policy.arm_delay, std::time::Duration::from_millis(500));
  }
}
