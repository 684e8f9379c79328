//! Bridge configuration.
//!
//! Stored as TOML, by default at `~/.msgbridge/config.toml`:
//!
//! ```toml
//! unknown-endpoint = "reject"
//! log = "msgbridge=info"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do with an inbound message for an endpoint nobody registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownEndpointPolicy {
    /// Fail the dispatch with `UnknownEndpoint`.
    #[default]
    Reject,

    /// Log a warning and discard the message.
    Drop,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct BridgeConfig {
    /// Handling of inbound messages for unregistered endpoints.
    pub unknown_endpoint: UnknownEndpointPolicy,

    /// `tracing` filter directive (e.g. `msgbridge=debug`) used when none is given
    /// on the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl BridgeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Failed to parse bridge configuration TOML")
    }

    /// Where the configuration lives when no path is given.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".msgbridge").join("config.toml"))
    }

    /// Load the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read bridge config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to load bridge config from {}", path.display()))
    }

    /// Load the configuration at `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no bridge config, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use indoc::indoc;

    #[test]
    fn empty_config_is_default() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.unknown_endpoint, UnknownEndpointPolicy::Reject);
    }

    #[test]
    fn parses_all_fields() {
        let config = BridgeConfig::from_toml_str(indoc! {r#"
            unknown-endpoint = "drop"
            log = "msgbridge=debug"
        "#})
        .unwrap();

        expect![[r#"
            BridgeConfig {
                unknown_endpoint: Drop,
                log: Some(
                    "msgbridge=debug",
                ),
            }
        "#]]
        .assert_debug_eq(&config);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = BridgeConfig::from_toml_str(indoc! {r#"
            unknown-endpoint = "reject"
            queue-depth = 4
        "#})
        .unwrap_err();
        assert!(format!("{err:#}").contains("queue-depth"), "{err:#}");
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(BridgeConfig::from_toml_str(r#"unknown-endpoint = "ignore""#).is_err());
    }

    #[test]
    fn serializes_back_to_toml() {
        let config = BridgeConfig {
            unknown_endpoint: UnknownEndpointPolicy::Drop,
            log: None,
        };
        expect![[r#"
            unknown-endpoint = "drop"
        "#]]
        .assert_eq(&toml::to_string(&config).unwrap());
    }

    #[test]
    fn missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load_or_default(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "unknown-endpoint = \"drop\"\n").unwrap();

        let config = BridgeConfig::load_or_default(&path).unwrap();
        assert_eq!(config.unknown_endpoint, UnknownEndpointPolicy::Drop);
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log = 3\n").unwrap();

        let err = BridgeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("config.toml"), "{err}");
    }
}
