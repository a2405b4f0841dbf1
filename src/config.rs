//! Configuration management for blocksync.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::BlocksyncError;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/blocksync/config.yaml";

/// Per-source fetch timeout when none is configured
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Supported table families (IPv4 sets only)
const VALID_FAMILIES: &[&str] = &["inet", "ip"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// nftables table family holding the set (inet, ip)
    pub table_family: String,

    /// Table holding the set and the base chains
    pub table: String,

    /// Name of the enforcement set
    pub set: String,

    /// Comment attached to the drop rules; identifies them across runs
    pub rule_label: String,

    /// Chains that get a drop rule (host-inbound, forwarded, ...)
    pub chains: Vec<String>,

    /// Append-only activity log
    pub activity_log: PathBuf,

    /// Lock file guarding scheduled updates
    pub lock_file: PathBuf,

    /// Threat feed sources
    pub feeds: Vec<FeedSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_family: "inet".to_string(),
            table: "filter".to_string(),
            set: "blacklist".to_string(),
            rule_label: "blocksync-drop".to_string(),
            chains: vec!["input".to_string(), "forward".to_string()],
            activity_log: PathBuf::from("/var/log/blocksync.log"),
            lock_file: PathBuf::from("/run/blocksync.lock"),
            feeds: default_feeds(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Load the file if it exists, otherwise use built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            debug!("No config at {:?}, using defaults", path.as_ref());
            Ok(Self::default())
        }
    }

    /// Parse and validate YAML content.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !VALID_FAMILIES.contains(&self.table_family.as_str()) {
            return Err(invalid(format!(
                "Invalid table_family '{}'. Valid values: {}",
                self.table_family,
                VALID_FAMILIES.join(", ")
            )));
        }

        for (field, value) in [("table", &self.table), ("set", &self.set), ("rule_label", &self.rule_label)] {
            if !is_valid_identifier(value) {
                return Err(invalid(format!(
                    "Invalid {} '{}'. Use letters, digits, '-' and '_', starting with a letter",
                    field,
                    value
                )));
            }
        }

        if self.chains.is_empty() {
            return Err(invalid("At least one chain must be configured".to_string()));
        }
        for chain in &self.chains {
            if !is_valid_identifier(chain) {
                return Err(invalid(format!("Invalid chain name '{}'", chain)));
            }
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !names.insert(feed.name.as_str()) {
                return Err(invalid(format!("Duplicate feed name '{}'", feed.name)));
            }
        }

        Ok(())
    }

    /// Feeds taking part in scheduled updates
    pub fn enabled_feeds(&self) -> Vec<&FeedSource> {
        self.feeds.iter().filter(|f| f.enabled).collect()
    }
}

fn invalid(message: String) -> anyhow::Error {
    BlocksyncError::Config(message).into()
}

/// nft-safe identifier
fn is_valid_identifier(s: &str) -> bool {
    s.len() <= 64
        && s.starts_with(|c: char| c.is_ascii_alphabetic())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Remote threat feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,

    /// Lines starting with any of these characters are comments
    #[serde(default = "default_comment_markers")]
    pub comment_markers: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Keep only the first N valid prefixes of this feed
    #[serde(default)]
    pub max_entries: Option<usize>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl FeedSource {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            comment_markers: default_comment_markers(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_entries: None,
            enabled: true,
        }
    }

    pub fn with_comment_markers(mut self, markers: &str) -> Self {
        self.comment_markers = markers.to_string();
        self
    }

    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(invalid("Feed name cannot be empty".to_string()));
        }
        if !self.url.starts_with("https://") {
            return Err(invalid(format!("Feed '{}' URL must use HTTPS: {}", self.name, self.url)));
        }
        if self.timeout_secs == 0 {
            return Err(invalid(format!("Feed '{}' timeout_secs must be greater than 0", self.name)));
        }
        if self.max_entries == Some(0) {
            return Err(invalid(format!("Feed '{}' max_entries must be greater than 0", self.name)));
        }
        if self
            .comment_markers
            .chars()
            .any(|c| c.is_ascii_digit() || c == '.' || c == '/' || c.is_whitespace())
        {
            return Err(invalid(format!(
                "Feed '{}' comment_markers '{}' would hide address lines",
                self.name,
                self.comment_markers
            )));
        }
        Ok(())
    }
}

fn default_comment_markers() -> String {
    "#".to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::new("spamhaus_drop", "https://www.spamhaus.org/drop/drop.txt")
            .with_comment_markers(";"),
        FeedSource::new(
            "firehol_level1",
            "https://iplists.firehol.org/files/firehol_level1.netset",
        ),
        FeedSource::new(
            "ipsum",
            "https://raw.githubusercontent.com/stamparm/ipsum/master/ipsum.txt",
        )
        .with_max_entries(10_000),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.table_family, "inet");
        assert_eq!(config.set, "blacklist");
        assert_eq!(config.chains, vec!["input", "forward"]);
        assert_eq!(config.feeds.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_feeds() {
        let config = Config::default();
        let drop = &config.feeds[0];
        assert_eq!(drop.comment_markers, ";");
        assert_eq!(drop.timeout(), Duration::from_secs(30));
        assert_eq!(config.feeds[2].max_entries, Some(10_000));
        assert_eq!(config.enabled_feeds().len(), 3);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
set: threats
feeds:
  - name: local
    url: https://feeds.example.org/drop.txt
    comment_markers: ";#"
  - name: disabled
    url: https://feeds.example.org/other.txt
    enabled: false
    timeout_secs: 5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.set, "threats");
        assert_eq!(config.table, "filter");
        assert_eq!(config.feeds[0].timeout_secs, 30);
        assert_eq!(config.feeds[0].comment_markers, ";#");
        assert!(config.feeds[0].enabled);
        assert_eq!(config.enabled_feeds().len(), 1);
    }

    #[test]
    fn test_rejects_http_url() {
        let yaml = "feeds:\n  - name: plain\n    url: http://example.org/list.txt\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("HTTPS"));
        assert!(matches!(
            err.downcast_ref::<BlocksyncError>(),
            Some(BlocksyncError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_feed_names() {
        let yaml = "feeds:\n  - name: a\n    url: https://a.example/1\n  - name: a\n    url: https://a.example/2\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        for yaml in [
            "set: \"bad set\"",
            "table: \"filter; flush ruleset\"",
            "rule_label: 'a\"b'",
            "chains: []",
            "chains: [\"input }\"]",
            "table_family: bridge",
        ] {
            assert!(Config::from_yaml(yaml).is_err(), "accepted {yaml}");
        }
    }

    #[test]
    fn test_rejects_bad_feed_settings() {
        let mut config = Config::default();
        config.feeds[0].timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feeds[0].max_entries = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.feeds[0].comment_markers = "1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "chains: [input, forward, docker-user]").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.chains.len(), 3);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default("/nonexistent/blocksync/config.yaml").unwrap();
        assert_eq!(config.set, "blacklist");
        assert!(Config::load("/nonexistent/blocksync/config.yaml").is_err());
    }

    #[test]
    fn test_roundtrip_serialization() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.feeds, Config::default().feeds);
    }
}
