//! The calbridge configuration file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::config::SyncPolicy;
use crate::error::{BridgeError, BridgeResult};
use crate::remote::Remote;

static DEFAULT_CONFIG_PATH: &str = "~/.config/calbridge/config.toml";

fn default_max_exceptions() -> u32 {
    5
}

/// Configuration at ~/.config/calbridge/config.toml
///
/// Domains describe provider accounts. Each synced calendar lists the
/// replicas (one calendar per domain) that must hold the same events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Seconds between two sync cycles in watch mode.
    pub poll_time: u64,

    /// Consecutive transient failures after which watch mode gives up.
    #[serde(default = "default_max_exceptions")]
    pub max_exceptions: u32,

    #[serde(default)]
    pub sync: SyncPolicy,

    #[serde(default)]
    pub domains: BTreeMap<String, Remote>,

    #[serde(default)]
    pub calendars: BTreeMap<String, SyncedCalendarConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedCalendarConfig {
    pub replicas: Vec<ReplicaConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Key into `[domains]`.
    pub domain: String,
    /// The provider's identifier for the calendar.
    pub calendar_id: String,
    /// Never write to this calendar, only read from it.
    #[serde(default)]
    pub read_only: bool,
}

impl BridgeConfig {
    pub fn default_path() -> BridgeResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| BridgeError::Config("Could not determine config directory".into()))?
            .join("calbridge");

        Ok(config_dir.join("config.toml"))
    }

    /// Resolve a user-supplied path, expanding `~`. Falls back to the default location.
    pub fn resolve_path(path: Option<&str>) -> BridgeResult<PathBuf> {
        match path {
            Some(p) => Ok(PathBuf::from(shellexpand::tilde(p).into_owned())),
            None => Self::default_path(),
        }
    }

    pub fn load(path: &Path) -> BridgeResult<Self> {
        if !path.exists() {
            return Err(BridgeError::Config(format!(
                "Config file {} not found. See {} for the expected layout.",
                path.display(),
                DEFAULT_CONFIG_PATH
            )));
        }

        let config: BridgeConfig = Config::builder()
            .add_source(File::from(path.to_path_buf()).format(FileFormat::Toml))
            .build()
            .map_err(|e| BridgeError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> BridgeResult<Self> {
        let config: BridgeConfig = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .map_err(|e| BridgeError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| BridgeError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn domain(&self, name: &str) -> BridgeResult<&Remote> {
        self.domains.get(name).ok_or_else(|| {
            BridgeError::Config(format!(
                "Domain {} referenced in calendar config not defined.",
                name
            ))
        })
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.poll_time == 0 {
            return Err(BridgeError::Config("poll_time must be at least 1 second".into()));
        }

        if self.calendars.is_empty() {
            return Err(BridgeError::Config("No calendars configured".into()));
        }

        for (name, calendar) in &self.calendars {
            if calendar.replicas.is_empty() {
                return Err(BridgeError::Config(format!(
                    "Calendar '{}' has no replicas",
                    name
                )));
            }
            for replica in &calendar.replicas {
                self.domain(&replica.domain)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
poll_time = 60

[sync]
max_actions_per_batch = 100

[domains."foo.com"]
provider = "google"
google_account = "admin@foo.com"

[domains."bar.com"]
provider = "google"
google_account = "admin@bar.com"

[calendars.rooms]
replicas = [
  { domain = "foo.com", calendar_id = "foo.com_1@resource.calendar.google.com" },
  { domain = "bar.com", calendar_id = "bar.com_1@resource.calendar.google.com", read_only = true },
]
"#;

    #[test]
    fn test_parses_domains_calendars_and_policy() {
        let config = BridgeConfig::from_toml_str(EXAMPLE).unwrap();

        assert_eq!(config.poll_time, 60);
        assert_eq!(config.max_exceptions, 5);
        assert_eq!(config.sync.max_actions_per_batch, 100);
        assert_eq!(config.sync.iteration_limit, 100);

        let rooms = &config.calendars["rooms"];
        assert_eq!(rooms.replicas.len(), 2);
        assert!(!rooms.replicas[0].read_only);
        assert!(rooms.replicas[1].read_only);

        let foo = config.domain("foo.com").unwrap();
        assert_eq!(foo.provider.name(), "google");
        assert_eq!(foo.account_identifier(), Some("admin@foo.com"));
    }

    #[test]
    fn test_undefined_domain_is_a_config_error() {
        let contents = r#"
poll_time = 60

[calendars.rooms]
replicas = [{ domain = "nowhere.com", calendar_id = "x" }]
"#;
        let err = BridgeConfig::from_toml_str(contents).unwrap_err();
        assert!(matches!(err, BridgeError::Config(msg) if msg.contains("nowhere.com")));
    }

    #[test]
    fn test_missing_poll_time_is_rejected() {
        let contents = EXAMPLE.replace("poll_time = 60", "");
        assert!(matches!(
            BridgeConfig::from_toml_str(&contents),
            Err(BridgeError::Config(_))
        ));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = BridgeConfig::load(&dir.path().join("config.toml")).unwrap_err();
        assert!(matches!(err, BridgeError::Config(msg) if msg.contains("not found")));
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, EXAMPLE).unwrap();

        let config = BridgeConfig::load(&path).unwrap();
        assert_eq!(config.calendars.len(), 1);
        assert_eq!(config.domains.len(), 2);
    }
}
