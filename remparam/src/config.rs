//! Remparam configuration

use crate::kind::ValueKind;
use anyhow::{bail, Context};
use libremparam::{AccessPolicy, Namespace, ServerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/remparam/remparam.toml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemparamConfig {
    /// Daemon settings
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Served parameters
    #[serde(default, rename = "parameter")]
    pub parameters: Vec<ParameterConfig>,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the sockets. Abstract namespace when unset.
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,

    /// Per-connection send/receive timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Which clients are served
    #[serde(default)]
    pub access: AccessPolicy,

    /// Trace every reactor event
    #[serde(default)]
    pub trace_events: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Property file backing persistent parameters
    #[serde(default = "default_property_file")]
    pub property_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_dir: None,
            timeout_ms: default_timeout_ms(),
            access: AccessPolicy::default(),
            trace_events: false,
            log_level: default_log_level(),
            property_file: default_property_file(),
        }
    }
}

/// One served parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterConfig {
    pub name: String,

    pub kind: ValueKind,

    /// Size in bytes of string parameters, terminator included
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Initial value, as text
    #[serde(default)]
    pub default: Option<String>,

    /// Property persisting the value across restarts
    #[serde(default)]
    pub property: Option<String>,

    /// Refuse remote writes
    #[serde(default)]
    pub read_only: bool,
}

impl ParameterConfig {
    pub fn size(&self) -> anyhow::Result<usize> {
        self.kind
            .size(self.capacity)
            .with_context(|| format!("Parameter {}", self.name))
    }

    pub fn default_text(&self) -> &str {
        self.default.as_deref().unwrap_or(self.kind.zero())
    }
}

// Default value functions
fn default_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_property_file() -> PathBuf {
    PathBuf::from("/var/lib/remparam/properties")
}

impl RemparamConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .with_context(|| format!("Invalid configuration {:?}", path))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject parameter sets the daemon cannot serve
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut names = HashSet::new();
        for parameter in &self.parameters {
            if parameter.name.is_empty() {
                bail!("Parameter with an empty name");
            }
            if !names.insert(parameter.name.as_str()) {
                bail!("Parameter {} is declared twice", parameter.name);
            }
            let size = parameter.size()?;
            parameter
                .kind
                .encode(parameter.default_text(), size)
                .with_context(|| format!("Invalid default for parameter {}", parameter.name))?;
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ParameterConfig> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn namespace(&self) -> Namespace {
        match &self.daemon.socket_dir {
            Some(dir) => Namespace::Directory(dir.clone()),
            None => Namespace::Abstract,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.daemon.timeout_ms)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            name: "remparamd".to_string(),
            namespace: self.namespace(),
            timeout: self.timeout(),
            access: self.daemon.access,
            trace_events: self.daemon.trace_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = include_str!("../remparam.toml");

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = RemparamConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.parameters.is_empty());
        assert_eq!(config.timeout(), Duration::from_millis(5000));
        assert_eq!(config.namespace(), Namespace::Abstract);
        assert_eq!(config.daemon.access, AccessPolicy::SameGroup);
    }

    #[test]
    fn test_sample_configuration() {
        let config: RemparamConfig = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert!(!config.parameters.is_empty());

        let volume = config.find("volume").unwrap();
        assert_eq!(volume.kind, ValueKind::U32);
        assert_eq!(volume.property.as_deref(), Some("audio.volume"));
    }

    #[test]
    fn test_parse_parameters() {
        let config: RemparamConfig = toml::from_str(
            r#"
            [daemon]
            socket_dir = "/run/remparam"
            timeout_ms = 250
            access = "same-user-and-group"

            [[parameter]]
            name = "route"
            kind = "string"
            capacity = 16
            default = "speaker"
            read_only = true

            [[parameter]]
            name = "mute"
            kind = "bool"
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        assert_eq!(
            config.namespace(),
            Namespace::Directory(PathBuf::from("/run/remparam"))
        );
        let server = config.server_config();
        assert_eq!(server.timeout, Duration::from_millis(250));
        assert_eq!(server.access, AccessPolicy::SameUserAndGroup);

        let route = config.find("route").unwrap();
        assert_eq!(route.size().unwrap(), 16);
        assert!(route.read_only);
        assert_eq!(config.find("mute").unwrap().default_text(), "false");
    }

    #[test]
    fn test_access_policy_names() {
        for (name, policy) in [
            ("same-group", AccessPolicy::SameGroup),
            ("same-user", AccessPolicy::SameUser),
            ("same-user-and-group", AccessPolicy::SameUserAndGroup),
        ] {
            let config: RemparamConfig =
                toml::from_str(&format!("[daemon]\naccess = {:?}", name)).unwrap();
            assert_eq!(config.server_config().access, policy);
        }

        assert!(toml::from_str::<RemparamConfig>("[daemon]\naccess = \"anyone\"").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let duplicate: RemparamConfig = toml::from_str(
            r#"
            [[parameter]]
            name = "volume"
            kind = "u32"

            [[parameter]]
            name = "volume"
            kind = "i32"
            "#,
        )
        .unwrap();
        assert!(duplicate.validate().is_err());

        let no_capacity: RemparamConfig = toml::from_str(
            r#"
            [[parameter]]
            name = "route"
            kind = "string"
            "#,
        )
        .unwrap();
        assert!(no_capacity.validate().is_err());

        let bad_default: RemparamConfig = toml::from_str(
            r#"
            [[parameter]]
            name = "volume"
            kind = "u16"
            default = "-3"
            "#,
        )
        .unwrap();
        assert!(bad_default.validate().is_err());
    }
}
