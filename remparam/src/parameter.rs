//! Parameters declared in the configuration

use crate::config::ParameterConfig;
use crate::kind::ValueKind;
use anyhow::Context;
use libprop::PropertyStore;
use libremparam::RemoteParameter;
use std::sync::Arc;
use tracing::{info, warn};

/// Property key and store a parameter persists to
struct Backing {
    store: Arc<dyn PropertyStore>,
    key: String,
}

/// Parameter whose type is only known at runtime
pub struct ConfiguredParameter {
    name: String,
    kind: ValueKind,
    value: Vec<u8>,
    read_only: bool,
    backing: Option<Backing>,
}

impl ConfiguredParameter {
    /// Build from `config`, seeding the value from its property if any
    pub fn new(config: &ParameterConfig, store: Arc<dyn PropertyStore>) -> anyhow::Result<Self> {
        let size = config.size()?;
        let default = config.default_text();

        let (text, backing) = match &config.property {
            Some(key) => {
                let text = config
                    .kind
                    .seed(Arc::clone(&store), key, default)
                    .with_context(|| format!("Parameter {}", config.name))?;
                let backing = Backing {
                    store,
                    key: key.clone(),
                };
                (text, Some(backing))
            }
            None => (default.to_string(), None),
        };

        let value = match config.kind.encode(&text, size) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Parameter {}: stored value {:?} unusable ({}), using default",
                    config.name, text, e
                );
                config
                    .kind
                    .encode(default, size)
                    .with_context(|| format!("Invalid default for parameter {}", config.name))?
            }
        };

        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            value,
            read_only: config.read_only,
            backing,
        })
    }

    /// Current value as text
    pub fn text(&self) -> String {
        self.kind
            .decode(&self.value)
            .unwrap_or_else(|e| format!("<{}>", e))
    }
}

impl RemoteParameter for ConfiguredParameter {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        self.value.len()
    }

    fn read(&self, buf: &mut [u8]) {
        buf.copy_from_slice(&self.value);
    }

    fn write(&mut self, data: &[u8]) -> bool {
        if self.read_only {
            warn!("Parameter {} is read-only", self.name);
            return false;
        }
        if data.len() != self.value.len() {
            warn!(
                "Parameter {}: received {} bytes, expected {}",
                self.name,
                data.len(),
                self.value.len()
            );
            return false;
        }

        let text = match self.kind.decode(data) {
            Ok(text) => text,
            Err(e) => {
                warn!("Parameter {}: {}", self.name, e);
                return false;
            }
        };

        if let Some(backing) = &self.backing {
            if let Err(e) = backing.store.set(&backing.key, &text) {
                warn!("Parameter {}: cannot persist {:?}: {}", self.name, text, e);
                return false;
            }
        }

        self.value.copy_from_slice(data);
        info!("Parameter {} set to {}", self.name, text);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libprop::MemoryStore;

    fn config(kind: ValueKind, property: Option<&str>) -> ParameterConfig {
        ParameterConfig {
            name: "volume".to_string(),
            kind,
            capacity: None,
            default: Some("30".to_string()),
            property: property.map(str::to_string),
            read_only: false,
        }
    }

    #[test]
    fn test_seeded_from_property() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        store.set("audio.volume", "45").unwrap();

        let param =
            ConfiguredParameter::new(&config(ValueKind::U32, Some("audio.volume")), store).unwrap();
        assert_eq!(param.text(), "45");
        assert_eq!(param.size(), 4);
    }

    #[test]
    fn test_default_without_property() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        let param = ConfiguredParameter::new(&config(ValueKind::I16, None), store).unwrap();
        let mut buf = [0u8; 2];
        param.read(&mut buf);
        assert_eq!(buf, 30i16.to_ne_bytes());
    }

    #[test]
    fn test_remote_write_persists() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        let mut param = ConfiguredParameter::new(
            &config(ValueKind::U32, Some("audio.volume")),
            Arc::clone(&store),
        )
        .unwrap();

        assert!(param.write(&70u32.to_ne_bytes()));
        assert_eq!(store.get("audio.volume").as_deref(), Some("70"));
        assert!(!param.write(&[1]));
        assert_eq!(param.text(), "70");
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        let mut cfg = config(ValueKind::U32, None);
        cfg.read_only = true;
        let mut param = ConfiguredParameter::new(&cfg, store).unwrap();

        assert!(!param.write(&1u32.to_ne_bytes()));
        assert_eq!(param.text(), "30");
    }

    #[test]
    fn test_string_too_long_for_capacity_falls_back() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        store.set("audio.route", "bluetooth-headset").unwrap();
        let cfg = ParameterConfig {
            name: "route".to_string(),
            kind: ValueKind::String,
            capacity: Some(8),
            default: Some("spk".to_string()),
            property: Some("audio.route".to_string()),
            read_only: false,
        };

        let param = ConfiguredParameter::new(&cfg, store).unwrap();
        assert_eq!(param.text(), "spk");
    }
}
