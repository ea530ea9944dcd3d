//! Persistent key/value properties
//!
//! A [`PropertyStore`] maps short names to short string values. [`Property`]
//! layers a typed value with a fallback default on top of a store.

use crate::convert::{self, Convertible};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Longest property name, in bytes
pub const NAME_MAX: usize = 31;

/// Longest property value, in bytes
pub const VALUE_MAX: usize = 91;

/// Property errors
#[derive(Debug, thiserror::Error)]
pub enum PropertyError {
    #[error("Property name {name:?} is too long ({len} bytes, max {})", NAME_MAX)]
    NameTooLong { name: String, len: usize },
    #[error("Invalid property name {0:?}")]
    InvalidName(String),
    #[error("Value of {name} is too long ({len} bytes, max {})", VALUE_MAX)]
    ValueTooLong { name: String, len: usize },
    #[error("Value of {0} contains a line break")]
    InvalidValue(String),
    #[error("Failed to load properties from {}: {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to persist properties to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// String key/value storage shared between threads
pub trait PropertyStore: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError>;
}

fn check_name(name: &str) -> Result<(), PropertyError> {
    if name.len() > NAME_MAX {
        return Err(PropertyError::NameTooLong {
            name: name.to_string(),
            len: name.len(),
        });
    }
    if name.is_empty() || name.contains(['=', '\n', '\r']) {
        return Err(PropertyError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn check_value(name: &str, value: &str) -> Result<(), PropertyError> {
    if value.len() > VALUE_MAX {
        return Err(PropertyError::ValueTooLong {
            name: name.to_string(),
            len: value.len(),
        });
    }
    if value.contains(['\n', '\r']) {
        return Err(PropertyError::InvalidValue(name.to_string()));
    }
    Ok(())
}

fn lock(values: &Mutex<BTreeMap<String, String>>) -> MutexGuard<'_, BTreeMap<String, String>> {
    values.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PropertyStore for MemoryStore {
    fn get(&self, name: &str) -> Option<String> {
        lock(&self.values).get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        check_name(name)?;
        check_value(name, value)?;
        lock(&self.values).insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a file of `name=value` lines
///
/// The whole file is rewritten through a temporary file and a rename on
/// every `set`, so readers never observe a partial update.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Load `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PropertyError> {
        let path = path.as_ref().to_path_buf();

        let values = match fs::read_to_string(&path) {
            Ok(content) => parse_lines(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No property file at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(source) => return Err(PropertyError::Load { path, source }),
        };

        debug!("Loaded {} properties from {:?}", values.len(), path);
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        for (name, value) in values {
            writeln!(file, "{}={}", name, value)?;
        }
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

fn parse_lines(content: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in content.lines() {
        match line.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                values.insert(name.to_string(), value.to_string());
            }
            _ => {
                if !line.is_empty() {
                    warn!("Ignoring malformed property line {:?}", line);
                }
            }
        }
    }
    values
}

impl PropertyStore for FileStore {
    fn get(&self, name: &str) -> Option<String> {
        lock(&self.values).get(name).cloned()
    }

    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        check_name(name)?;
        check_value(name, value)?;

        let mut values = lock(&self.values);
        let mut updated = values.clone();
        updated.insert(name.to_string(), value.to_string());

        self.persist(&updated).map_err(|source| PropertyError::Persist {
            path: self.path.clone(),
            source,
        })?;
        *values = updated;
        Ok(())
    }
}

/// Typed view of one property
pub struct Property<T> {
    store: Arc<dyn PropertyStore>,
    name: String,
    default: T,
}

impl<T: Convertible + Clone> Property<T> {
    /// Fails when the name or the formatted default exceed the store limits
    pub fn new(
        store: Arc<dyn PropertyStore>,
        name: impl Into<String>,
        default: T,
    ) -> Result<Self, PropertyError> {
        let name = name.into();
        check_name(&name)?;
        check_value(&name, &convert::format(&default))?;
        Ok(Self {
            store,
            name,
            default,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Stored value, or the default when missing, empty or unparsable
    pub fn value(&self) -> T {
        self.store
            .get(&self.name)
            .filter(|text| !text.is_empty())
            .and_then(|text| convert::parse(&text))
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn set_value(&self, value: &T) -> Result<(), PropertyError> {
        let text = convert::format(value);
        check_value(&self.name, &text)?;
        self.store.set(&self.name, &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_memory_store_limits() {
        let store = MemoryStore::new();
        assert!(store.get("audio.volume").is_none());

        store.set("audio.volume", "50").unwrap();
        assert_eq!(store.get("audio.volume").as_deref(), Some("50"));

        let long_name = "n".repeat(NAME_MAX + 1);
        assert!(matches!(
            store.set(&long_name, "1"),
            Err(PropertyError::NameTooLong { .. })
        ));
        assert!(store.set(&"n".repeat(NAME_MAX), "1").is_ok());

        let long_value = "v".repeat(VALUE_MAX + 1);
        assert!(matches!(
            store.set("audio.volume", &long_value),
            Err(PropertyError::ValueTooLong { .. })
        ));
        assert_eq!(store.get("audio.volume").as_deref(), Some("50"));

        assert!(matches!(
            store.set("a=b", "1"),
            Err(PropertyError::InvalidName(_))
        ));
        assert!(matches!(
            store.set("audio.mode", "a\nb"),
            Err(PropertyError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_file_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("props").join("remparam.prop");

        let store = FileStore::open(&path).unwrap();
        store.set("audio.volume", "50").unwrap();
        store.set("audio.mute", "true").unwrap();
        store.set("audio.volume", "70").unwrap();

        let reloaded = FileStore::open(&path).unwrap();
        assert_eq!(reloaded.get("audio.volume").as_deref(), Some("70"));
        assert_eq!(reloaded.get("audio.mute").as_deref(), Some("true"));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "audio.mute=true\naudio.volume=70\n");
    }

    #[test]
    fn test_file_store_ignores_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("remparam.prop");
        fs::write(&path, "garbage\n=nameless\nmodem.state=on=air\n\naudio.volume=3\n").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("modem.state").as_deref(), Some("on=air"));
        assert_eq!(store.get("audio.volume").as_deref(), Some("3"));
        assert!(store.get("garbage").is_none());
        assert!(store.get("").is_none());
    }

    #[test]
    fn test_property_default_fallback() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        let volume = Property::new(Arc::clone(&store), "audio.volume", 30u32).unwrap();

        assert_eq!(volume.value(), 30);

        store.set("audio.volume", "").unwrap();
        assert_eq!(volume.value(), 30);

        store.set("audio.volume", "loud").unwrap();
        assert_eq!(volume.value(), 30);

        volume.set_value(&0x40).unwrap();
        assert_eq!(store.get("audio.volume").as_deref(), Some("64"));
        assert_eq!(volume.value(), 64);
        assert_eq!(*volume.default_value(), 30);
    }

    #[test]
    fn test_property_limits() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());

        assert!(Property::new(Arc::clone(&store), "x".repeat(NAME_MAX + 1), 0i32).is_err());
        assert!(Property::new(Arc::clone(&store), "label", "x".repeat(VALUE_MAX + 1)).is_err());

        let label = Property::new(store, "label", String::new()).unwrap();
        assert!(label.set_value(&"x".repeat(VALUE_MAX + 1)).is_err());
        label.set_value(&"speaker".to_string()).unwrap();
        assert_eq!(label.value(), "speaker");
    }
}
