//! Runtime value kinds
//!
//! Parameters declared in the configuration carry their type as a
//! [`ValueKind`]. It bridges the text form used by properties and the
//! command line with the fixed-size wire form served remotely.

use clap::ValueEnum;
use libprop::{convert, Convertible, Property, PropertyError, PropertyStore};
use libremparam::WireValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Type of a configured parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    /// UTF-8 text, NUL-padded to the declared capacity
    String,
}

/// Conversion errors
#[derive(Debug, thiserror::Error)]
pub enum KindError {
    #[error("{value:?} is not a valid {kind}")]
    Parse { kind: ValueKind, value: String },
    #[error("String parameters need a capacity of at least 2 bytes")]
    Capacity,
    #[error("{len} bytes of text do not fit a {size}-byte string")]
    TooLong { len: usize, size: usize },
    #[error("Expected {expected} bytes, received {received}")]
    Size { expected: usize, received: usize },
    #[error("Received bytes are not a valid {0}")]
    Decode(ValueKind),
    #[error(transparent)]
    Property(#[from] PropertyError),
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::I16 => "i16",
            ValueKind::U16 => "u16",
            ValueKind::I32 => "i32",
            ValueKind::U32 => "u32",
            ValueKind::I64 => "i64",
            ValueKind::U64 => "u64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::String => "string",
        };
        f.write_str(name)
    }
}

impl ValueKind {
    /// Wire size. Strings take their capacity, terminator included.
    pub fn size(self, capacity: Option<usize>) -> Result<usize, KindError> {
        Ok(match self {
            ValueKind::Bool => bool::SIZE,
            ValueKind::I16 => i16::SIZE,
            ValueKind::U16 => u16::SIZE,
            ValueKind::I32 => i32::SIZE,
            ValueKind::U32 => u32::SIZE,
            ValueKind::I64 => i64::SIZE,
            ValueKind::U64 => u64::SIZE,
            ValueKind::F32 => f32::SIZE,
            ValueKind::F64 => f64::SIZE,
            ValueKind::String => match capacity {
                Some(capacity) if capacity >= 2 => capacity,
                _ => return Err(KindError::Capacity),
            },
        })
    }

    /// Text used when a parameter declares no default
    pub fn zero(self) -> &'static str {
        match self {
            ValueKind::Bool => "false",
            ValueKind::String => "",
            _ => "0",
        }
    }

    /// Parse `text` into a `size`-byte wire value
    pub fn encode(self, text: &str, size: usize) -> Result<Vec<u8>, KindError> {
        match self {
            ValueKind::Bool => encode_as::<bool>(self, text),
            ValueKind::I16 => encode_as::<i16>(self, text),
            ValueKind::U16 => encode_as::<u16>(self, text),
            ValueKind::I32 => encode_as::<i32>(self, text),
            ValueKind::U32 => encode_as::<u32>(self, text),
            ValueKind::I64 => encode_as::<i64>(self, text),
            ValueKind::U64 => encode_as::<u64>(self, text),
            ValueKind::F32 => encode_as::<f32>(self, text),
            ValueKind::F64 => encode_as::<f64>(self, text),
            ValueKind::String => {
                if text.contains('\0') {
                    return Err(KindError::Parse {
                        kind: self,
                        value: text.to_string(),
                    });
                }
                if text.len() >= size {
                    return Err(KindError::TooLong {
                        len: text.len(),
                        size,
                    });
                }
                let mut buf = vec![0u8; size];
                buf[..text.len()].copy_from_slice(text.as_bytes());
                Ok(buf)
            }
        }
    }

    /// Format a wire value as text
    pub fn decode(self, bytes: &[u8]) -> Result<String, KindError> {
        match self {
            ValueKind::Bool => decode_as::<bool>(self, bytes),
            ValueKind::I16 => decode_as::<i16>(self, bytes),
            ValueKind::U16 => decode_as::<u16>(self, bytes),
            ValueKind::I32 => decode_as::<i32>(self, bytes),
            ValueKind::U32 => decode_as::<u32>(self, bytes),
            ValueKind::I64 => decode_as::<i64>(self, bytes),
            ValueKind::U64 => decode_as::<u64>(self, bytes),
            ValueKind::F32 => decode_as::<f32>(self, bytes),
            ValueKind::F64 => decode_as::<f64>(self, bytes),
            ValueKind::String => {
                let end = bytes
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(KindError::Decode(self))?;
                std::str::from_utf8(&bytes[..end])
                    .map(str::to_string)
                    .map_err(|_| KindError::Decode(self))
            }
        }
    }

    /// Current text of property `key`, falling back to `default` when the
    /// property is missing or does not parse as this kind
    pub fn seed(
        self,
        store: Arc<dyn PropertyStore>,
        key: &str,
        default: &str,
    ) -> Result<String, KindError> {
        match self {
            ValueKind::Bool => seed_as::<bool>(self, store, key, default),
            ValueKind::I16 => seed_as::<i16>(self, store, key, default),
            ValueKind::U16 => seed_as::<u16>(self, store, key, default),
            ValueKind::I32 => seed_as::<i32>(self, store, key, default),
            ValueKind::U32 => seed_as::<u32>(self, store, key, default),
            ValueKind::I64 => seed_as::<i64>(self, store, key, default),
            ValueKind::U64 => seed_as::<u64>(self, store, key, default),
            ValueKind::F32 => seed_as::<f32>(self, store, key, default),
            ValueKind::F64 => seed_as::<f64>(self, store, key, default),
            ValueKind::String => seed_as::<String>(self, store, key, default),
        }
    }
}

fn parse_as<T: Convertible>(kind: ValueKind, text: &str) -> Result<T, KindError> {
    convert::parse(text).ok_or_else(|| KindError::Parse {
        kind,
        value: text.to_string(),
    })
}

fn encode_as<T: Convertible + WireValue>(kind: ValueKind, text: &str) -> Result<Vec<u8>, KindError> {
    let value: T = parse_as(kind, text)?;
    let mut buf = vec![0u8; T::SIZE];
    value.encode(&mut buf);
    Ok(buf)
}

fn decode_as<T: Convertible + WireValue>(kind: ValueKind, bytes: &[u8]) -> Result<String, KindError> {
    if bytes.len() != T::SIZE {
        return Err(KindError::Size {
            expected: T::SIZE,
            received: bytes.len(),
        });
    }
    T::decode(bytes)
        .map(|value| convert::format(&value))
        .ok_or(KindError::Decode(kind))
}

fn seed_as<T: Convertible + Clone>(
    kind: ValueKind,
    store: Arc<dyn PropertyStore>,
    key: &str,
    default: &str,
) -> Result<String, KindError> {
    let default: T = parse_as(kind, default)?;
    let property = Property::new(store, key, default)?;
    Ok(convert::format(&property.value()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use libprop::MemoryStore;

    #[test]
    fn test_sizes() {
        assert_eq!(ValueKind::Bool.size(None).unwrap(), 1);
        assert_eq!(ValueKind::U32.size(Some(99)).unwrap(), 4);
        assert_eq!(ValueKind::F64.size(None).unwrap(), 8);
        assert_eq!(ValueKind::String.size(Some(16)).unwrap(), 16);
        assert!(matches!(
            ValueKind::String.size(None),
            Err(KindError::Capacity)
        ));
        assert!(ValueKind::String.size(Some(1)).is_err());
    }

    #[test]
    fn test_encode_numbers() {
        assert_eq!(ValueKind::U32.encode("50", 4).unwrap(), 50u32.to_ne_bytes());
        assert_eq!(ValueKind::I16.encode("0x10", 2).unwrap(), 16i16.to_ne_bytes());
        assert_eq!(ValueKind::Bool.encode("TRUE", 1).unwrap(), [1]);
        assert!(matches!(
            ValueKind::U16.encode("-1", 2),
            Err(KindError::Parse { .. })
        ));
        assert!(ValueKind::F32.encode(" 1.0", 4).is_err());
    }

    #[test]
    fn test_decode_numbers() {
        assert_eq!(ValueKind::I64.decode(&(-7i64).to_ne_bytes()).unwrap(), "-7");
        assert_eq!(ValueKind::F64.decode(&0.5f64.to_ne_bytes()).unwrap(), "0.5");
        assert_eq!(ValueKind::Bool.decode(&[0]).unwrap(), "false");
        assert!(matches!(
            ValueKind::Bool.decode(&[3]),
            Err(KindError::Decode(ValueKind::Bool))
        ));
        assert!(matches!(
            ValueKind::U32.decode(&[0; 2]),
            Err(KindError::Size {
                expected: 4,
                received: 2
            })
        ));
    }

    #[test]
    fn test_strings() {
        let bytes = ValueKind::String.encode("spk", 8).unwrap();
        assert_eq!(bytes, b"spk\0\0\0\0\0");
        assert_eq!(ValueKind::String.decode(&bytes).unwrap(), "spk");

        assert!(matches!(
            ValueKind::String.encode("12345678", 8),
            Err(KindError::TooLong { len: 8, size: 8 })
        ));
        assert!(ValueKind::String.decode(b"full").is_err());
    }

    #[test]
    fn test_seed_from_property() {
        let store: Arc<dyn PropertyStore> = Arc::new(MemoryStore::new());
        assert_eq!(
            ValueKind::U32.seed(Arc::clone(&store), "audio.volume", "30").unwrap(),
            "30"
        );

        store.set("audio.volume", "0x20").unwrap();
        assert_eq!(
            ValueKind::U32.seed(Arc::clone(&store), "audio.volume", "30").unwrap(),
            "32"
        );

        store.set("audio.volume", "-5").unwrap();
        assert_eq!(
            ValueKind::U32.seed(Arc::clone(&store), "audio.volume", "30").unwrap(),
            "30"
        );

        assert!(ValueKind::Bool.seed(store, "audio.mute", "maybe").is_err());
    }

    #[test]
    fn test_display_matches_config_names() {
        for kind in ValueKind::value_variants() {
            let parsed: ValueKind = toml::Value::String(kind.to_string()).try_into().unwrap();
            assert_eq!(parsed, *kind);
        }
    }
}
