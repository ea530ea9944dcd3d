//! # libprop
//!
//! Typed string conversion ([`convert`]) and short persistent key/value
//! properties ([`property`]) used to seed and persist parameter values.

pub mod convert;
pub mod property;

pub use convert::Convertible;
pub use property::{FileStore, MemoryStore, Property, PropertyError, PropertyStore};
