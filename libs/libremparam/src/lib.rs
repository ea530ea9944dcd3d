//! # libremparam
//!
//! Expose fixed-size named parameters of a process to other local processes.
//!
//! A [`ParameterServer`] listens on one UNIX socket per parameter, named
//! `parameter.<name>`, and serves one get or set transaction per connection
//! from its reactor thread. A [`ParameterProxy`] performs those transactions
//! synchronously from the client side.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use libremparam::{ParameterServer, ServerConfig, TypedParameter, TypedProxy};
//!
//! let volume = TypedParameter::new("volume", 0u32);
//! let handle = volume.handle();
//!
//! let mut server = ParameterServer::new(ServerConfig::default())?;
//! server.add_parameter(volume)?;
//! server.start()?;
//!
//! let proxy = TypedProxy::<u32>::new("volume");
//! proxy.set(&50)?;
//! assert_eq!(proxy.get()?, 50);
//! assert_eq!(handle.get(), 50);
//! # Ok::<(), libremparam::Error>(())
//! ```

pub mod connector;
pub mod parameter;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod value;

pub use connector::{Connector, Credentials, Listener, Namespace};
pub use parameter::{BytesParameter, ParameterHandle, RemoteParameter, TypedParameter};
pub use proxy::{ParameterProxy, TypedProxy};
pub use server::{AccessPolicy, ParameterServer, ServerConfig};
pub use value::{FixedString, WireValue};

use libreactor::ReactorError;
use std::io;

/// Transaction failures seen by the client
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Send size: protocol error: {0}")]
    SendSize(#[source] io::Error),
    #[error("Send data: protocol error: {0}")]
    SendData(#[source] io::Error),
    #[error("Receive status: protocol error: {0}")]
    ReceiveStatus(#[source] io::Error),
    #[error("Transaction refused")]
    TransactionRefused,
    #[error("Send get command: protocol error: {0}")]
    SendGet(#[source] io::Error),
    #[error("Receive size: protocol error: {0}")]
    ReceiveSize(#[source] io::Error),
    #[error("Answered size {answered} exceeds the {capacity} bytes expected")]
    SizeExceedsCapacity { answered: u32, capacity: usize },
    #[error("Receive data: protocol error: {0}")]
    ReceiveData(#[source] io::Error),
    #[error("Cannot set an empty value")]
    EmptyValue,
    #[error("Value of {0} bytes does not fit the size field")]
    ValueTooLarge(usize),
    #[error("Received {received} bytes, expected {expected}")]
    SizeMismatch { expected: usize, received: usize },
    #[error("Received bytes are not a valid {0}")]
    InvalidValue(&'static str),
}

/// Common errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Connection to {endpoint} failed: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to listen on {endpoint}: {source}")]
    Listen {
        endpoint: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read socket credentials: {0}")]
    Credentials(#[source] io::Error),
    #[error("Parameter {0} is already registered")]
    DuplicateName(String),
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("Server is running")]
    ServerRunning,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Reactor(#[from] ReactorError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
