//! Wire protocol
//!
//! Every field is a native-endian `u32`; peers always run on the same host.
//!
//! ```text
//! Request:        [size]            0 = get, N > 0 = set followed by N bytes
//! Response (get): [size][size bytes]
//! Response (set): [status]          0 = success, 0xFFFFFFFF = failure
//! ```

use std::time::Duration;

/// Prefix of every endpoint name
pub const ENDPOINT_PREFIX: &str = "parameter.";

/// Send and receive timeout applied to every connection
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Size field announcing a get
pub const COMMAND_GET: u32 = 0;

pub const STATUS_SUCCESS: u32 = 0;
pub const STATUS_FAILURE: u32 = 0xFFFF_FFFF;

/// Largest set payload the server reads for a parameter smaller than this.
/// Bigger announcements drop the connection without reading.
pub const MAX_SET_PAYLOAD: usize = 64 * 1024;

/// Socket name of a parameter
pub fn endpoint_name(parameter: &str) -> String {
    format!("{}{}", ENDPOINT_PREFIX, parameter)
}

/// Decoded request size field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Get,
    Set(u32),
}

impl Request {
    pub fn from_size(size: u32) -> Self {
        match size {
            COMMAND_GET => Request::Get,
            size => Request::Set(size),
        }
    }

    pub fn size_field(self) -> u32 {
        match self {
            Request::Get => COMMAND_GET,
            Request::Set(size) => size,
        }
    }
}

/// Set transaction outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn code(self) -> u32 {
        match self {
            Status::Success => STATUS_SUCCESS,
            Status::Failure => STATUS_FAILURE,
        }
    }

    /// Anything but the success code is a failure
    pub fn from_code(code: u32) -> Self {
        if code == STATUS_SUCCESS {
            Status::Success
        } else {
            Status::Failure
        }
    }
}
