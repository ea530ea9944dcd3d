//! Fixed-size wire encodings of parameter values

use std::fmt;

/// A value with a fixed-size byte representation
pub trait WireValue: Clone + Send + 'static {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Write the value into `buf`, which is exactly `SIZE` bytes long
    fn encode(&self, buf: &mut [u8]);

    /// Read a value back. `None` when `buf` is not `SIZE` bytes or holds an
    /// invalid encoding.
    fn decode(buf: &[u8]) -> Option<Self>;
}

macro_rules! wire_number {
    ($($ty:ty),*) => {$(
        impl WireValue for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn encode(&self, buf: &mut [u8]) {
                buf.copy_from_slice(&self.to_ne_bytes());
            }

            fn decode(buf: &[u8]) -> Option<Self> {
                Some(<$ty>::from_ne_bytes(buf.try_into().ok()?))
            }
        }
    )*};
}

wire_number!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// One byte, 0 or 1
impl WireValue for bool {
    const SIZE: usize = 1;

    fn encode(&self, buf: &mut [u8]) {
        buf[0] = u8::from(*self);
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        match buf {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }
}

/// UTF-8 text stored NUL-padded in `N` bytes
///
/// At most `N - 1` bytes of text fit, so the encoding always carries a
/// terminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FixedString<const N: usize> {
    text: String,
}

impl<const N: usize> FixedString<N> {
    /// Longest text that fits, in bytes
    pub const MAX_LEN: usize = N.saturating_sub(1);

    /// `None` when `text` is too long or contains a NUL
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.len() > Self::MAX_LEN || text.contains('\0') {
            return None;
        }
        Some(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl<const N: usize> fmt::Display for FixedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl<const N: usize> WireValue for FixedString<N> {
    const SIZE: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        let text = self.text.as_bytes();
        buf[..text.len()].copy_from_slice(text);
        buf[text.len()..].fill(0);
    }

    fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != N {
            return None;
        }
        let end = buf.iter().position(|&b| b == 0)?;
        let text = std::str::from_utf8(&buf[..end]).ok()?;
        Some(Self {
            text: text.to_string(),
        })
    }
}
