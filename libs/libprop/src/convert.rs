//! String conversion for a closed set of value types
//!
//! Numbers must be written without any whitespace. Integers additionally
//! accept a `0x` prefix for hexadecimal, unsigned types reject any `-`, and
//! booleans are one of `0`, `1`, `true`, `false`, `TRUE`, `FALSE`.

/// A type that can be stored as text
pub trait Convertible: Sized {
    fn from_text(text: &str) -> Option<Self>;
    fn to_text(&self) -> String;
}

/// Parse `text` as a `T`
pub fn parse<T: Convertible>(text: &str) -> Option<T> {
    T::from_text(text)
}

/// Format `value` so that [`parse`] reads it back
pub fn format<T: Convertible>(value: &T) -> String {
    value.to_text()
}

fn is_bare(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(char::is_whitespace)
}

macro_rules! convertible_integer {
    ($($ty:ty),*) => {$(
        impl Convertible for $ty {
            fn from_text(text: &str) -> Option<Self> {
                if !is_bare(text) {
                    return None;
                }
                // "-1" must not wrap around for unsigned types
                if <$ty>::MIN == 0 && text.contains('-') {
                    return None;
                }
                match text.strip_prefix("0x") {
                    Some(hex) if hex.starts_with(['+', '-']) => None,
                    Some(hex) => <$ty>::from_str_radix(hex, 16).ok(),
                    None => text.parse().ok(),
                }
            }

            fn to_text(&self) -> String {
                self.to_string()
            }
        }
    )*};
}

convertible_integer!(u16, i16, u32, i32, u64, i64);

macro_rules! convertible_float {
    ($($ty:ty),*) => {$(
        impl Convertible for $ty {
            fn from_text(text: &str) -> Option<Self> {
                if !is_bare(text) || text.starts_with("0x") {
                    return None;
                }
                text.parse::<$ty>().ok().filter(|v| v.is_finite())
            }

            fn to_text(&self) -> String {
                self.to_string()
            }
        }
    )*};
}

convertible_float!(f32, f64);

impl Convertible for bool {
    fn from_text(text: &str) -> Option<Self> {
        match text {
            "1" | "true" | "TRUE" => Some(true),
            "0" | "false" | "FALSE" => Some(false),
            _ => None,
        }
    }

    fn to_text(&self) -> String {
        String::from(if *self { "true" } else { "false" })
    }
}

/// Strings are taken verbatim
impl Convertible for String {
    fn from_text(text: &str) -> Option<Self> {
        Some(text.to_string())
    }

    fn to_text(&self) -> String {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_rejected() {
        for text in [" 1", "1 ", "1\n", "\t1", "1 2", ""] {
            assert_eq!(parse::<i32>(text), None, "{text:?}");
        }
        assert_eq!(parse::<f64>(" 1.5"), None);
    }

    #[test]
    fn test_unsigned_rejects_minus() {
        assert_eq!(parse::<u16>("-1"), None);
        assert_eq!(parse::<u64>("-0"), None);
        assert_eq!(parse::<i16>("-1"), Some(-1));
    }

    #[test]
    fn test_hex_integers() {
        assert_eq!(parse::<u32>("0x1F"), Some(31));
        assert_eq!(parse::<i64>("0xff"), Some(255));
        assert_eq!(parse::<u16>("0x10000"), None);
        assert_eq!(parse::<i32>("0x-1"), None);
        assert_eq!(parse::<f32>("0x10"), None);
    }

    #[test]
    fn test_range_checked() {
        assert_eq!(parse::<i16>("32767"), Some(i16::MAX));
        assert_eq!(parse::<i16>("32768"), None);
        assert_eq!(parse::<i16>("-32769"), None);
        assert_eq!(parse::<u64>("18446744073709551615"), Some(u64::MAX));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        assert_eq!(parse::<u32>("12abc"), None);
        assert_eq!(parse::<f64>("1.5.2"), None);
    }

    #[test]
    fn test_floats() {
        assert_eq!(parse::<f64>("-2.5"), Some(-2.5));
        assert_eq!(parse::<f32>("1e3"), Some(1000.0));
        assert_eq!(parse::<f64>("inf"), None);
        assert_eq!(parse::<f64>("NaN"), None);
        assert_eq!(format(&0.25f32), "0.25");
    }

    #[test]
    fn test_booleans() {
        for text in ["1", "true", "TRUE"] {
            assert_eq!(parse::<bool>(text), Some(true));
        }
        for text in ["0", "false", "FALSE"] {
            assert_eq!(parse::<bool>(text), Some(false));
        }
        assert_eq!(parse::<bool>("True"), None);
        assert_eq!(parse::<bool>("yes"), None);
        assert_eq!(format(&true), "true");
    }

    #[test]
    fn test_format_reads_back() {
        assert_eq!(parse::<i64>(&format(&i64::MIN)), Some(i64::MIN));
        assert_eq!(parse::<f64>(&format(&0.1f64)), Some(0.1));
        assert_eq!(parse::<String>("with spaces"), Some("with spaces".to_string()));
    }
}
