//! Literal table entries

use serde::{Deserialize, Serialize};

use crate::types::{TypeMask, tag};

/// A compile-time literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integer
    Long(i64),
    /// Double
    Double(f64),
    /// String; materialized as an interned string
    String(String),
}

impl Literal {
    /// String literal
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Concrete type tag of this literal.
    pub const fn type_tag(&self) -> u8 {
        match self {
            Self::Null => tag::NULL,
            Self::Bool(false) => tag::FALSE,
            Self::Bool(true) => tag::TRUE,
            Self::Long(_) => tag::LONG,
            Self::Double(_) => tag::DOUBLE,
            Self::String(_) => tag::STRING,
        }
    }

    /// Singleton type set of this literal.
    pub const fn type_mask(&self) -> TypeMask {
        TypeMask::of(self.type_tag())
    }

    /// Integer value, if this is a long.
    pub const fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// String value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array key this literal denotes when used as a dimension.
    ///
    /// Integer-like strings (`"5"`, `"-3"`) select the integer key, other
    /// strings stay strings; `null` is the empty string; booleans are 0/1;
    /// doubles truncate toward zero.
    pub fn array_key(&self) -> Option<ArrayKey<'_>> {
        match self {
            Self::Null => Some(ArrayKey::Str("")),
            Self::Bool(b) => Some(ArrayKey::Long(i64::from(*b))),
            Self::Long(v) => Some(ArrayKey::Long(*v)),
            Self::Double(d) if d.is_finite() => Some(ArrayKey::Long(*d as i64)),
            Self::Double(_) => Some(ArrayKey::Long(0)),
            Self::String(s) => Some(match numeric_string_key(s) {
                Some(v) => ArrayKey::Long(v),
                None => ArrayKey::Str(s),
            }),
        }
    }
}

/// Canonical array key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKey<'a> {
    /// Integer key
    Long(i64),
    /// String key
    Str(&'a str),
}

/// Parse a string that is a canonical decimal integer (no leading zeros,
/// no `+`, no whitespace, `-0` excluded) and fits in an `i64`.
pub fn numeric_string_key(s: &str) -> Option<i64> {
    let bytes = s.as_bytes();
    let digits = match bytes.first()? {
        b'-' => &bytes[1..],
        _ => bytes,
    };
    if digits.is_empty() || digits.len() > 20 || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    if digits[0] == b'0' && (digits.len() > 1 || bytes[0] == b'-') {
        return None;
    }
    s.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_follow_canonical_form() {
        assert_eq!(numeric_string_key("5"), Some(5));
        assert_eq!(numeric_string_key("-12"), Some(-12));
        assert_eq!(numeric_string_key("0"), Some(0));
        assert_eq!(numeric_string_key("05"), None);
        assert_eq!(numeric_string_key("-0"), None);
        assert_eq!(numeric_string_key("+1"), None);
        assert_eq!(numeric_string_key(" 1"), None);
        assert_eq!(numeric_string_key(""), None);
        assert_eq!(numeric_string_key("99999999999999999999"), None);
    }

    #[test]
    fn literal_keys() {
        assert_eq!(Literal::Null.array_key(), Some(ArrayKey::Str("")));
        assert_eq!(Literal::Bool(true).array_key(), Some(ArrayKey::Long(1)));
        assert_eq!(Literal::Double(3.9).array_key(), Some(ArrayKey::Long(3)));
        assert_eq!(Literal::string("7").array_key(), Some(ArrayKey::Long(7)));
        assert_eq!(Literal::string("x").array_key(), Some(ArrayKey::Str("x")));
    }
}
