//! Property values and their stored representation.

use crate::error::{CodecError, CodecResult};
use crate::short_string::{decode_short_string, encode_short_string};

/// A property value attached to a node or relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float, stored by bit pattern.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw byte array.
    Bytes(Vec<u8>),
}

impl PropertyValue {
    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Type tag stored next to every property slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyType {
    /// Inline boolean.
    Bool = 1,
    /// Inline integer.
    Int = 2,
    /// Inline float.
    Float = 3,
    /// String packed into the inline word.
    ShortString = 4,
    /// String stored in a dynamic record chain.
    String = 5,
    /// Byte array stored in a dynamic record chain.
    Bytes = 6,
}

impl PropertyType {
    /// Returns the byte representation.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parses a type tag.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownPropertyType`] for unassigned tags.
    pub const fn from_byte(byte: u8) -> CodecResult<Self> {
        match byte {
            1 => Ok(Self::Bool),
            2 => Ok(Self::Int),
            3 => Ok(Self::Float),
            4 => Ok(Self::ShortString),
            5 => Ok(Self::String),
            6 => Ok(Self::Bytes),
            other => Err(CodecError::UnknownPropertyType(other)),
        }
    }

    /// Whether values of this type live in dynamic records.
    #[must_use]
    pub const fn is_dynamic(self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }

    /// Short lowercase name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::ShortString => "short_string",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }
}

/// How a value is laid out in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedValue {
    /// Fits the fixed 64-bit slot.
    Inline {
        /// Type tag.
        kind: PropertyType,
        /// Packed payload.
        payload: u64,
    },
    /// Must be written to a dynamic record chain.
    Overflow {
        /// Type tag.
        kind: PropertyType,
        /// Bytes to store in the chain.
        bytes: Vec<u8>,
    },
}

/// Chooses the representation for `value`.
///
/// Scalars are always inline. Strings are inline when some short-string
/// table accepts them; everything else overflows.
#[must_use]
pub fn encode_value(value: &PropertyValue) -> EncodedValue {
    match value {
        PropertyValue::Bool(b) => EncodedValue::Inline {
            kind: PropertyType::Bool,
            payload: u64::from(*b),
        },
        PropertyValue::Int(v) => EncodedValue::Inline {
            kind: PropertyType::Int,
            payload: *v as u64,
        },
        PropertyValue::Float(v) => EncodedValue::Inline {
            kind: PropertyType::Float,
            payload: v.to_bits(),
        },
        PropertyValue::String(s) => match encode_short_string(s) {
            Some(payload) => EncodedValue::Inline {
                kind: PropertyType::ShortString,
                payload,
            },
            None => EncodedValue::Overflow {
                kind: PropertyType::String,
                bytes: s.as_bytes().to_vec(),
            },
        },
        PropertyValue::Bytes(b) => EncodedValue::Overflow {
            kind: PropertyType::Bytes,
            bytes: b.clone(),
        },
    }
}

/// Decodes an inline slot.
///
/// # Errors
///
/// Fails for dynamic types or a malformed short-string word.
pub fn decode_inline(kind: PropertyType, payload: u64) -> CodecResult<PropertyValue> {
    match kind {
        PropertyType::Bool => Ok(PropertyValue::Bool(payload != 0)),
        PropertyType::Int => Ok(PropertyValue::Int(payload as i64)),
        PropertyType::Float => Ok(PropertyValue::Float(f64::from_bits(payload))),
        PropertyType::ShortString => decode_short_string(payload).map(PropertyValue::String),
        PropertyType::String | PropertyType::Bytes => {
            Err(CodecError::wrong_representation(kind.name(), "inline"))
        }
    }
}

/// Decodes the bytes read back from a dynamic record chain.
///
/// # Errors
///
/// Fails for inline types or invalid UTF-8.
pub fn decode_overflow(kind: PropertyType, bytes: Vec<u8>) -> CodecResult<PropertyValue> {
    match kind {
        PropertyType::String => String::from_utf8(bytes)
            .map(PropertyValue::String)
            .map_err(|_| CodecError::InvalidUtf8),
        PropertyType::Bytes => Ok(PropertyValue::Bytes(bytes)),
        _ => Err(CodecError::wrong_representation(kind.name(), "in dynamic records")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: PropertyValue) -> PropertyValue {
        match encode_value(&value) {
            EncodedValue::Inline { kind, payload } => decode_inline(kind, payload).unwrap(),
            EncodedValue::Overflow { kind, bytes } => decode_overflow(kind, bytes).unwrap(),
        }
    }

    #[test]
    fn scalars_are_inline() {
        for value in [
            PropertyValue::Bool(true),
            PropertyValue::Int(-1),
            PropertyValue::Int(i64::MAX),
            PropertyValue::Float(-0.5),
        ] {
            assert!(matches!(encode_value(&value), EncodedValue::Inline { .. }));
            assert_eq!(roundtrip(value.clone()), value);
        }
    }

    #[test]
    fn short_string_is_inline() {
        let encoded = encode_value(&"Neo".into());
        assert!(matches!(
            encoded,
            EncodedValue::Inline {
                kind: PropertyType::ShortString,
                ..
            }
        ));
        assert_eq!(roundtrip("Neo".into()), PropertyValue::from("Neo"));
    }

    #[test]
    fn long_string_overflows() {
        let text = "a string that is much too long to be packed inline";
        let encoded = encode_value(&text.into());
        assert_eq!(
            encoded,
            EncodedValue::Overflow {
                kind: PropertyType::String,
                bytes: text.as_bytes().to_vec(),
            }
        );
        assert_eq!(roundtrip(text.into()), PropertyValue::from(text));
    }

    #[test]
    fn bytes_always_overflow() {
        let value = PropertyValue::Bytes(vec![1, 2]);
        assert!(matches!(encode_value(&value), EncodedValue::Overflow { .. }));
        assert_eq!(roundtrip(value.clone()), value);
    }

    #[test]
    fn wrong_representation_is_rejected() {
        assert!(decode_inline(PropertyType::String, 0).is_err());
        assert!(decode_overflow(PropertyType::Int, vec![]).is_err());
        assert_eq!(
            decode_overflow(PropertyType::String, vec![0xff]),
            Err(CodecError::InvalidUtf8)
        );
    }

    #[test]
    fn type_tags_roundtrip() {
        for byte in 1..=6 {
            assert_eq!(PropertyType::from_byte(byte).unwrap().as_byte(), byte);
        }
        assert_eq!(
            PropertyType::from_byte(0),
            Err(CodecError::UnknownPropertyType(0))
        );
    }
}
