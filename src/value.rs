use crate::statics;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;

/// The coarse kind of a value. Integral and floating subtypes share `Number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Void,
    Bool,
    Number,
    String,
    Blob,
}

/// A dynamically-typed property value.
///
/// `PartialEq` is exact (same variant, same payload). Use [`DynamicValue::same_content`] for the
/// change-detection rule, [`DynamicValue::equivalent_to`] for loose structural comparison and
/// [`DynamicValue::numerically_equal`] when numeric subtypes should be ignored.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DynamicValue {
    #[default]
    Void,
    Bool(bool),
    Int(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
}

impl DynamicValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            DynamicValue::Void => ValueKind::Void,
            DynamicValue::Bool(_) => ValueKind::Bool,
            DynamicValue::Int(_) | DynamicValue::Int64(_) | DynamicValue::Double(_) => {
                ValueKind::Number
            }
            DynamicValue::String(_) => ValueKind::String,
            DynamicValue::Blob(_) => ValueKind::Blob,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DynamicValue::Void => statics::TYPE_VOID,
            DynamicValue::Bool(_) => statics::TYPE_BOOL,
            DynamicValue::Int(_) => statics::TYPE_INT,
            DynamicValue::Int64(_) => statics::TYPE_INT64,
            DynamicValue::Double(_) => statics::TYPE_DOUBLE,
            DynamicValue::String(_) => statics::TYPE_STRING,
            DynamicValue::Blob(_) => statics::TYPE_BLOB,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, DynamicValue::Void)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(v) => Some(*v),
            DynamicValue::Int(v) => Some(*v != 0),
            DynamicValue::Int64(v) => Some(*v != 0),
            DynamicValue::Double(v) => Some(*v != 0.0),
            DynamicValue::String(s) => match s.trim() {
                "1" | "true" => Some(true),
                "0" | "false" => Some(false),
                _ => None,
            },
            DynamicValue::Void | DynamicValue::Blob(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DynamicValue::Bool(v) => Some(i64::from(*v)),
            DynamicValue::Int(v) => Some(i64::from(*v)),
            DynamicValue::Int64(v) => Some(*v),
            DynamicValue::Double(v) if v.is_finite() => Some(*v as i64),
            DynamicValue::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DynamicValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            DynamicValue::Int(v) => Some(f64::from(*v)),
            DynamicValue::Int64(v) => Some(*v as f64),
            DynamicValue::Double(v) => Some(*v),
            DynamicValue::String(s) => s.trim().parse::<f64>().ok(),
            DynamicValue::Void | DynamicValue::Blob(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            DynamicValue::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Same variant and same payload.
    pub fn equals_with_same_type(&self, other: &DynamicValue) -> bool {
        self == other
    }

    /// Compares numbers by value regardless of subtype; non-numbers fall back to exact equality.
    pub fn numerically_equal(&self, other: &DynamicValue) -> bool {
        match (self.kind(), other.kind()) {
            (ValueKind::Number, ValueKind::Number) => match (self, other) {
                (DynamicValue::Double(_), _) | (_, DynamicValue::Double(_)) => {
                    self.as_f64() == other.as_f64()
                }
                _ => self.as_i64() == other.as_i64(),
            },
            _ => self == other,
        }
    }

    /// Same variant and equal printable form. This is the rule property writes use to decide
    /// whether anything changed, so `Int(5)` replaced by `Int64(5)` is a change.
    pub fn same_content(&self, other: &DynamicValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.to_string() == other.to_string()
    }

    /// Equal kind and equal printable form. Numeric subtypes are ignored.
    pub fn equivalent_to(&self, other: &DynamicValue) -> bool {
        self.kind() == other.kind() && self.to_string() == other.to_string()
    }

    /// Decodes into `T`, falling back to `default` when the value is missing or cannot be
    /// converted. Fallbacks are reported on the `debug` log level only.
    pub fn decode_or<T: ValueConvert>(&self, default: T) -> T {
        match T::from_value(self) {
            Some(v) => v,
            None => {
                if !self.is_void() {
                    tracing::debug!(
                        found = self.type_name(),
                        target_type = std::any::type_name::<T>(),
                        "value could not be decoded; using default"
                    );
                }
                default
            }
        }
    }

    /// The form used for XML attributes: the printable form.
    pub(crate) fn to_attribute_text(&self) -> String {
        self.to_string()
    }

    /// Attribute text always reads back as a string. Blobs keep their printable form and can be
    /// decoded again through [`ValueConvert`] for `Vec<u8>`.
    pub(crate) fn from_attribute_text(text: &str) -> DynamicValue {
        DynamicValue::String(text.to_owned())
    }
}

impl fmt::Display for DynamicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicValue::Void => Ok(()),
            DynamicValue::Bool(v) => f.write_str(if *v { "1" } else { "0" }),
            DynamicValue::Int(v) => write!(f, "{v}"),
            DynamicValue::Int64(v) => write!(f, "{v}"),
            DynamicValue::Double(v) => {
                let mut buf = ryu::Buffer::new();
                f.write_str(buf.format(*v))
            }
            DynamicValue::String(s) => f.write_str(s),
            DynamicValue::Blob(b) => {
                f.write_str(statics::BASE64_PREFIX)?;
                f.write_str(&base64::engine::general_purpose::STANDARD.encode(b))
            }
        }
    }
}

impl From<bool> for DynamicValue {
    fn from(v: bool) -> Self {
        DynamicValue::Bool(v)
    }
}

impl From<i32> for DynamicValue {
    fn from(v: i32) -> Self {
        DynamicValue::Int(v)
    }
}

impl From<i64> for DynamicValue {
    fn from(v: i64) -> Self {
        DynamicValue::Int64(v)
    }
}

impl From<f32> for DynamicValue {
    fn from(v: f32) -> Self {
        DynamicValue::Double(f64::from(v))
    }
}

impl From<f64> for DynamicValue {
    fn from(v: f64) -> Self {
        DynamicValue::Double(v)
    }
}

impl From<&str> for DynamicValue {
    fn from(v: &str) -> Self {
        DynamicValue::String(v.to_owned())
    }
}

impl From<String> for DynamicValue {
    fn from(v: String) -> Self {
        DynamicValue::String(v)
    }
}

impl From<Vec<u8>> for DynamicValue {
    fn from(v: Vec<u8>) -> Self {
        DynamicValue::Blob(v)
    }
}

impl From<&[u8]> for DynamicValue {
    fn from(v: &[u8]) -> Self {
        DynamicValue::Blob(v.to_vec())
    }
}

/// Two-way conversion between a Rust type and [`DynamicValue`]. Implement this for your own
/// types (colours, packed option strings, ...) to store them in properties and cache them with
/// [`crate::CachedValue`].
pub trait ValueConvert: Sized {
    /// `None` when the value is missing or has no sensible conversion.
    fn from_value(value: &DynamicValue) -> Option<Self>;

    fn to_value(&self) -> DynamicValue;
}

impl ValueConvert for DynamicValue {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        Some(value.clone())
    }

    fn to_value(&self) -> DynamicValue {
        self.clone()
    }
}

impl ValueConvert for bool {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        value.as_bool()
    }

    fn to_value(&self) -> DynamicValue {
        DynamicValue::Bool(*self)
    }
}

impl ValueConvert for i32 {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        value.as_i64().and_then(|v| i32::try_from(v).ok())
    }

    fn to_value(&self) -> DynamicValue {
        DynamicValue::Int(*self)
    }
}

impl ValueConvert for i64 {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        value.as_i64()
    }

    fn to_value(&self) -> DynamicValue {
        DynamicValue::Int64(*self)
    }
}

impl ValueConvert for f32 {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }

    fn to_value(&self) -> DynamicValue {
        DynamicValue::Double(f64::from(*self))
    }
}

impl ValueConvert for f64 {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        value.as_f64()
    }

    fn to_value(&self) -> DynamicValue {
        DynamicValue::Double(*self)
    }
}

impl ValueConvert for String {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value {
            DynamicValue::Void => None,
            other => Some(other.to_string()),
        }
    }

    fn to_value(&self) -> DynamicValue {
        DynamicValue::String(self.clone())
    }
}

impl ValueConvert for Vec<u8> {
    fn from_value(value: &DynamicValue) -> Option<Self> {
        match value {
            DynamicValue::Blob(bytes) => Some(bytes.clone()),
            DynamicValue::String(s) => {
                let encoded = s.strip_prefix(statics::BASE64_PREFIX)?;
                base64::engine::general_purpose::STANDARD.decode(encoded).ok()
            }
            _ => None,
        }
    }

    fn to_value(&self) -> DynamicValue {
        DynamicValue::Blob(self.clone())
    }
}

impl Serialize for DynamicValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DynamicValue::Void => serializer.serialize_unit(),
            DynamicValue::Bool(v) => serializer.serialize_bool(*v),
            DynamicValue::Int(v) => serializer.serialize_i32(*v),
            DynamicValue::Int64(v) => serializer.serialize_i64(*v),
            DynamicValue::Double(v) => serializer.serialize_f64(*v),
            DynamicValue::String(s) => serializer.serialize_str(s),
            DynamicValue::Blob(b) => serializer.serialize_bytes(b),
        }
    }
}

impl<'de> Deserialize<'de> for DynamicValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> de::Visitor<'de> for ValueVisitor {
            type Value = DynamicValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a scalar property value")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(DynamicValue::Void)
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(DynamicValue::Void)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(DynamicValue::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(match i32::try_from(v) {
                    Ok(small) => DynamicValue::Int(small),
                    Err(_) => DynamicValue::Int64(v),
                })
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                match i64::try_from(v) {
                    Ok(signed) => self.visit_i64(signed),
                    Err(_) => Ok(DynamicValue::Double(v as f64)),
                }
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(DynamicValue::Double(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(DynamicValue::String(v.to_owned()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
                Ok(DynamicValue::String(v))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(DynamicValue::Blob(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(DynamicValue::Blob(v))
            }

            // Formats without a bytes type (JSON) hand blobs back as a sequence of numbers.
            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut bytes = Vec::new();
                while let Some(byte) = seq.next_element::<u8>()? {
                    bytes.push(byte);
                }
                Ok(DynamicValue::Blob(bytes))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::{DynamicValue, ValueConvert, ValueKind};

    #[test]
    fn printable_forms_follow_the_value_kind() {
        assert_eq!(DynamicValue::Void.to_string(), "");
        assert_eq!(DynamicValue::Bool(true).to_string(), "1");
        assert_eq!(DynamicValue::Int(-3).to_string(), "-3");
        assert_eq!(DynamicValue::Int64(1 << 40).to_string(), "1099511627776");
        assert_eq!(DynamicValue::Double(42.0).to_string(), "42.0");
        assert_eq!(DynamicValue::Double(3.141).to_string(), "3.141");
        assert_eq!(DynamicValue::from("Hello World!").to_string(), "Hello World!");
        assert_eq!(DynamicValue::Blob(vec![1, 2, 3]).to_string(), "base64:AQID");
    }

    #[test]
    fn changing_only_the_numeric_subtype_is_a_change() {
        assert!(!DynamicValue::Int(5).same_content(&DynamicValue::Int64(5)));
        assert!(DynamicValue::Int(5).equivalent_to(&DynamicValue::Int64(5)));
        assert!(DynamicValue::Int64(5).same_content(&DynamicValue::Int64(5)));
        assert!(!DynamicValue::Int(1).same_content(&DynamicValue::Bool(true)));
        assert!(!DynamicValue::Int(1).equivalent_to(&DynamicValue::Bool(true)));
        assert!(!DynamicValue::Int(1).same_content(&DynamicValue::Double(1.0)));
        assert!(!DynamicValue::Int(5).equals_with_same_type(&DynamicValue::Int64(5)));
    }

    #[test]
    fn numeric_comparison_is_explicit() {
        assert!(DynamicValue::Int(1).numerically_equal(&DynamicValue::Double(1.0)));
        assert!(DynamicValue::Int(7).numerically_equal(&DynamicValue::Int64(7)));
        assert!(!DynamicValue::Int(7).numerically_equal(&DynamicValue::from("7")));
        assert_eq!(DynamicValue::Double(2.5).kind(), ValueKind::Number);
    }

    #[test]
    fn decoding_parses_strings_and_falls_back_to_defaults() {
        assert_eq!(f64::from_value(&DynamicValue::from("42.5")), Some(42.5));
        assert_eq!(i32::from_value(&DynamicValue::from(" 12 ")), Some(12));
        assert_eq!(bool::from_value(&DynamicValue::from("1")), Some(true));
        assert_eq!(DynamicValue::from("nope").decode_or(7_i32), 7);
        assert_eq!(DynamicValue::Void.decode_or(String::from("x")), "x");
        assert_eq!(DynamicValue::Int64(i64::MAX).decode_or(-1_i32), -1);
    }

    #[test]
    fn attribute_text_always_reads_back_as_a_string() {
        let blob = DynamicValue::Blob(vec![0, 255, 7]);
        let back = DynamicValue::from_attribute_text(&blob.to_attribute_text());
        assert_eq!(back, DynamicValue::from("base64:AP8H"));
        assert_eq!(Vec::<u8>::from_value(&back), Some(vec![0, 255, 7]));

        assert_eq!(
            DynamicValue::from_attribute_text("base64:***"),
            DynamicValue::from("base64:***")
        );
        assert_eq!(Vec::<u8>::from_value(&DynamicValue::from("base64:***")), None);
        assert_eq!(Vec::<u8>::from_value(&DynamicValue::from("plain")), None);
    }

    #[test]
    fn serde_json_roundtrip_normalizes_integers() {
        let json = serde_json::to_string(&DynamicValue::Int64(12)).unwrap();
        let back: DynamicValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DynamicValue::Int(12));

        let json = serde_json::to_string(&DynamicValue::Blob(vec![9, 8])).unwrap();
        let back: DynamicValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DynamicValue::Blob(vec![9, 8]));
    }
}
