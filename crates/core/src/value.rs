//! Typed values passed to update scripts.

use serde::{Deserialize, Serialize};

/// Declared type of a context variable or script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    /// Not specified yet; accepts any value
    Unspecified,
    /// UTF-8 string
    String,
    /// Boolean
    Bool,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    Uint32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    Uint64,
    /// Double precision float
    Double,
}

impl ScriptType {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptType::Unspecified => "unspecified",
            ScriptType::String => "string",
            ScriptType::Bool => "bool",
            ScriptType::Int32 => "int32",
            ScriptType::Uint32 => "uint32",
            ScriptType::Int64 => "int64",
            ScriptType::Uint64 => "uint64",
            ScriptType::Double => "double",
        }
    }

    /// Parse a type name as used on the command line and in definitions.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "string" | "str" | "s" => Some(ScriptType::String),
            "bool" | "boolean" | "b" => Some(ScriptType::Bool),
            "int32" | "sint32" | "i32" | "int" => Some(ScriptType::Int32),
            "uint32" | "u32" => Some(ScriptType::Uint32),
            "int64" | "sint64" | "i64" => Some(ScriptType::Int64),
            "uint64" | "u64" => Some(ScriptType::Uint64),
            "double" | "f64" | "float" => Some(ScriptType::Double),
            "unspecified" | "any" => Some(ScriptType::Unspecified),
            _ => None,
        }
    }

    /// Whether this is a concrete (non-unspecified) type.
    pub fn is_concrete(&self) -> bool {
        !matches!(self, ScriptType::Unspecified)
    }
}

impl std::fmt::Display for ScriptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ScriptValue {
    /// UTF-8 string
    String(String),
    /// Boolean
    Bool(bool),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Double precision float
    Double(f64),
}

impl ScriptValue {
    /// Type of this value.
    pub fn script_type(&self) -> ScriptType {
        match self {
            ScriptValue::String(_) => ScriptType::String,
            ScriptValue::Bool(_) => ScriptType::Bool,
            ScriptValue::Int32(_) => ScriptType::Int32,
            ScriptValue::Uint32(_) => ScriptType::Uint32,
            ScriptValue::Int64(_) => ScriptType::Int64,
            ScriptValue::Uint64(_) => ScriptType::Uint64,
            ScriptValue::Double(_) => ScriptType::Double,
        }
    }

    /// Parse `text` as a value of type `ty`.
    ///
    /// An unspecified type yields a string value.
    pub fn parse_as(ty: ScriptType, text: &str) -> Option<Self> {
        let value = match ty {
            ScriptType::String | ScriptType::Unspecified => ScriptValue::String(text.to_string()),
            ScriptType::Bool => match text {
                "true" | "yes" | "1" => ScriptValue::Bool(true),
                "false" | "no" | "0" => ScriptValue::Bool(false),
                _ => return None,
            },
            ScriptType::Int32 => ScriptValue::Int32(text.parse().ok()?),
            ScriptType::Uint32 => ScriptValue::Uint32(text.parse().ok()?),
            ScriptType::Int64 => ScriptValue::Int64(text.parse().ok()?),
            ScriptType::Uint64 => ScriptValue::Uint64(text.parse().ok()?),
            ScriptType::Double => ScriptValue::Double(text.parse().ok()?),
        };
        Some(value)
    }

    /// Parse a `type:value` pair, e.g. `uint32:5` or `string:hello`.
    pub fn parse_typed(spec: &str) -> Option<Self> {
        let (ty, text) = spec.split_once(':')?;
        Self::parse_as(ScriptType::parse(ty)?, text)
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a JSON value, e.g. for writing into the fact store.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ScriptValue::String(s) => serde_json::Value::from(s.as_str()),
            ScriptValue::Bool(b) => serde_json::Value::from(*b),
            ScriptValue::Int32(v) => serde_json::Value::from(*v),
            ScriptValue::Uint32(v) => serde_json::Value::from(*v),
            ScriptValue::Int64(v) => serde_json::Value::from(*v),
            ScriptValue::Uint64(v) => serde_json::Value::from(*v),
            ScriptValue::Double(v) => serde_json::Value::from(*v),
        }
    }
}

impl std::fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptValue::String(s) => write!(f, "'{}'", s),
            ScriptValue::Bool(b) => write!(f, "{}", b),
            ScriptValue::Int32(v) => write!(f, "{}", v),
            ScriptValue::Uint32(v) => write!(f, "{}U", v),
            ScriptValue::Int64(v) => write!(f, "{}", v),
            ScriptValue::Uint64(v) => write!(f, "{}U", v),
            ScriptValue::Double(v) => write!(f, "{:.2}", v),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(s)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<i32> for ScriptValue {
    fn from(v: i32) -> Self {
        ScriptValue::Int32(v)
    }
}

impl From<u32> for ScriptValue {
    fn from(v: u32) -> Self {
        ScriptValue::Uint32(v)
    }
}

impl From<f64> for ScriptValue {
    fn from(v: f64) -> Self {
        ScriptValue::Double(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed() {
        assert_eq!(ScriptValue::parse_typed("uint32:5"), Some(ScriptValue::Uint32(5)));
        assert_eq!(
            ScriptValue::parse_typed("string:a:b"),
            Some(ScriptValue::String("a:b".to_string()))
        );
        assert_eq!(ScriptValue::parse_typed("bool:yes"), Some(ScriptValue::Bool(true)));
        assert_eq!(ScriptValue::parse_typed("int32:x"), None);
        assert_eq!(ScriptValue::parse_typed("nosuch:1"), None);
        assert_eq!(ScriptValue::parse_typed("nocolon"), None);
    }

    #[test]
    fn test_value_types() {
        assert_eq!(ScriptValue::from("x").script_type(), ScriptType::String);
        assert_eq!(ScriptValue::from(3u32).script_type(), ScriptType::Uint32);
        assert_eq!(ScriptValue::from(-3).script_type(), ScriptType::Int32);
        assert!(!ScriptType::Unspecified.is_concrete());
        assert!(ScriptType::Double.is_concrete());
    }

    #[test]
    fn test_display() {
        assert_eq!(ScriptValue::from("on").to_string(), "'on'");
        assert_eq!(ScriptValue::Uint32(4).to_string(), "4U");
        assert_eq!(ScriptValue::Double(1.5).to_string(), "1.50");
    }
}
