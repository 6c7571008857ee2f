//! Type codec between the storage wire form (strings) and typed values.
//!
//! Every attribute is declared with one of the closed [`AttributeType`]
//! variants. The declared type decides how the raw column string is decoded
//! when read and how a typed value is encoded before it is written.

use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;

use crate::{StorageDatetime, StorageError};

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Bool,
    Int,
    Float,
    String,
    Datetime,
    Date,
    /// Opaque serialized list.
    Array,
    Json,
    /// Boolean stored as an enum column; only the legacy literal `1` is true.
    EnumBool,
    /// Unix timestamp in seconds.
    Epoch,
}

/// Bind parameter category used when a raw value is sent to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    Int,
    Bool,
    Str,
}

impl AttributeType {
    pub const ALL: [AttributeType; 10] = [
        AttributeType::Bool,
        AttributeType::Int,
        AttributeType::Float,
        AttributeType::String,
        AttributeType::Datetime,
        AttributeType::Date,
        AttributeType::Array,
        AttributeType::Json,
        AttributeType::EnumBool,
        AttributeType::Epoch,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::Bool => "bool",
            AttributeType::Int => "int",
            AttributeType::Float => "float",
            AttributeType::String => "string",
            AttributeType::Datetime => "datetime",
            AttributeType::Date => "date",
            AttributeType::Array => "array",
            AttributeType::Json => "json",
            AttributeType::EnumBool => "enum-bool",
            AttributeType::Epoch => "epoch",
        }
    }

    pub fn bind_kind(&self) -> BindKind {
        match self {
            AttributeType::Int => BindKind::Int,
            AttributeType::Bool => BindKind::Bool,
            _ => BindKind::Str,
        }
    }

    /// Decode a raw storage string into a typed value.
    pub fn decode(&self, raw: &str) -> Result<AttributeValue, StorageError> {
        let value = match self {
            AttributeType::Bool => AttributeValue::Bool(!(raw.is_empty() || raw == "0")),
            AttributeType::EnumBool => AttributeValue::Bool(raw == "1"),
            AttributeType::Int => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    AttributeValue::Int(0)
                } else {
                    AttributeValue::Int(trimmed.parse().map_err(|e| {
                        StorageError::decode(format!("Invalid int '{}': {}", raw, e))
                    })?)
                }
            }
            AttributeType::Float => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    AttributeValue::Float(0.0)
                } else {
                    AttributeValue::Float(trimmed.parse().map_err(|e| {
                        StorageError::decode(format!("Invalid float '{}': {}", raw, e))
                    })?)
                }
            }
            AttributeType::String => AttributeValue::String(raw.to_string()),
            AttributeType::Datetime | AttributeType::Date => {
                AttributeValue::Datetime(StorageDatetime::from_sql(raw)?)
            }
            AttributeType::Epoch => AttributeValue::Datetime(StorageDatetime::from_epoch(raw)?),
            AttributeType::Array => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Ok(AttributeValue::Array(Vec::new()));
                }
                match serde_json::from_str::<JsonValue>(trimmed) {
                    Ok(JsonValue::Null) => AttributeValue::Array(Vec::new()),
                    Ok(JsonValue::Array(items)) => AttributeValue::Array(items),
                    Ok(_) => return Err(StorageError::decode("Failed to decode value: not a list")),
                    Err(e) => {
                        return Err(StorageError::decode(format!("Failed to decode value: {}", e)));
                    }
                }
            }
            AttributeType::Json => AttributeValue::Json(
                serde_json::from_str(raw)
                    .map_err(|e| StorageError::decode(format!("Failed to decode value: {}", e)))?,
            ),
        };

        Ok(value)
    }

    /// Encode a typed value into its raw storage string.
    pub fn encode(&self, value: &AttributeValue) -> Result<String, StorageError> {
        let raw = match (self, value) {
            (AttributeType::Bool | AttributeType::EnumBool, AttributeValue::Bool(b)) => {
                bool_literal(*b)
            }
            (AttributeType::Bool | AttributeType::EnumBool, AttributeValue::Int(n)) => {
                bool_literal(*n != 0)
            }
            (AttributeType::Int, AttributeValue::Int(n)) => n.to_string(),
            (AttributeType::Int, AttributeValue::Bool(b)) => bool_literal(*b),
            (AttributeType::Float, AttributeValue::Float(n)) => n.to_string(),
            (AttributeType::Float, AttributeValue::Int(n)) => n.to_string(),
            (AttributeType::String, AttributeValue::String(s)) => s.clone(),
            (AttributeType::String, AttributeValue::Int(n)) => n.to_string(),
            (AttributeType::String, AttributeValue::Float(n)) => n.to_string(),
            (AttributeType::Datetime | AttributeType::Date, AttributeValue::Datetime(dt)) => {
                dt.to_sql()
            }
            (AttributeType::Datetime | AttributeType::Date, AttributeValue::String(s)) => {
                StorageDatetime::from_sql(s)?.to_sql()
            }
            (AttributeType::Epoch, AttributeValue::Datetime(dt)) => dt.to_epoch(),
            (AttributeType::Epoch, AttributeValue::Int(n)) => n.to_string(),
            (AttributeType::Epoch, AttributeValue::String(s)) => {
                StorageDatetime::from_epoch(s)?.to_epoch()
            }
            (AttributeType::Array, AttributeValue::Array(items)) => serde_json::to_string(items)
                .map_err(|e| StorageError::invalid(format!("Failed to encode value: {}", e)))?,
            (AttributeType::Json, AttributeValue::Json(json)) => serde_json::to_string(json)
                .map_err(|e| StorageError::invalid(format!("Failed to encode value: {}", e)))?,
            (AttributeType::Json, AttributeValue::Array(items)) => serde_json::to_string(items)
                .map_err(|e| StorageError::invalid(format!("Failed to encode value: {}", e)))?,
            (ty, value) => {
                return Err(StorageError::invalid(format!(
                    "Cannot encode {} as {}",
                    value.kind(),
                    ty
                )));
            }
        };

        Ok(raw)
    }
}

fn bool_literal(b: bool) -> String {
    let literal = if b { "1" } else { "0" };
    literal.to_string()
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AttributeType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeType::ALL
            .iter()
            .copied()
            .find(|ty| ty.name() == s)
            .ok_or_else(|| StorageError::invalid(format!("Unknown attribute type '{}'", s)))
    }
}

/// String-keyed entry points, for callers holding a type name rather than
/// a resolved [`AttributeType`].
pub struct TypeCodec;

impl TypeCodec {
    /// Decode `raw` as the type named `type_name`.
    pub fn from_to(type_name: &str, raw: &str) -> Result<AttributeValue, StorageError> {
        type_name.parse::<AttributeType>()?.decode(raw)
    }

    /// Encode `value` as the type named `type_name`.
    pub fn to_string(type_name: &str, value: &AttributeValue) -> Result<String, StorageError> {
        type_name.parse::<AttributeType>()?.encode(value)
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Datetime(StorageDatetime),
    Array(Vec<JsonValue>),
    Json(JsonValue),
}

impl AttributeValue {
    pub fn kind(&self) -> &'static str {
        match self {
            AttributeValue::Null => "null",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Int(_) => "int",
            AttributeValue::Float(_) => "float",
            AttributeValue::String(_) => "string",
            AttributeValue::Datetime(_) => "datetime",
            AttributeValue::Array(_) => "array",
            AttributeValue::Json(_) => "json",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(n) => Some(*n),
            AttributeValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&StorageDatetime> {
        match self {
            AttributeValue::Datetime(dt) => Some(dt),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            AttributeValue::Json(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[JsonValue]> {
        match self {
            AttributeValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Int(n)
    }
}

impl From<i32> for AttributeValue {
    fn from(n: i32) -> Self {
        AttributeValue::Int(n.into())
    }
}

impl From<u32> for AttributeValue {
    fn from(n: u32) -> Self {
        AttributeValue::Int(n.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Float(n)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&String> for AttributeValue {
    fn from(s: &String) -> Self {
        AttributeValue::String(s.clone())
    }
}

impl From<StorageDatetime> for AttributeValue {
    fn from(dt: StorageDatetime) -> Self {
        AttributeValue::Datetime(dt)
    }
}

impl From<JsonValue> for AttributeValue {
    fn from(json: JsonValue) -> Self {
        AttributeValue::Json(json)
    }
}

impl From<Vec<JsonValue>> for AttributeValue {
    fn from(items: Vec<JsonValue>) -> Self {
        AttributeValue::Array(items)
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttributeValue::Null)
    }
}

/// Conversion from a decoded attribute value into a Rust field type.
pub trait FromAttribute: Sized {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError>;
}

fn mismatch(expected: &str, value: &AttributeValue) -> StorageError {
    StorageError::decode(format!("Expected {}, found {}", expected, value.kind()))
}

impl FromAttribute for bool {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        value.as_bool().ok_or_else(|| mismatch("bool", &value))
    }
}

impl FromAttribute for i64 {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        value.as_int().ok_or_else(|| mismatch("int", &value))
    }
}

impl FromAttribute for i32 {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        let n = value.as_int().ok_or_else(|| mismatch("int", &value))?;
        i32::try_from(n).map_err(|e| StorageError::decode(format!("{} out of range: {}", n, e)))
    }
}

impl FromAttribute for u32 {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        let n = value.as_int().ok_or_else(|| mismatch("int", &value))?;
        u32::try_from(n).map_err(|e| StorageError::decode(format!("{} out of range: {}", n, e)))
    }
}

impl FromAttribute for f64 {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        value.as_float().ok_or_else(|| mismatch("float", &value))
    }
}

impl FromAttribute for String {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        match value {
            AttributeValue::String(s) => Ok(s),
            other => Err(mismatch("string", &other)),
        }
    }
}

impl FromAttribute for StorageDatetime {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        value
            .as_datetime()
            .copied()
            .ok_or_else(|| mismatch("datetime", &value))
    }
}

impl FromAttribute for JsonValue {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        match value {
            AttributeValue::Json(json) => Ok(json),
            AttributeValue::Array(items) => Ok(JsonValue::Array(items)),
            other => Err(mismatch("json", &other)),
        }
    }
}

impl FromAttribute for Vec<JsonValue> {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        match value {
            AttributeValue::Array(items) => Ok(items),
            other => Err(mismatch("array", &other)),
        }
    }
}

impl<T: FromAttribute> FromAttribute for Option<T> {
    fn from_attribute(value: AttributeValue) -> Result<Self, StorageError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_attribute(value).map(Some)
        }
    }
}
