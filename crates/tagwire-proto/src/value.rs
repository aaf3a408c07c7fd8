//! Typed values carried by frames

use std::fmt;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use crate::{Frame, ProtocolError, ValueKind};

/// Structured document, shipped as compact JSON text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    /// Wrap a JSON value
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Build a document from any serializable type
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, ProtocolError> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Parse document text
    pub fn from_slice(text: &[u8]) -> Result<Self, ProtocolError> {
        Ok(Self(serde_json::from_slice(text)?))
    }

    /// Print the document as compact text
    pub fn to_text(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Deserialize the document into a concrete type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(T::deserialize(&self.0)?)
    }

    /// Borrow the underlying value
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the underlying value
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value of exactly one wire type.
///
/// Decoding hands the caller an owned value; dropping it releases the buffer
/// or document, so there is nothing to free by hand.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// 32-bit signed integer
    Integer(i32),
    /// 32-bit float
    Float(f32),
    /// Raw string bytes, not necessarily UTF-8
    String(Bytes),
    /// Structured document
    Document(Document),
}

impl TypedValue {
    /// Wire type of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::Document(_) => ValueKind::Document,
        }
    }

    /// Build the frame for this value
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        Ok(match self {
            Self::Integer(v) => Frame::integer(*v),
            Self::Float(v) => Frame::float(*v),
            Self::String(bytes) => Frame::string(bytes.clone())?,
            Self::Document(doc) => Frame::document_text(doc.to_text()?)?,
        })
    }

    /// Encode this value as a complete frame
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        Ok(self.to_frame()?.encode())
    }

    /// Integer content, if this is an integer
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Float content, if this is a float
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw string bytes, if this is a string
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::String(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// String content as UTF-8, if this is a valid UTF-8 string
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Document content, if this is a document
    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(doc) => Some(doc),
            _ => None,
        }
    }
}

impl TryFrom<Frame> for TypedValue {
    type Error = ProtocolError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        Ok(match frame.kind() {
            ValueKind::Integer => Self::Integer(frame.decode_integer()?),
            ValueKind::Float => Self::Float(frame.decode_float()?),
            ValueKind::String => Self::String(frame.into_payload()),
            ValueKind::Document => Self::Document(frame.decode_document()?),
        })
    }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self {
        Self::Integer(v)
    }
}

impl From<f32> for TypedValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        Self::String(Bytes::copy_from_slice(v.as_bytes()))
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        Self::String(Bytes::from(v))
    }
}

impl From<Bytes> for TypedValue {
    fn from(v: Bytes) -> Self {
        Self::String(v)
    }
}

impl From<Document> for TypedValue {
    fn from(v: Document) -> Self {
        Self::Document(v)
    }
}

impl From<Value> for TypedValue {
    fn from(v: Value) -> Self {
        Self::Document(Document::new(v))
    }
}
