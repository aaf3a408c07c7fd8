//! Frame structure and wire tags

use std::fmt;
use serde::{Deserialize, Serialize};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::ProtocolError;

/// Size of the tag + length header
pub const HEADER_LEN: usize = 5;

/// Wire width of the fixed-size types
pub const FIXED_WIDTH: u32 = 4;

/// Type tag carried in the first byte of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueKind {
    /// 32-bit signed integer, two's complement
    Integer = 0,
    /// 32-bit IEEE-754 float
    Float = 1,
    /// Raw string bytes
    String = 2,
    /// Structured document, serialized as JSON text
    Document = 3,
}

impl ValueKind {
    /// Wire tag for this kind
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Fixed payload width, `None` for variable-length kinds
    pub fn fixed_len(self) -> Option<u32> {
        match self {
            Self::Integer | Self::Float => Some(FIXED_WIDTH),
            Self::String | Self::Document => None,
        }
    }
}

impl TryFrom<u8> for ValueKind {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::Integer),
            1 => Ok(Self::Float),
            2 => Ok(Self::String),
            3 => Ok(Self::Document),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Document => "document",
        };
        f.write_str(name)
    }
}

/// Decoded tag + length header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Type of the payload that follows
    pub kind: ValueKind,
    /// Declared payload length
    pub len: u32,
}

impl FrameHeader {
    /// Parse a header, rejecting unknown tags and bad fixed widths
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let mut buf = &raw[..];
        let kind = ValueKind::try_from(buf.get_u8())?;
        let len = buf.get_u32();
        Self::validated(kind, len)
    }

    /// Check a declared length against the width the kind requires
    pub fn validated(kind: ValueKind, len: u32) -> Result<Self, ProtocolError> {
        if let Some(expected) = kind.fixed_len() {
            if len != expected {
                return Err(ProtocolError::LengthMismatch {
                    kind,
                    expected,
                    found: len,
                });
            }
        }
        Ok(Self { kind, len })
    }

    /// Write the header in network byte order
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind.tag());
        buf.put_u32(self.len);
    }
}

/// Length field for a payload of `len` bytes
fn wire_len(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

/// Protocol frame: one tagged, length-delimited payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Payload type
    kind: ValueKind,
    /// Raw payload bytes, no terminator
    payload: Bytes,
}

impl Frame {
    /// Create a frame, enforcing the fixed width of integer and float
    pub fn new(kind: ValueKind, payload: Bytes) -> Result<Self, ProtocolError> {
        FrameHeader::validated(kind, wire_len(payload.len())?)?;
        Ok(Self { kind, payload })
    }

    /// Create an integer frame
    pub fn integer(value: i32) -> Self {
        Self {
            kind: ValueKind::Integer,
            payload: Bytes::copy_from_slice(&value.to_be_bytes()),
        }
    }

    /// Create a float frame, preserving the exact bit pattern
    pub fn float(value: f32) -> Self {
        Self {
            kind: ValueKind::Float,
            payload: Bytes::copy_from_slice(&value.to_bits().to_be_bytes()),
        }
    }

    /// Create a string frame from raw bytes
    pub fn string(value: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        Self::new(ValueKind::String, value.into())
    }

    /// Create a document frame from already-printed document text
    pub fn document_text(text: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        Self::new(ValueKind::Document, text.into())
    }

    /// Payload type
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Raw payload bytes
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Take the payload out of the frame
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Get the payload size
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Header describing this frame
    pub fn header(&self) -> FrameHeader {
        // Every constructor checked the length against u32
        FrameHeader {
            kind: self.kind,
            len: self.payload.len() as u32,
        }
    }

    /// Encode the full frame: tag, big-endian length, payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.header().put(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    fn expect(&self, kind: ValueKind) -> Result<(), ProtocolError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(ProtocolError::TypeMismatch {
                expected: kind,
                found: self.kind.tag(),
            })
        }
    }

    fn fixed_bits(&self) -> Result<u32, ProtocolError> {
        let raw: [u8; 4] = self.payload[..]
            .try_into()
            .map_err(|_| ProtocolError::LengthMismatch {
                kind: self.kind,
                expected: FIXED_WIDTH,
                found: self.payload.len() as u32,
            })?;
        Ok(u32::from_be_bytes(raw))
    }

    /// Interpret the payload as an integer
    pub fn decode_integer(&self) -> Result<i32, ProtocolError> {
        self.expect(ValueKind::Integer)?;
        Ok(self.fixed_bits()? as i32)
    }

    /// Interpret the payload as a float
    pub fn decode_float(&self) -> Result<f32, ProtocolError> {
        self.expect(ValueKind::Float)?;
        Ok(f32::from_bits(self.fixed_bits()?))
    }

    /// Interpret the payload as string bytes
    pub fn decode_string(&self) -> Result<Bytes, ProtocolError> {
        self.expect(ValueKind::String)?;
        Ok(self.payload.clone())
    }

    /// Parse the payload as a document
    pub fn decode_document(&self) -> Result<crate::Document, ProtocolError> {
        self.expect(ValueKind::Document)?;
        crate::Document::from_slice(&self.payload)
    }

    /// Interpret the payload according to the frame's own tag
    pub fn to_value(&self) -> Result<crate::TypedValue, ProtocolError> {
        crate::TypedValue::try_from(self.clone())
    }
}
