//! Frame codec for async streams and datagrams

use std::net::SocketAddr;
use crate::frame::{FrameHeader, HEADER_LEN};
use crate::{Document, Frame, ProtocolError, TypedValue, ValueKind};
use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::trace;

/// Largest payload a single UDP datagram can carry over IPv4
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Frame codec for encoding/decoding typed frames.
///
/// Every read, header included, is a read-exactly: a short transport read is
/// never taken for the end of a field.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    /// Upper bound on declared payload lengths, unbounded when `None`
    max_payload_size: Option<usize>,
}

impl FrameCodec {
    /// Create a codec without a payload bound
    pub fn new() -> Self {
        Self { max_payload_size: None }
    }

    /// Create a codec that rejects payloads above `max_payload_size`
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self {
            max_payload_size: Some(max_payload_size),
        }
    }

    /// Configured payload bound
    pub fn max_payload_size(&self) -> Option<usize> {
        self.max_payload_size
    }

    fn check_size(&self, header: &FrameHeader) -> Result<(), ProtocolError> {
        match self.max_payload_size {
            Some(max) if header.len as usize > max => Err(ProtocolError::FrameTooLarge {
                size: header.len as usize,
                max,
            }),
            _ => Ok(()),
        }
    }

    /// Read a header, optionally requiring a specific type.
    ///
    /// The tag is checked before the length is read, so a type mismatch
    /// consumes a single byte and a length mismatch consumes the header only.
    async fn read_header<R>(
        &self,
        reader: &mut R,
        expected: Option<ValueKind>,
    ) -> Result<FrameHeader, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let tag = reader.read_u8().await.map_err(ProtocolError::from_read)?;
        let kind = match expected {
            Some(kind) if kind.tag() != tag => {
                return Err(ProtocolError::TypeMismatch { expected: kind, found: tag });
            }
            Some(kind) => kind,
            None => ValueKind::try_from(tag)?,
        };
        let len = reader.read_u32().await.map_err(ProtocolError::from_read)?;
        let header = FrameHeader::validated(kind, len)?;
        self.check_size(&header)?;
        Ok(header)
    }

    async fn read_payload<R>(&self, reader: &mut R, len: u32) -> Result<Bytes, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        // Grow with the data actually received instead of trusting the
        // declared length for the allocation.
        let mut payload = Vec::with_capacity((len as usize).min(8192));
        let read = (&mut *reader)
            .take(u64::from(len))
            .read_to_end(&mut payload)
            .await
            .map_err(ProtocolError::from_read)?;
        if read < len as usize {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(Bytes::from(payload))
    }

    /// Read exactly one frame of any type from an async reader
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Frame, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let header = self.read_header(reader, None).await?;
        let payload = self.read_payload(reader, header.len).await?;
        trace!(kind = %header.kind, len = header.len, "Read frame");
        Frame::new(header.kind, payload)
    }

    /// Read exactly one frame that must carry the given type
    pub async fn read_frame_of<R>(&self, reader: &mut R, kind: ValueKind) -> Result<Frame, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let header = self.read_header(reader, Some(kind)).await?;
        let payload = self.read_payload(reader, header.len).await?;
        Frame::new(header.kind, payload)
    }

    /// Read one frame of any type and decode it
    pub async fn read_value<R>(&self, reader: &mut R) -> Result<TypedValue, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        TypedValue::try_from(self.read_frame(reader).await?)
    }

    /// Write a frame to an async writer
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<usize, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = frame.encode();
        writer.write_all(&encoded).await.map_err(ProtocolError::from_write)?;
        writer.flush().await.map_err(ProtocolError::from_write)?;
        trace!(kind = %frame.kind(), len = frame.payload_size(), "Wrote frame");
        Ok(encoded.len())
    }

    /// Encode a value and write it to an async writer
    pub async fn write_value<W>(&self, writer: &mut W, value: &TypedValue) -> Result<usize, ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = value.to_frame()?;
        self.write_frame(writer, &frame).await
    }

    /// Decode one frame from the front of a buffer.
    ///
    /// Returns the frame and the number of bytes it occupied. A buffer that
    /// ends before the declared frame does is reported as closed.
    pub fn decode_slice(&self, buf: &[u8]) -> Result<(Frame, usize), ProtocolError> {
        let raw: &[u8; HEADER_LEN] = buf
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(ProtocolError::ConnectionClosed)?;
        let header = FrameHeader::parse(raw)?;
        self.check_size(&header)?;

        let mut rest = &buf[HEADER_LEN..];
        let len = header.len as usize;
        if rest.len() < len {
            return Err(ProtocolError::ConnectionClosed);
        }
        let payload = rest.copy_to_bytes(len);
        Ok((Frame::new(header.kind, payload)?, HEADER_LEN + len))
    }

    /// Send a value as a single datagram to `peer`
    pub async fn send_value_to(
        &self,
        socket: &UdpSocket,
        peer: SocketAddr,
        value: &TypedValue,
    ) -> Result<usize, ProtocolError> {
        let encoded = value.encode()?;
        socket
            .send_to(&encoded, peer)
            .await
            .map_err(ProtocolError::from_write)
    }

    /// Receive one datagram and decode the frame it carries
    pub async fn recv_value_from(
        &self,
        socket: &UdpSocket,
    ) -> Result<(TypedValue, SocketAddr), ProtocolError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (n, from) = socket
            .recv_from(&mut buf)
            .await
            .map_err(ProtocolError::ReceiveFailure)?;
        let (frame, used) = self.decode_slice(&buf[..n])?;
        if used < n {
            trace!(peer = %from, ignored = n - used, "Trailing datagram bytes ignored");
        }
        Ok((TypedValue::try_from(frame)?, from))
    }
}

/// Encode an integer frame
pub fn encode_integer(value: i32) -> Bytes {
    Frame::integer(value).encode()
}

/// Encode a float frame
pub fn encode_float(value: f32) -> Bytes {
    Frame::float(value).encode()
}

/// Encode a string frame
pub fn encode_string(value: &[u8]) -> Result<Bytes, ProtocolError> {
    Ok(Frame::string(Bytes::copy_from_slice(value))?.encode())
}

/// Encode a document frame
pub fn encode_document(doc: &Document) -> Result<Bytes, ProtocolError> {
    Ok(Frame::document_text(doc.to_text()?)?.encode())
}

/// Write an integer frame
pub async fn send_integer<W: AsyncWrite + Unpin>(writer: &mut W, value: i32) -> Result<usize, ProtocolError> {
    FrameCodec::new().write_frame(writer, &Frame::integer(value)).await
}

/// Write a float frame
pub async fn send_float<W: AsyncWrite + Unpin>(writer: &mut W, value: f32) -> Result<usize, ProtocolError> {
    FrameCodec::new().write_frame(writer, &Frame::float(value)).await
}

/// Write a string frame
pub async fn send_string<W: AsyncWrite + Unpin>(writer: &mut W, value: &[u8]) -> Result<usize, ProtocolError> {
    FrameCodec::new()
        .write_frame(writer, &Frame::string(Bytes::copy_from_slice(value))?)
        .await
}

/// Write a document frame
pub async fn send_document<W: AsyncWrite + Unpin>(writer: &mut W, doc: &Document) -> Result<usize, ProtocolError> {
    FrameCodec::new()
        .write_frame(writer, &Frame::document_text(doc.to_text()?)?)
        .await
}

/// Write any typed value
pub async fn send_value<W: AsyncWrite + Unpin>(writer: &mut W, value: &TypedValue) -> Result<usize, ProtocolError> {
    FrameCodec::new().write_value(writer, value).await
}

/// Read an integer frame
pub async fn recv_integer<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProtocolError> {
    FrameCodec::new()
        .read_frame_of(reader, ValueKind::Integer)
        .await?
        .decode_integer()
}

/// Read a float frame
pub async fn recv_float<R: AsyncRead + Unpin>(reader: &mut R) -> Result<f32, ProtocolError> {
    FrameCodec::new()
        .read_frame_of(reader, ValueKind::Float)
        .await?
        .decode_float()
}

/// Read a string frame
pub async fn recv_string<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Bytes, ProtocolError> {
    Ok(FrameCodec::new()
        .read_frame_of(reader, ValueKind::String)
        .await?
        .into_payload())
}

/// Read a document frame
pub async fn recv_document<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Document, ProtocolError> {
    FrameCodec::new()
        .read_frame_of(reader, ValueKind::Document)
        .await?
        .decode_document()
}

/// Read a frame of whatever type comes next
pub async fn recv_any<R: AsyncRead + Unpin>(reader: &mut R) -> Result<TypedValue, ProtocolError> {
    FrameCodec::new().read_value(reader).await
}

/// Send a value as one datagram to `peer`
pub async fn send_value_to(socket: &UdpSocket, peer: SocketAddr, value: &TypedValue) -> Result<usize, ProtocolError> {
    FrameCodec::new().send_value_to(socket, peer, value).await
}

/// Receive one datagram and decode its frame
pub async fn recv_value_from(socket: &UdpSocket) -> Result<(TypedValue, SocketAddr), ProtocolError> {
    FrameCodec::new().recv_value_from(socket).await
}
