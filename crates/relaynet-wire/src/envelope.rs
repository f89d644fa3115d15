//! Message envelopes and stream framing.
//!
//! An envelope is a 2-byte big-endian [`TypeHandle`] followed by the payload.
//! The registry decides who writes the payload: the shape's own
//! [`BinaryMessage`](crate::message::BinaryMessage) impl or the suite.
//!
//! On a stream every envelope travels in one frame: a 4-byte big-endian
//! length header, then the envelope bytes.

use crate::error::{WireError, WireResult};
use crate::message::Message;
use crate::registry::{TypeHandle, TypeRegistry};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the frame length header.
pub const FRAME_HEADER_SIZE: usize = 4;

/// A decoded (or about-to-be-encoded) message tagged with its handle.
pub struct Envelope {
    handle: TypeHandle,
    type_name: &'static str,
    message: Box<dyn Message>,
}

impl Envelope {
    /// Wrap `msg`, failing if its type is not registered.
    pub fn construct<M: Message>(registry: &TypeRegistry, msg: M) -> WireResult<Self> {
        let info = registry
            .handle_of::<M>()
            .and_then(|h| registry.resolve(h))
            .ok_or_else(|| WireError::UnregisteredType(std::any::type_name::<M>().to_string()))?;
        Ok(Self {
            handle: info.handle,
            type_name: info.name,
            message: Box::new(msg),
        })
    }

    /// Parse an envelope from bytes.
    pub fn decode(registry: &TypeRegistry, data: &[u8]) -> WireResult<Self> {
        decode_envelope(registry, data)
    }

    /// Serialize to envelope bytes (no frame header).
    pub fn encode(&self, registry: &TypeRegistry) -> WireResult<Vec<u8>> {
        encode_message(registry, self.message())
    }

    pub fn handle(&self) -> TypeHandle {
        self.handle
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn message(&self) -> &dyn Message {
        &*self.message
    }

    pub fn is<T: Message>(&self) -> bool {
        (*self.message).as_any().is::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        (*self.message).as_any().downcast_ref::<T>()
    }

    /// Take the payload out as `T`, or get the envelope back untouched.
    pub fn downcast<T: Message>(self) -> Result<T, Envelope> {
        if !self.is::<T>() {
            return Err(self);
        }
        match self.message.into_any().downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => unreachable!("type checked above"),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("handle", &self.handle)
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .finish()
    }
}

/// Encode `msg` as `[handle][payload]`.
pub fn encode_message(registry: &TypeRegistry, msg: &dyn Message) -> WireResult<Vec<u8>> {
    let codec = registry
        .codec_for_value(msg)
        .ok_or_else(|| WireError::UnregisteredType(msg.type_name().to_string()))?;

    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&codec.info.handle.to_be_bytes());
    codec
        .encode(msg, registry.suite(), &mut buf)
        .map_err(|e| WireError::Encode {
            type_name: codec.info.name.to_string(),
            reason: e.to_string(),
        })?;
    Ok(buf)
}

/// Decode `[handle][payload]` into an [`Envelope`].
///
/// Unknown handles and payload errors are returned, never panicked on: the
/// bytes may come from a peer that is out of sync with this registry.
pub fn decode_envelope(registry: &TypeRegistry, data: &[u8]) -> WireResult<Envelope> {
    if data.len() < TypeHandle::WIRE_SIZE {
        return Err(WireError::MalformedEnvelope(format!(
            "need {} bytes for the type handle, got {}",
            TypeHandle::WIRE_SIZE,
            data.len()
        )));
    }
    let raw = u16::from_be_bytes([data[0], data[1]]);
    let codec = TypeHandle::new(raw)
        .and_then(|h| registry.codec(h))
        .ok_or(WireError::UnknownType(raw))?;

    let message = codec
        .decode(&data[TypeHandle::WIRE_SIZE..], registry.suite())
        .map_err(|e| WireError::Decode {
            handle: raw,
            type_name: codec.info.name.to_string(),
            reason: e.to_string(),
        })?;

    Ok(Envelope {
        handle: codec.info.handle,
        type_name: codec.info.name,
        message,
    })
}

/// Prefix `body` with its 4-byte big-endian length.
pub fn encode_frame(body: &[u8], max: u32) -> WireResult<Vec<u8>> {
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= max)
        .ok_or(WireError::MessageTooLarge {
            size: body.len(),
            max,
        })?;
    let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + body.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(body);
    Ok(bytes)
}

/// Write a framed envelope body and flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8], max: u32) -> WireResult<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode_frame(body, max)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body.
///
/// A clean EOF before the header maps to [`WireError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R, max: u32) -> WireResult<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    if len > max {
        return Err(WireError::MessageTooLarge {
            size: len as usize,
            max,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Minimum spare capacity offered to each read.
const READ_CHUNK: usize = 8 * 1024;

/// Buffered frame reader whose [`next_frame`](FrameReader::next_frame) is
/// cancel-safe.
///
/// Bytes already pulled off the stream stay in the buffer when a pending
/// read is dropped, so the next call resumes mid-frame instead of
/// misreading payload bytes as a length header.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
    max: u32,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, max: u32) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            max,
        }
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Read the next frame body.
    ///
    /// EOF on a frame boundary maps to [`WireError::ConnectionClosed`]; EOF
    /// inside a frame is an `UnexpectedEof` I/O error.
    pub async fn next_frame(&mut self) -> WireResult<Vec<u8>> {
        loop {
            if let Some(body) = self.split_frame()? {
                return Ok(body);
            }

            let missing = self.frame_len().saturating_sub(self.buf.len());
            self.buf.reserve(missing.max(READ_CHUNK));
            if self.inner.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Err(WireError::ConnectionClosed);
                }
                return Err(WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {} bytes of a partial frame", self.buf.len()),
                )));
            }
        }
    }

    /// Total size of the frame at the head of the buffer, header included,
    /// or just the header size while the header is incomplete.
    fn frame_len(&self) -> usize {
        match self.buf.get(..FRAME_HEADER_SIZE) {
            Some(header) => {
                FRAME_HEADER_SIZE
                    + u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize
            }
            None => FRAME_HEADER_SIZE,
        }
    }

    fn split_frame(&mut self) -> WireResult<Option<Vec<u8>>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let end = self.frame_len();
        let len = end - FRAME_HEADER_SIZE;
        if len > self.max as usize {
            return Err(WireError::MessageTooLarge {
                size: len,
                max: self.max,
            });
        }
        if self.buf.len() < end {
            return Ok(None);
        }

        let body = self.buf[FRAME_HEADER_SIZE..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(body))
    }
}
