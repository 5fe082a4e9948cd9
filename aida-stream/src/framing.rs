//! Length-prefixed framing for async byte streams.
//!
//! Each frame is a 4-byte little-endian payload length followed by one
//! encoded field buffer; one frame carries exactly one message. The framing
//! is generic over the stream type, so the same code serves TCP sockets,
//! Unix domain sockets, and in-process duplex pipes.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use aida_session::MessageTransport;
use aida_wire::FieldBuffer;

const FRAME_LEN_PREFIX_SIZE: usize = 4;

/// Upper bound on a single frame's payload. A length prefix beyond this is
/// treated as stream corruption rather than an allocation request.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const RECV_BUF_COMPACT_THRESHOLD: usize = 64 * 1024;

fn compact_recv_buffer(buf: &mut Vec<u8>, unread_start: &mut usize) {
    if *unread_start == buf.len() {
        buf.clear();
        *unread_start = 0;
        return;
    }

    if *unread_start >= RECV_BUF_COMPACT_THRESHOLD && *unread_start >= buf.len() / 2 {
        buf.drain(..*unread_start);
        *unread_start = 0;
    }
}

fn try_decode_one_from_buffer(
    buf: &mut Vec<u8>,
    unread_start: &mut usize,
) -> io::Result<Option<FieldBuffer>> {
    let unread = &buf[*unread_start..];
    if unread.len() < FRAME_LEN_PREFIX_SIZE {
        return Ok(None);
    }

    let frame_len = u32::from_le_bytes([unread[0], unread[1], unread[2], unread[3]]) as usize;
    if frame_len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {frame_len} exceeds limit"),
        ));
    }
    let frame_end = *unread_start + FRAME_LEN_PREFIX_SIZE + frame_len;
    if frame_end > buf.len() {
        return Ok(None);
    }

    let frame_start = *unread_start + FRAME_LEN_PREFIX_SIZE;
    let msg = FieldBuffer::from_bytes(&buf[frame_start..frame_end])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    *unread_start = frame_end;
    compact_recv_buffer(buf, unread_start);
    Ok(Some(msg))
}

/// A length-prefixed framed connection over any async byte stream.
pub struct FramedStream<S> {
    stream: S,
    buf: Vec<u8>,
    unread_start: usize,
    // Reused across sends to avoid reallocating per message.
    encode_buf: Vec<u8>,
}

impl<S> FramedStream<S> {
    /// Wrap an async stream in message framing.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::new(),
            unread_start: 0,
            encode_buf: Vec::with_capacity(1024),
        }
    }

    /// Get a reference to the underlying stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Consume the framing and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send one message as a single frame.
    pub async fn send(&mut self, msg: &FieldBuffer) -> io::Result<()> {
        self.encode_buf.clear();
        self.encode_buf.extend_from_slice(&[0u8; FRAME_LEN_PREFIX_SIZE]);
        let payload = msg.to_bytes();
        let frame_len = u32::try_from(payload.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "message too large for u32 length prefix",
            )
        })?;
        self.encode_buf[..FRAME_LEN_PREFIX_SIZE].copy_from_slice(&frame_len.to_le_bytes());
        self.encode_buf.extend_from_slice(&payload);

        trace!(len = payload.len(), "frame out");
        self.stream.write_all(&self.encode_buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive the next message, or `None` when the peer closed the stream
    /// on a frame boundary.
    ///
    /// Cancellation-safe: partially read frames stay in the internal buffer
    /// and the next call resumes where this one left off.
    pub async fn recv(&mut self) -> io::Result<Option<FieldBuffer>> {
        loop {
            if let Some(msg) = try_decode_one_from_buffer(&mut self.buf, &mut self.unread_start)? {
                trace!(values = msg.len(), "frame in");
                return Ok(Some(msg));
            }

            let mut tmp = [0u8; 4096];
            let n = self.stream.read(&mut tmp).await?;
            if n == 0 {
                let trailing = self.buf.len().saturating_sub(self.unread_start);
                if trailing != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("eof with {trailing} trailing bytes and no complete frame"),
                    ));
                }
                return Ok(None);
            }
            compact_recv_buffer(&mut self.buf, &mut self.unread_start);
            self.buf.extend_from_slice(&tmp[..n]);
        }
    }
}

impl<S> MessageTransport for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: &FieldBuffer) -> io::Result<()> {
        FramedStream::send(self, msg).await
    }

    async fn recv(&mut self) -> io::Result<Option<FieldBuffer>> {
        FramedStream::recv(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aida_wire::{ConnectionId, MessageKind, TypeHash, Value};

    fn sample(serial: u64) -> FieldBuffer {
        let mut fb = FieldBuffer::new_message(
            MessageKind::Call,
            serial,
            ConnectionId::ANY,
            TypeHash::new(1, 2),
            1,
        );
        fb.add(Value::String(format!("payload {serial}")));
        fb
    }

    #[tokio::test]
    async fn frames_round_trip_over_duplex() {
        let (a, b) = tokio::io::duplex(256);
        let mut tx = FramedStream::new(a);
        let mut rx = FramedStream::new(b);

        for serial in 1..=5u64 {
            tx.send(&sample(serial)).await.unwrap();
        }
        for serial in 1..=5u64 {
            let msg = rx.recv().await.unwrap().unwrap();
            assert_eq!(msg, sample(serial));
        }
    }

    #[tokio::test]
    async fn clean_close_on_frame_boundary_is_none() {
        let (a, b) = tokio::io::duplex(256);
        let mut tx = FramedStream::new(a);
        let mut rx = FramedStream::new(b);

        tx.send(&sample(1)).await.unwrap();
        drop(tx);

        assert!(rx.recv().await.unwrap().is_some());
        assert!(rx.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_an_error() {
        let (a, b) = tokio::io::duplex(256);
        let mut rx = FramedStream::new(b);

        // A length prefix promising more bytes than ever arrive.
        let mut half_frame = 1000u32.to_le_bytes().to_vec();
        half_frame.extend_from_slice(&[1, 2, 3]);
        {
            let mut stream = a;
            stream.write_all(&half_frame).await.unwrap();
        }

        let err = rx.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut a, b) = tokio::io::duplex(256);
        let mut rx = FramedStream::new(b);

        a.write_all(&u32::MAX.to_le_bytes()).await.unwrap();
        let err = rx.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn garbage_payload_is_invalid_data() {
        let (mut a, b) = tokio::io::duplex(256);
        let mut rx = FramedStream::new(b);

        let payload = [0x7f, 0x7f, 0x7f];
        a.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
        a.write_all(&payload).await.unwrap();

        let err = rx.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
