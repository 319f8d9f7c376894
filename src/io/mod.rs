//! Buffered, typed I/O over an async byte stream.
//!
//! This is the base the packet reader/writer (`protocol::packet`) is built on. It owns exactly
//! one read buffer and one write buffer so that a packet payload can be decoded without extra
//! copies once it has been fully buffered, and so that an outbound message can be assembled
//! across several `write_*` calls before a single `flush()` puts it on the wire.

use bytes::{Buf, Bytes, BytesMut};
use std::ops::{Deref, DerefMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Decodes a self-contained wire value out of an owned buffer.
///
/// Used for values that are decoded once from a buffer they fully own (packet headers,
/// PRELOGIN payloads, TYPE_INFO structures) as opposed to token-stream items that are decoded
/// in place out of a shared cursor (see the `get(buf: &mut Bytes)` convention used throughout
/// `protocol::message` and friends).
pub trait Decode<'de>: Sized {
    fn decode(buf: Bytes) -> Result<Self> {
        Self::decode_with(buf, ())
    }

    fn decode_with(buf: Bytes, context: ()) -> Result<Self>;
}

/// Encodes a wire value into an output buffer. `Context` lets a handful of types (e.g. a
/// parameter value that needs to know its target SQL type) encode differently depending on
/// caller-supplied state without a second trait.
pub trait Encode<'en, Context = ()> {
    fn encode(&self, buf: &mut Vec<u8>)
    where
        Context: Default,
    {
        self.encode_with(buf, Context::default())
    }

    fn encode_with(&self, buf: &mut Vec<u8>, context: Context);
}

impl Encode<'_> for &[u8] {
    fn encode_with(&self, buf: &mut Vec<u8>, _: ()) {
        buf.extend_from_slice(self);
    }
}

/// A buffered reader/writer over an async transport, with no TDS-specific knowledge — the
/// packet layer built on top is what understands packet headers and message framing.
///
/// Consumed bytes aren't dropped from `rbuf` immediately; `pos` tracks how far the cursor has
/// advanced into it. This lets [`Self::mark`]/[`Self::reset`] rewind the cursor within whatever
/// has already been read off the wire, without re-reading from the transport. Bytes before `pos`
/// are only actually discarded (via `BytesMut::advance`) once no mark is outstanding — see
/// [`Self::reclaim`].
pub(crate) struct BufStream<S> {
    pub(crate) stream: S,
    pub(crate) wbuf: Vec<u8>,
    rbuf: BytesMut,
    pos: usize,
    mark: Option<usize>,
}

impl<S> BufStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(stream: S) -> Self {
        Self {
            stream,
            wbuf: Vec::with_capacity(4096),
            rbuf: BytesMut::with_capacity(4096),
            pos: 0,
            mark: None,
        }
    }

    /// Ensures at least `n` bytes are buffered, pulling from the stream as needed, then decodes
    /// them as `T` and advances the cursor past them.
    pub(crate) async fn read<'de, T: Decode<'de>>(&mut self, n: usize) -> Result<T> {
        self.fill(n).await?;
        let buf = Bytes::copy_from_slice(&self.rbuf[self.pos..self.pos + n]);
        self.pos += n;
        self.reclaim();
        T::decode(buf)
    }

    /// Same buffering discipline as [`Self::read`], but appends the raw bytes to `out` instead
    /// of decoding them — used to accumulate a packet's payload before the token parser runs
    /// over it.
    pub(crate) async fn read_raw_into(&mut self, out: &mut BytesMut, n: usize) -> Result<()> {
        self.fill(n).await?;
        out.extend_from_slice(&self.rbuf[self.pos..self.pos + n]);
        self.pos += n;
        self.reclaim();
        Ok(())
    }

    /// Ensures at least one byte is buffered and returns it without advancing the cursor.
    pub(crate) async fn peek_u8(&mut self) -> Result<u8> {
        self.fill(1).await?;
        Ok(self.rbuf[self.pos])
    }

    async fn fill(&mut self, n: usize) -> Result<()> {
        while self.rbuf.len() - self.pos < n {
            let mut chunk = [0u8; 4096];
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection while reading a TDS packet",
                )));
            }
            self.rbuf.extend_from_slice(&chunk[..read]);
        }
        Ok(())
    }

    /// Captures the current cursor position for a later [`Self::reset`], and disables eager
    /// reclamation of consumed bytes until [`Self::stream`] re-enables it — otherwise a later
    /// `reset` could rewind into bytes that have already been dropped from `rbuf`.
    pub(crate) fn mark(&mut self) -> usize {
        let position = self.pos;
        self.mark = Some(position);
        position
    }

    /// Rewinds the cursor to a position previously returned by [`Self::mark`].
    pub(crate) fn reset(&mut self, position: usize) {
        self.pos = position;
    }

    /// Re-enables eager reclamation of consumed bytes, discarding everything before the current
    /// cursor. Call once no earlier `mark()` will be `reset()` to again.
    pub(crate) fn stream(&mut self) {
        self.mark = None;
        self.reclaim();
    }

    /// Drops consumed-and-unmarked bytes from the front of `rbuf` so it doesn't grow unbounded
    /// over a long-lived connection. No-op while a mark is outstanding.
    fn reclaim(&mut self) {
        if self.mark.is_none() && self.pos > 0 {
            self.rbuf.advance(self.pos);
            self.pos = 0;
        }
    }

    /// Bytes already buffered from the stream without blocking, not yet consumed by the cursor.
    pub(crate) fn available(&self) -> usize {
        self.rbuf.len() - self.pos
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        if !self.wbuf.is_empty() {
            self.stream.write_all(&self.wbuf).await?;
            self.wbuf.clear();
        }
        self.stream.flush().await?;
        Ok(())
    }
}

impl<S> Deref for BufStream<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl<S> DerefMut for BufStream<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    async fn harness(bytes: &[u8]) -> BufStream<tokio::io::DuplexStream> {
        let (mut client, server) = tokio::io::duplex(4096);
        client.write_all(bytes).await.unwrap();
        drop(client);
        BufStream::new(server)
    }

    #[tokio::test]
    async fn mark_reset_replays_the_same_bytes() {
        let mut stream = harness(&[1, 2, 3, 4, 5]).await;

        let mut first = BytesMut::new();
        stream.read_raw_into(&mut first, 2).await.unwrap();
        assert_eq!(&first[..], &[1, 2]);

        let mark = stream.mark();
        let mut second = BytesMut::new();
        stream.read_raw_into(&mut second, 2).await.unwrap();
        assert_eq!(&second[..], &[3, 4]);

        stream.reset(mark);
        let mut replay = BytesMut::new();
        stream.read_raw_into(&mut replay, 2).await.unwrap();
        assert_eq!(&replay[..], &[3, 4]);

        stream.stream();
        let mut tail = BytesMut::new();
        stream.read_raw_into(&mut tail, 1).await.unwrap();
        assert_eq!(&tail[..], &[5]);
    }

    #[tokio::test]
    async fn repeated_mark_reset_is_idempotent() {
        let mut stream = harness(&[10, 20, 30]).await;

        let mark = stream.mark();
        for _ in 0..3 {
            assert_eq!(stream.peek_u8().await.unwrap(), 10);
            let mut out = BytesMut::new();
            stream.read_raw_into(&mut out, 1).await.unwrap();
            assert_eq!(&out[..], &[10]);
            stream.reset(mark);
        }
    }

    #[tokio::test]
    async fn peek_does_not_advance_the_cursor() {
        let mut stream = harness(&[42, 43]).await;

        assert_eq!(stream.peek_u8().await.unwrap(), 42);
        assert_eq!(stream.peek_u8().await.unwrap(), 42);
        assert_eq!(stream.available(), 2);

        let mut out = BytesMut::new();
        stream.read_raw_into(&mut out, 1).await.unwrap();
        assert_eq!(&out[..], &[42]);
        assert_eq!(stream.peek_u8().await.unwrap(), 43);
    }
}
