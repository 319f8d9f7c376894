//! Tunnels a TLS handshake through TDS PRELOGIN packets (§4.1's key algorithm).
//!
//! Original approach from tiberius: https://github.com/prisma/tiberius/blob/main/src/client/tls.rs
//!
//! During PRELOGIN, every byte exchanged — handshake included — must still be wrapped in TDS
//! packet headers. Standard TLS libraries expect a raw byte stream, so this wrapper interposes
//! between the connector and the real socket: while a handshake is pending it strips inbound
//! packet headers and batches outbound writes into a single PRELOGIN packet (splitting further
//! only if the batched bytes exceed the negotiated packet size). Once the handshake completes,
//! it becomes a transparent passthrough.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::io::Decode;
use crate::protocol::packet::{write_packets, PacketHeader, PacketType};

const HEADER_BYTES: usize = 8;

pub(crate) struct TlsPreloginWrapper<S> {
    stream: S,
    pending_handshake: bool,

    header_buf: [u8; HEADER_BYTES],
    header_pos: usize,
    read_remaining: usize,

    wr_buf: Vec<u8>,
    header_written: bool,
}

impl<S> TlsPreloginWrapper<S> {
    pub(crate) fn new(stream: S) -> Self {
        TlsPreloginWrapper {
            stream,
            pending_handshake: false,
            header_buf: [0u8; HEADER_BYTES],
            header_pos: 0,
            read_remaining: 0,
            wr_buf: Vec::new(),
            header_written: false,
        }
    }

    pub(crate) fn start_handshake(&mut self) {
        log::trace!("TLS handshake starting");
        self.pending_handshake = true;
    }

    pub(crate) fn handshake_complete(&mut self) {
        log::trace!("TLS handshake complete");
        self.pending_handshake = false;
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncRead for TlsPreloginWrapper<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.pending_handshake {
            let inner = self.get_mut();
            return Pin::new(&mut inner.stream).poll_read(cx, buf);
        }

        let inner = self.get_mut();

        if !inner.header_buf[inner.header_pos..].is_empty() {
            while !inner.header_buf[inner.header_pos..].is_empty() {
                let mut header_buf = ReadBuf::new(&mut inner.header_buf[inner.header_pos..]);
                ready!(Pin::new(&mut inner.stream).poll_read(cx, &mut header_buf))?;

                let read = header_buf.filled().len();
                if read == 0 {
                    return Poll::Ready(Ok(()));
                }

                inner.header_pos += read;
            }

            let header: PacketHeader =
                Decode::decode(Bytes::copy_from_slice(&inner.header_buf))
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

            inner.read_remaining = usize::from(header.length) - HEADER_BYTES;

            log::trace!(
                "discarding PRELOGIN header ({:?}), reading {} bytes of handshake",
                header,
                inner.read_remaining,
            );
        }

        let max_read = std::cmp::min(inner.read_remaining, buf.remaining());
        let mut limited_buf = buf.take(max_read);

        ready!(Pin::new(&mut inner.stream).poll_read(cx, &mut limited_buf))?;

        let read = limited_buf.filled().len();
        buf.advance(read);
        inner.read_remaining -= read;

        if inner.read_remaining == 0 {
            inner.header_pos = 0;
        }

        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncWrite for TlsPreloginWrapper<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let inner = self.get_mut();

        if !inner.pending_handshake {
            return Pin::new(&mut inner.stream).poll_write(cx, buf);
        }

        // Packet framing happens in `poll_flush`; just accumulate for now.
        inner.wr_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let inner = self.get_mut();

        if inner.pending_handshake {
            if !inner.header_written {
                let buf = std::mem::take(&mut inner.wr_buf);
                write_packets(&mut inner.wr_buf, 4096, PacketType::PreLogin, buf.as_slice());
                inner.header_written = true;
            }

            while !inner.wr_buf.is_empty() {
                log::trace!("writing {} bytes of tunneled TLS handshake", inner.wr_buf.len());
                let written = ready!(Pin::new(&mut inner.stream).poll_write(cx, &inner.wr_buf))?;
                inner.wr_buf.drain(..written);
            }

            inner.header_written = false;
        }

        Pin::new(&mut inner.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let inner = self.get_mut();
        Pin::new(&mut inner.stream).poll_shutdown(cx)
    }
}

impl<S> std::ops::Deref for TlsPreloginWrapper<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl<S> std::ops::DerefMut for TlsPreloginWrapper<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stream
    }
}
