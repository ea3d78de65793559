//! Record-and-replay reader
//!
//! [`Rewind`] is the reconstructed client stream: a replay prefix followed by
//! the underlying source. [`Rewind::peek`] hands out a [`Peek`] recorder that
//! reads through the `Rewind` and keeps a copy of every byte it returns. When
//! the `Peek` goes away, on success or on any error path, the recorded bytes
//! are pushed back in front of whatever prefix was still unread, so the next
//! reader sees the stream exactly as if nothing had been consumed.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A reader that replays a buffered prefix before reading from `inner`.
#[derive(Debug)]
pub struct Rewind<T> {
    pre: Option<Bytes>,
    inner: T,
}

impl<T> Rewind<T> {
    pub fn new(inner: T) -> Self {
        Self { pre: None, inner }
    }

    /// Build a reader that yields `pre` first, then `inner`.
    pub fn new_buffered(inner: T, pre: Bytes) -> Self {
        Self {
            pre: if pre.is_empty() { None } else { Some(pre) },
            inner,
        }
    }

    /// Start recording reads. Everything read through the returned [`Peek`]
    /// is replayed by this `Rewind` once the `Peek` is dropped.
    pub fn peek(&mut self) -> Peek<'_, T> {
        Peek {
            rewind: self,
            recorded: BytesMut::new(),
        }
    }

    /// Number of bytes waiting to be replayed.
    pub fn buffered(&self) -> usize {
        self.pre.as_ref().map_or(0, Bytes::len)
    }

    /// Split into the unread replay prefix and the underlying source.
    pub fn into_parts(self) -> (Bytes, T) {
        (self.pre.unwrap_or_default(), self.inner)
    }

    fn unread(&mut self, mut recorded: BytesMut) {
        if recorded.is_empty() {
            return;
        }
        if let Some(rest) = self.pre.take() {
            recorded.extend_from_slice(&rest);
        }
        self.pre = Some(recorded.freeze());
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Rewind<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(mut pre) = self.pre.take() {
            if !pre.is_empty() {
                let n = pre.len().min(buf.remaining());
                buf.put_slice(&pre[..n]);
                pre.advance(n);
                if !pre.is_empty() {
                    self.pre = Some(pre);
                }
                return Poll::Ready(Ok(()));
            }
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Rewind<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Recording view over a [`Rewind`]; see [`Rewind::peek`].
#[derive(Debug)]
pub struct Peek<'a, T> {
    rewind: &'a mut Rewind<T>,
    recorded: BytesMut,
}

impl<T> Peek<'_, T> {
    /// Bytes consumed (and recorded) through this peek so far.
    pub fn consumed(&self) -> usize {
        self.recorded.len()
    }

    /// End the peek and return how many bytes will be replayed.
    pub fn rewind(self) -> usize {
        self.consumed()
    }
}

impl<T> Drop for Peek<'_, T> {
    fn drop(&mut self) {
        let recorded = self.recorded.split();
        self.rewind.unread(recorded);
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Peek<'_, T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut *this.rewind).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                this.recorded.extend_from_slice(&buf.filled()[before..]);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Read-only view of a byte source.
///
/// Parsers get a `ReadOnly` so they can consume client bytes without any way
/// to talk back on the real connection: writes fail with `BrokenPipe`, while
/// flush and shutdown do nothing.
#[derive(Debug)]
pub struct ReadOnly<R>(R);

impl<R> ReadOnly<R> {
    pub fn new(reader: R) -> Self {
        Self(reader)
    }

    pub fn into_inner(self) -> R {
        self.0
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ReadOnly<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl<R: Unpin> AsyncWrite for ReadOnly<R> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "write on read-only stream",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
