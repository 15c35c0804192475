//! Bridge from a chunked download to a pull-based reader
//!
//! HTTP bodies arrive as a stream of variable-length chunks, while the uploader
//! pulls fixed-size blocks with `read`. [`ChunkReader`] holds at most one
//! partially consumed chunk between reads and never materialises the body.

use bytes::Bytes;
use futures::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, BufReader, ReadBuf};

/// `AsyncRead` over a stream of byte chunks
///
/// End of data is reported as a zero-length read once the chunk stream is
/// exhausted. Errors from the chunk stream are returned from `poll_read`.
pub struct ChunkReader<S> {
    chunks: S,
    leftover: Option<Bytes>,
    finished: bool,
}

impl<S> ChunkReader<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    /// Wrap a chunk stream
    pub fn new(chunks: S) -> Self {
        Self {
            chunks,
            leftover: None,
            finished: false,
        }
    }

    /// Bytes of the current chunk not yet handed out
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.leftover.as_ref().map_or(0, Bytes::len)
    }
}

impl<S> AsyncRead for ChunkReader<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if let Some(chunk) = this.leftover.as_mut() {
                if !chunk.is_empty() {
                    let n = chunk.len().min(buf.remaining());
                    buf.put_slice(&chunk.split_to(n));
                    if chunk.is_empty() {
                        this.leftover = None;
                    }
                    return Poll::Ready(Ok(()));
                }
                this.leftover = None;
            }

            if this.finished {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.chunks).poll_next(cx)) {
                // Empty chunks are skipped so they are not mistaken for EOF
                Some(Ok(chunk)) => this.leftover = Some(chunk),
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => {
                    this.finished = true;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

/// Buffered reader with capacity `chunk_size * buffer_factor`
pub fn buffered<S>(chunks: S, chunk_size: usize, buffer_factor: usize) -> BufReader<ChunkReader<S>>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let capacity = chunk_size.saturating_mul(buffer_factor).max(1);
    BufReader::with_capacity(capacity, ChunkReader::new(chunks))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt};

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        let items: Vec<io::Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn short_reads_carry_over_the_rest_of_a_chunk() {
        let mut reader = ChunkReader::new(chunks(&["hello world"]));
        let mut buf = [0u8; 4];

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hell");
        assert_eq!(reader.pending(), 7);

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"o wo");

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"rld");
        assert_eq!(reader.pending(), 0);

        assert_eq!(reader.read(&mut buf).await.unwrap(), 0, "EOF is a zero read");
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0, "EOF is sticky");
    }

    #[tokio::test]
    async fn a_read_never_spans_two_chunks() {
        let mut reader = ChunkReader::new(chunks(&["ab", "cdef"]));
        let mut buf = [0u8; 16];

        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ab");
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"cdef");
    }

    #[tokio::test]
    async fn empty_chunks_are_not_end_of_data() {
        let mut reader = ChunkReader::new(chunks(&["", "", "xyz", ""]));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"xyz");
    }

    #[tokio::test]
    async fn empty_stream_reads_zero_bytes() {
        let mut reader = ChunkReader::new(chunks(&[]));
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stream_errors_surface_from_read() {
        let parts = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut reader = ChunkReader::new(parts);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(out, b"partial");
    }

    #[tokio::test]
    async fn buffered_reader_reads_ahead_chunk_size_times_factor() {
        let mut reader = buffered(chunks(&["0123456789abcdef0123"]), 4, 2);

        let filled = reader.fill_buf().await.unwrap();
        assert_eq!(filled, b"01234567");
        assert_eq!(reader.get_ref().pending(), 12);

        reader.consume(8);
        let filled = reader.fill_buf().await.unwrap();
        assert_eq!(filled, b"89abcdef");
        assert_eq!(reader.get_ref().pending(), 4);
    }

    #[tokio::test]
    async fn buffered_reader_reassembles_the_body() {
        let mut reader = buffered(chunks(&["0123", "45", "6789abcdef"]), 4, 2);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"0123456789abcdef");
    }
}
