//! Destination side of the transfer: the archive's upload area
//!
//! The orchestrator only depends on the [`DestinationWriter`] trait;
//! [`FtpsDestination`] is the production implementation speaking explicit FTPS.

mod ftp;
mod ftps;

pub use ftps::{FtpsDestination, SessionState};

use crate::error::Result;
use crate::types::RemoteObjectRef;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Per-block callback of an upload, called with each transmitted block
pub type OnBlock<'a> = dyn FnMut(&[u8]) + Send + 'a;

/// Write operations on the destination, over a single persistent session
///
/// Every operation takes `&mut self`: a destination is driven by one task and
/// never has more than one operation in flight.
#[async_trait]
pub trait DestinationWriter: Send {
    /// Make sure an authenticated session exists, reconnecting if needed
    ///
    /// Idempotent. Every other operation calls this first.
    async fn ensure_session(&mut self) -> Result<()>;

    /// List the objects (name and size) in the working directory
    async fn list(&mut self) -> Result<Vec<RemoteObjectRef>>;

    /// Store `stream` under `name` and return the MD5 hex digest of the bytes sent
    ///
    /// `on_block` is invoked once per transmitted block, before the block is
    /// added to the digest. A failed or interrupted upload may leave a partial
    /// object behind.
    async fn upload(
        &mut self,
        name: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        on_block: &mut OnBlock<'_>,
        block_size: usize,
    ) -> Result<String>;

    /// Remove `name`; an object that does not exist counts as removed
    async fn delete(&mut self, name: &str) -> Result<()>;

    /// Size of `name`, or `None` when it does not exist
    async fn size(&mut self, name: &str) -> Result<Option<u64>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Copy `reader` into `writer` in blocks of `block_size` bytes
///
/// Blocks are filled completely except for the last one. Returns the MD5 hex
/// digest of everything written and the byte count.
pub(crate) async fn copy_blocks<R, W>(
    reader: &mut R,
    writer: &mut W,
    block_size: usize,
    on_block: &mut OnBlock<'_>,
) -> std::io::Result<(String, u64)>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut digest = md5::Context::new();
    let mut block = vec![0u8; block_size.max(1)];
    let mut total = 0u64;

    loop {
        let mut filled = 0;
        while filled < block.len() {
            let n = reader.read(&mut block[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }

        let data = &block[..filled];
        on_block(data);
        digest.consume(data);
        writer.write_all(data).await?;
        total += filled as u64;

        if filled < block.len() {
            break;
        }
    }

    writer.flush().await?;
    Ok((format!("{:x}", digest.compute()), total))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocks_are_full_except_the_last() {
        let mut reader: &[u8] = b"0123456789";
        let mut sink = Vec::new();
        let mut blocks = Vec::new();
        let (digest, total) = copy_blocks(&mut reader, &mut sink, 4, &mut |b: &[u8]| {
            blocks.push(b.len())
        })
        .await
        .unwrap();

        assert_eq!(blocks, vec![4, 4, 2]);
        assert_eq!(total, 10);
        assert_eq!(sink, b"0123456789");
        assert_eq!(digest, format!("{:x}", md5::compute(b"0123456789")));
    }

    #[tokio::test]
    async fn empty_input_has_the_empty_digest() {
        let mut reader: &[u8] = b"";
        let mut sink = Vec::new();
        let mut calls = 0;
        let (digest, total) = copy_blocks(&mut reader, &mut sink, 8, &mut |_: &[u8]| calls += 1)
            .await
            .unwrap();

        assert_eq!(digest, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(total, 0);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn exact_multiple_of_block_size() {
        let mut reader: &[u8] = b"abcdefgh";
        let mut sink = Vec::new();
        let mut blocks = 0;
        let (_, total) = copy_blocks(&mut reader, &mut sink, 4, &mut |_: &[u8]| blocks += 1)
            .await
            .unwrap();
        assert_eq!(blocks, 2);
        assert_eq!(total, 8);
    }
}
