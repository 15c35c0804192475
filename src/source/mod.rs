//! Source side of the transfer: listing and streaming objects from remote storage
//!
//! The orchestrator only depends on the [`SourceReader`] trait; [`WebDavSource`]
//! is the production implementation.

mod propfind;
mod webdav;

pub use propfind::parse_multistatus;
pub use webdav::WebDavSource;

use crate::error::Result;
use crate::types::RemoteObjectRef;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Readable byte stream for one source object
pub type ObjectStream = Box<dyn AsyncRead + Unpin + Send>;

/// Read operations on the source storage
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// List the objects (name and size) directly inside `dir`
    ///
    /// Implementations must retry transient failures with bounded exponential
    /// backoff; errors returned from here are considered final.
    async fn list(&self, dir: &str) -> Result<Vec<RemoteObjectRef>>;

    /// Open an object as a stream buffered to `chunk_size * buffer_factor` bytes
    async fn open(
        &self,
        dir: &str,
        name: &str,
        chunk_size: usize,
        buffer_factor: usize,
    ) -> Result<ObjectStream>;

    /// Read a small object (such as a checksum sidecar) fully into memory
    async fn read_to_bytes(&self, dir: &str, name: &str) -> Result<Vec<u8>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
