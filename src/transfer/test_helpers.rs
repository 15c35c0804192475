//! In-memory source and destination for orchestrator tests.

use crate::destination::{DestinationWriter, OnBlock, copy_blocks};
use crate::error::{Error, FtpError, Result};
use crate::source::{ObjectStream, SourceReader};
use crate::stream_adapter;
use crate::types::RemoteObjectRef;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// MD5 hex digest of `data`
pub(crate) fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[derive(Default)]
struct SourceState {
    objects: Vec<(String, Vec<u8>)>,
    broken: HashMap<String, usize>,
    listed_sizes: HashMap<String, u64>,
    opened: Vec<String>,
    sidecar_reads: Vec<String>,
}

/// Source holding objects in memory, in listing order
#[derive(Clone, Default)]
pub(crate) struct MemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add an object
    pub(crate) fn with_object(self, name: &str, data: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .objects
            .push((name.to_string(), data.to_vec()));
        self
    }

    /// Add an object followed by an `md5sum`-style sidecar with its real digest
    pub(crate) fn with_verified_object(self, name: &str, data: &[u8]) -> Self {
        let sidecar = format!("{}  {}\n", md5_hex(data), name);
        self.with_object(name, data)
            .with_object(&format!("{name}.md5"), sidecar.as_bytes())
    }

    /// Report `size` for `name` in listings instead of its real length
    pub(crate) fn with_listed_size(self, name: &str, size: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .listed_sizes
            .insert(name.to_string(), size);
        self
    }

    /// Make the stream of `name` fail with a connection reset after `bytes` bytes
    pub(crate) fn break_after(self, name: &str, bytes: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .broken
            .insert(name.to_string(), bytes);
        self
    }

    /// Objects opened as streams, in order
    pub(crate) fn opened(&self) -> Vec<String> {
        self.state.lock().unwrap().opened.clone()
    }

    /// Objects read eagerly, in order
    pub(crate) fn sidecar_reads(&self) -> Vec<String> {
        self.state.lock().unwrap().sidecar_reads.clone()
    }

    fn data(&self, name: &str) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| Error::HttpStatus {
                status: 404,
                url: format!("memory:///{name}"),
            })
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn list(&self, _dir: &str) -> Result<Vec<RemoteObjectRef>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .map(|(name, data)| {
                let size = state
                    .listed_sizes
                    .get(name)
                    .copied()
                    .unwrap_or(data.len() as u64);
                RemoteObjectRef::new(name.clone(), size)
            })
            .collect())
    }

    async fn open(
        &self,
        _dir: &str,
        name: &str,
        chunk_size: usize,
        buffer_factor: usize,
    ) -> Result<ObjectStream> {
        let data = self.data(name)?;
        let broken_at = {
            let mut state = self.state.lock().unwrap();
            state.opened.push(name.to_string());
            state.broken.get(name).copied()
        };

        let mut chunks: Vec<io::Result<Bytes>> = data
            .chunks(chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if let Some(at) = broken_at {
            let head = Bytes::copy_from_slice(&data[..at.min(data.len())]);
            chunks = vec![
                Ok(head),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer")),
            ];
        }

        Ok(Box::new(stream_adapter::buffered(
            futures::stream::iter(chunks),
            chunk_size,
            buffer_factor,
        )))
    }

    async fn read_to_bytes(&self, _dir: &str, name: &str) -> Result<Vec<u8>> {
        let data = self.data(name)?;
        self.state
            .lock()
            .unwrap()
            .sidecar_reads
            .push(name.to_string());
        Ok(data)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Default)]
struct DestinationState {
    objects: BTreeMap<String, Vec<u8>>,
    uploads: Vec<String>,
    deletes: Vec<String>,
    fail_writes_after: HashMap<String, usize>,
    broken_cleanup: bool,
    cancel_on_upload: Option<(String, CancellationToken)>,
}

/// Destination keeping objects in memory
///
/// Clones share state, so a test can keep a handle while the orchestrator owns
/// another. Every block write yields once, so a cancelled token is observed
/// mid-upload.
#[derive(Clone, Default)]
pub(crate) struct MemoryDestination {
    state: Arc<Mutex<DestinationState>>,
}

impl MemoryDestination {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an object
    pub(crate) fn with_object(self, name: &str, data: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(name.to_string(), data.to_vec());
        self
    }

    /// Fail writes to `name` once `bytes` bytes have been stored
    pub(crate) fn fail_writes_after(self, name: &str, bytes: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .fail_writes_after
            .insert(name.to_string(), bytes);
        self
    }

    /// Make `size` and `delete` fail with a dropped connection
    pub(crate) fn with_broken_cleanup(self) -> Self {
        self.state.lock().unwrap().broken_cleanup = true;
        self
    }

    /// Cancel `token` as soon as the first block of `name` is transmitted
    pub(crate) fn cancel_during_upload(self, name: &str, token: CancellationToken) -> Self {
        self.state.lock().unwrap().cancel_on_upload = Some((name.to_string(), token));
        self
    }

    pub(crate) fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(name).cloned()
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub(crate) fn uploads(&self) -> Vec<String> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub(crate) fn deletes(&self) -> Vec<String> {
        self.state.lock().unwrap().deletes.clone()
    }

    fn check_cleanup(&self) -> Result<()> {
        if self.state.lock().unwrap().broken_cleanup {
            return Err(FtpError::ConnectionClosed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationWriter for MemoryDestination {
    async fn ensure_session(&mut self) -> Result<()> {
        Ok(())
    }

    async fn list(&mut self) -> Result<Vec<RemoteObjectRef>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .iter()
            .map(|(name, data)| RemoteObjectRef::new(name.clone(), data.len() as u64))
            .collect())
    }

    async fn upload(
        &mut self,
        name: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        on_block: &mut OnBlock<'_>,
        block_size: usize,
    ) -> Result<String> {
        let (limit, cancel) = {
            let mut state = self.state.lock().unwrap();
            state.uploads.push(name.to_string());
            state.objects.insert(name.to_string(), Vec::new());
            let cancel = state
                .cancel_on_upload
                .as_ref()
                .filter(|(target, _)| target == name)
                .map(|(_, token)| token.clone());
            (state.fail_writes_after.get(name).copied(), cancel)
        };

        let mut sink = MemorySink {
            state: self.state.clone(),
            name: name.to_string(),
            limit,
            yielded: false,
        };
        let mut hook = |block: &[u8]| {
            on_block(block);
            if let Some(token) = &cancel {
                token.cancel();
            }
        };
        let (digest, _) = copy_blocks(stream, &mut sink, block_size, &mut hook).await?;
        Ok(digest)
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        self.check_cleanup()?;
        let mut state = self.state.lock().unwrap();
        state.deletes.push(name.to_string());
        state.objects.remove(name);
        Ok(())
    }

    async fn size(&mut self, name: &str) -> Result<Option<u64>> {
        self.check_cleanup()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .get(name)
            .map(|d| d.len() as u64))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Appends to the destination object, yielding once before every write
struct MemorySink {
    state: Arc<Mutex<DestinationState>>,
    name: String,
    limit: Option<usize>,
    yielded: bool,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if !self.yielded {
            self.yielded = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.yielded = false;

        let mut state = self.state.lock().unwrap();
        let object = state.objects.entry(self.name.clone()).or_default();
        if let Some(limit) = self.limit {
            if object.len() + buf.len() > limit {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "data connection dropped",
                )));
            }
        }
        object.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
