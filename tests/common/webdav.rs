//! WebDAV fixtures served by wiremock, plus a source wrapper that breaks streams

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use ena_transfer::config::RetryConfig;
use ena_transfer::source::ObjectStream;
use ena_transfer::{RemoteObjectRef, SourceConfig, SourceReader, WebDavSource, stream_adapter};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Source directory used by the fixtures
pub const RUN_DIR: &str = "/remote.php/webdav/run/";

/// MD5 hex digest of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// A data object followed by its `md5sum`-style sidecar
pub fn verified(name: &str, data: &[u8]) -> Vec<(String, Vec<u8>)> {
    vec![
        (name.to_string(), data.to_vec()),
        (
            format!("{name}.md5"),
            format!("{}  {}\n", md5_hex(data), name).into_bytes(),
        ),
    ]
}

/// Multistatus body listing `objects` inside [`RUN_DIR`]
pub fn multistatus(objects: &[(String, Vec<u8>)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\"?>\n<d:multistatus xmlns:d=\"DAV:\">\n",
    );
    xml.push_str(&format!(
        "  <d:response><d:href>{RUN_DIR}</d:href><d:propstat><d:prop>\
         <d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat></d:response>\n"
    ));
    for (name, data) in objects {
        xml.push_str(&format!(
            "  <d:response><d:href>{RUN_DIR}{name}</d:href><d:propstat><d:prop>\
             <d:getcontentlength>{}</d:getcontentlength><d:resourcetype/>\
             </d:prop></d:propstat></d:response>\n",
            data.len()
        ));
    }
    xml.push_str("</d:multistatus>\n");
    xml
}

/// Serve a listing of `objects` and a `GET` for each of them
pub async fn mount_webdav(server: &MockServer, objects: &[(String, Vec<u8>)]) {
    Mock::given(method("PROPFIND"))
        .and(path(RUN_DIR))
        .respond_with(ResponseTemplate::new(207).set_body_string(multistatus(objects)))
        .mount(server)
        .await;
    for (name, data) in objects {
        Mock::given(method("GET"))
            .and(path(format!("{RUN_DIR}{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
            .mount(server)
            .await;
    }
}

/// WebDAV source pointed at a mock server, with fast retries
pub fn webdav_source(server: &MockServer) -> WebDavSource {
    let config = SourceConfig {
        url: server.uri(),
        directory: RUN_DIR.to_string(),
        username: "account-1".to_string(),
        password: Some("token".to_string()),
        retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    };
    WebDavSource::new(&config).unwrap()
}

/// Source whose stream for one object misbehaves after `after` bytes
///
/// By default the stream fails with a connection reset; a stalling source
/// never delivers another byte instead.
pub struct BreakingSource {
    inner: Arc<dyn SourceReader>,
    object: String,
    after: usize,
    stall: bool,
}

impl BreakingSource {
    /// Wrap `inner`, breaking the stream of `object`
    pub fn new(inner: Arc<dyn SourceReader>, object: &str, after: usize) -> Self {
        Self {
            inner,
            object: object.to_string(),
            after,
            stall: false,
        }
    }

    /// Wrap `inner`, stalling the stream of `object` forever
    pub fn stalling(inner: Arc<dyn SourceReader>, object: &str, after: usize) -> Self {
        Self {
            stall: true,
            ..Self::new(inner, object, after)
        }
    }
}

#[async_trait]
impl SourceReader for BreakingSource {
    async fn list(&self, dir: &str) -> ena_transfer::Result<Vec<RemoteObjectRef>> {
        self.inner.list(dir).await
    }

    async fn open(
        &self,
        dir: &str,
        name: &str,
        chunk_size: usize,
        buffer_factor: usize,
    ) -> ena_transfer::Result<ObjectStream> {
        let mut stream = self.inner.open(dir, name, chunk_size, buffer_factor).await?;
        if name != self.object {
            return Ok(stream);
        }

        let mut head = vec![0u8; self.after];
        stream.read_exact(&mut head).await?;
        let head = futures::stream::iter(vec![Ok(Bytes::from(head))]);

        if self.stall {
            let chunks = head.chain(futures::stream::pending());
            return Ok(Box::new(stream_adapter::buffered(
                chunks,
                chunk_size,
                buffer_factor,
            )));
        }

        let reset = futures::stream::iter(vec![Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))]);
        Ok(Box::new(stream_adapter::buffered(
            head.chain(reset),
            chunk_size,
            buffer_factor,
        )))
    }

    async fn read_to_bytes(&self, dir: &str, name: &str) -> ena_transfer::Result<Vec<u8>> {
        self.inner.read_to_bytes(dir, name).await
    }

    fn name(&self) -> &'static str {
        "breaking"
    }
}
