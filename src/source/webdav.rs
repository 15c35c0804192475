//! WebDAV (Nextcloud/ownCloud) source

use super::propfind::{PROPFIND_BODY, parse_multistatus};
use super::{ObjectStream, SourceReader};
use crate::config::{RetryConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::stream_adapter;
use crate::types::RemoteObjectRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Response};
use std::pin::Pin;
use std::time::Duration;
use url::Url;

type ChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Source reading from a WebDAV server with basic authentication
///
/// Listings use `PROPFIND` with `Depth: 1`; objects are streamed with `GET`.
/// Listing, sidecar reads and the initial response of an object `GET` are
/// retried according to the configured [`RetryConfig`]. Once bytes start
/// flowing, a broken stream surfaces as a read error to the uploader.
pub struct WebDavSource {
    client: reqwest::Client,
    base: Url,
    username: String,
    password: Option<String>,
    retry: RetryConfig,
}

impl WebDavSource {
    /// Build a source from configuration
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let base = Url::parse(&config.url)
            .map_err(|e| Error::config("source.url", format!("invalid URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::config("source.url", "URL cannot carry a path"));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base,
            username: config.username.clone(),
            password: config.password.clone(),
            retry: config.retry.clone(),
        })
    }

    /// URL of `dir` (with a trailing slash) or of `name` inside `dir`
    fn url_for(&self, dir: &str, name: Option<&str>) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::config("source.url", "URL cannot carry a path"))?;
            segments.pop_if_empty();
            for segment in dir.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
            segments.push(name.unwrap_or(""));
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, self.password.as_ref())
    }

    async fn propfind(&self, url: Url) -> Result<Vec<RemoteObjectRef>> {
        tracing::debug!(url = %url, "PROPFIND");
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| Error::Other(format!("invalid method: {e}")))?;
        let response = self
            .request(method, url.clone())
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await?;
        let body = check_status(response, &url)?.text().await?;
        parse_multistatus(&body)
    }

    async fn get(&self, url: Url) -> Result<Response> {
        tracing::debug!(url = %url, "GET");
        let response = self.request(Method::GET, url.clone()).send().await?;
        check_status(response, &url)
    }
}

fn check_status(response: Response, url: &Url) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl SourceReader for WebDavSource {
    async fn list(&self, dir: &str) -> Result<Vec<RemoteObjectRef>> {
        let url = self.url_for(dir, None)?;
        let objects = with_retry(&self.retry, || {
            let url = url.clone();
            async move { self.propfind(url).await }
        })
        .await?;
        tracing::debug!(dir = dir, count = objects.len(), "listed source directory");
        Ok(objects)
    }

    async fn open(
        &self,
        dir: &str,
        name: &str,
        chunk_size: usize,
        buffer_factor: usize,
    ) -> Result<ObjectStream> {
        let url = self.url_for(dir, Some(name))?;
        let response = with_retry(&self.retry, || {
            let url = url.clone();
            async move { self.get(url).await }
        })
        .await?;

        let chunks: ChunkStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(std::io::Error::other)),
        );
        Ok(Box::new(stream_adapter::buffered(
            chunks,
            chunk_size,
            buffer_factor,
        )))
    }

    async fn read_to_bytes(&self, dir: &str, name: &str) -> Result<Vec<u8>> {
        let url = self.url_for(dir, Some(name))?;
        with_retry(&self.retry, || {
            let url = url.clone();
            async move {
                let response = self.get(url).await?;
                Ok::<_, Error>(response.bytes().await?.to_vec())
            }
        })
        .await
    }

    fn name(&self) -> &'static str {
        "webdav"
    }
}
