//! FTPS destination with implicit reconnection

use super::{DestinationWriter, OnBlock};
use super::ftp::FtpConnection;
use crate::config::DestinationConfig;
use crate::error::{Error, FtpError, Result};
use crate::types::RemoteObjectRef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};

/// Lifecycle of the destination session
enum Session {
    /// Never connected
    Absent,
    /// Logged in and believed usable
    Established(FtpConnection),
    /// Lost, or left in an unknown state by an interrupted operation
    Stale,
}

/// Observable session state, without the connection itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been opened yet
    Absent,
    /// A session is open
    Established,
    /// The next operation will reconnect
    Stale,
}

/// Destination writing to an FTP server, with explicit TLS by default
///
/// The session is opened lazily on first use. Before each operation a `NOOP`
/// probe checks liveness and a new session is opened when it fails. The
/// connection is checked out for the duration of an operation, so an operation
/// that errors mid-protocol (or whose future is dropped) leaves the session
/// stale and forces a reconnect.
pub struct FtpsDestination {
    config: DestinationConfig,
    tls: Option<Arc<ClientConfig>>,
    session: Session,
    connects: u64,
}

impl FtpsDestination {
    /// Create a destination; no connection is made until the first operation
    pub fn new(config: DestinationConfig) -> Result<Self> {
        let tls = if config.tls {
            Some(tls_client_config()?)
        } else {
            None
        };
        Ok(Self {
            config,
            tls,
            session: Session::Absent,
            connects: 0,
        })
    }

    /// Current session state
    pub fn session_state(&self) -> SessionState {
        match self.session {
            Session::Absent => SessionState::Absent,
            Session::Established(_) => SessionState::Established,
            Session::Stale => SessionState::Stale,
        }
    }

    /// Number of sessions opened so far
    pub fn connects(&self) -> u64 {
        self.connects
    }

    /// Close the session politely, if there is one
    pub async fn close(&mut self) {
        if let Session::Established(conn) = std::mem::replace(&mut self.session, Session::Absent) {
            conn.quit().await;
        }
    }

    async fn connect(&mut self) -> Result<FtpConnection> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        let conn = tokio::time::timeout(
            self.config.connect_timeout,
            FtpConnection::open(&self.config, self.tls.clone()),
        )
        .await
        .map_err(|_| FtpError::ConnectTimeout(target))??;
        self.connects += 1;
        Ok(conn)
    }

    /// Take the connection for one operation; the session stays stale until
    /// [`checkin`](Self::checkin) hands it back
    async fn checkout(&mut self) -> Result<FtpConnection> {
        self.ensure_session().await?;
        match std::mem::replace(&mut self.session, Session::Stale) {
            Session::Established(conn) => Ok(conn),
            _ => Err(Error::Other("destination session not established".into())),
        }
    }

    fn checkin<T>(&mut self, conn: FtpConnection, result: &Result<T>) {
        let usable = match result {
            Ok(_) => true,
            Err(Error::Ftp(e)) => e.leaves_session_usable(),
            Err(_) => false,
        };
        if usable {
            self.session = Session::Established(conn);
        } else {
            tracing::debug!("Discarding destination connection after failed operation");
        }
    }
}

fn tls_client_config() -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| FtpError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(Arc::new(config))
}

#[async_trait]
impl DestinationWriter for FtpsDestination {
    async fn ensure_session(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.session, Session::Stale) {
            Session::Established(mut conn) => match conn.noop().await {
                Ok(()) => {
                    self.session = Session::Established(conn);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Destination session lost, reconnecting");
                }
            },
            Session::Stale => tracing::debug!("Reconnecting stale destination session"),
            Session::Absent => {}
        }

        let conn = self.connect().await?;
        self.session = Session::Established(conn);
        Ok(())
    }

    async fn list(&mut self) -> Result<Vec<RemoteObjectRef>> {
        let mut conn = self.checkout().await?;
        let result = conn.list().await;
        self.checkin(conn, &result);
        result
    }

    async fn upload(
        &mut self,
        name: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        on_block: &mut OnBlock<'_>,
        block_size: usize,
    ) -> Result<String> {
        let mut conn = self.checkout().await?;
        let result = conn.store(name, stream, on_block, block_size).await;
        self.checkin(conn, &result);
        result
    }

    async fn delete(&mut self, name: &str) -> Result<()> {
        let mut conn = self.checkout().await?;
        let result = conn.delete(name).await;
        self.checkin(conn, &result);
        result
    }

    async fn size(&mut self, name: &str) -> Result<Option<u64>> {
        let mut conn = self.checkout().await?;
        let result = conn.size(name).await;
        self.checkin(conn, &result);
        result
    }

    fn name(&self) -> &'static str {
        "ftps"
    }
}
