//! Async FTP control connection with optional explicit TLS
//!
//! Implements the command subset the archive's upload area needs: `AUTH TLS`,
//! login, `PBSZ`/`PROT`, `TYPE I`, `CWD`, `NOOP`, and passive-mode `LIST`,
//! `SIZE`, `DELE` and `STOR`. Data connections reuse the control channel's TLS
//! client configuration so servers that require session reuse accept them.

use super::OnBlock;
use crate::config::DestinationConfig;
use crate::error::{Error, FtpError, Result};
use crate::types::RemoteObjectRef;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::rustls::pki_types::ServerName;

/// Byte stream usable as a control or data channel, plain or TLS-wrapped
pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type BoxStream = Box<dyn AsyncStream>;

/// A complete (possibly multi-line) server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reply {
    pub(crate) code: u16,
    pub(crate) message: String,
}

struct Tls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

/// One logged-in control connection
pub(crate) struct FtpConnection {
    control: BufReader<BoxStream>,
    peer: IpAddr,
    tls: Option<Tls>,
}

impl FtpConnection {
    /// Connect, negotiate TLS when `tls_config` is given, log in and enter the
    /// configured directory
    pub(crate) async fn open(
        config: &DestinationConfig,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let peer = tcp.peer_addr()?.ip();
        tcp.set_nodelay(true)?;

        let control: BoxStream = Box::new(tcp);
        let mut conn = Self {
            control: BufReader::new(control),
            peer,
            tls: None,
        };
        conn.expect_reply("greeting", &[220]).await?;

        if let Some(client_config) = tls_config {
            conn.command("AUTH", Some("TLS"), &[234]).await?;
            let server_name = ServerName::try_from(config.host.clone())
                .map_err(|e| FtpError::Tls(format!("invalid server name {}: {e}", config.host)))?;
            let connector = TlsConnector::from(client_config);
            conn.upgrade_control(&connector, &server_name).await?;
            conn.tls = Some(Tls {
                connector,
                server_name,
            });
        }

        let user = conn.command("USER", Some(config.username.as_str()), &[230, 331]).await?;
        if user.code == 331 {
            let password = config.password.as_deref().unwrap_or_default();
            conn.command("PASS", Some(password), &[230, 202]).await?;
        }

        if conn.tls.is_some() {
            conn.command("PBSZ", Some("0"), &[200]).await?;
            conn.command("PROT", Some("P"), &[200]).await?;
        }
        conn.command("TYPE", Some("I"), &[200]).await?;

        if !config.directory.is_empty() {
            conn.command("CWD", Some(config.directory.as_str()), &[250]).await?;
        }

        tracing::info!(
            host = %config.host,
            port = config.port,
            tls = conn.tls.is_some(),
            directory = %config.directory,
            "Destination session established"
        );
        Ok(conn)
    }

    async fn upgrade_control(
        &mut self,
        connector: &TlsConnector,
        server_name: &ServerName<'static>,
    ) -> Result<()> {
        // Nothing may be pending in the read buffer once the server has answered AUTH
        let (placeholder, _) = tokio::io::duplex(1);
        let placeholder: BoxStream = Box::new(placeholder);
        let plain = std::mem::replace(&mut self.control, BufReader::new(placeholder)).into_inner();
        let secured = connector
            .connect(server_name.clone(), plain)
            .await
            .map_err(|e| FtpError::Tls(format!("control channel handshake failed: {e}")))?;
        let secured: BoxStream = Box::new(secured);
        self.control = BufReader::new(secured);
        Ok(())
    }

    /// Liveness probe
    pub(crate) async fn noop(&mut self) -> Result<()> {
        self.command("NOOP", None, &[200]).await?;
        Ok(())
    }

    /// `LIST` of the working directory, parsed into names and sizes
    pub(crate) async fn list(&mut self) -> Result<Vec<RemoteObjectRef>> {
        let mut data = self.open_data("LIST", None).await?;
        let mut raw = Vec::new();
        match data.read_to_end(&mut raw).await {
            Ok(_) => {}
            // Some servers close the data channel without a TLS close_notify
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
            Err(e) => return Err(e.into()),
        }
        drop(data);
        self.expect_reply("LIST", &[226, 250]).await?;

        let listing = String::from_utf8_lossy(&raw);
        Ok(listing.lines().filter_map(parse_list_line).collect())
    }

    /// `SIZE`; a 550 reply means the object does not exist
    pub(crate) async fn size(&mut self, name: &str) -> Result<Option<u64>> {
        match self.command("SIZE", Some(name), &[213]).await {
            Ok(reply) => reply
                .message
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| Error::from(FtpError::MalformedReply(format!("SIZE: {}", reply.message)))),
            Err(Error::Ftp(e)) if e.code() == Some(550) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// `DELE`; a 550 reply means there was nothing to delete
    pub(crate) async fn delete(&mut self, name: &str) -> Result<()> {
        match self.command("DELE", Some(name), &[250]).await {
            Ok(_) => Ok(()),
            Err(Error::Ftp(e)) if e.code() == Some(550) => {
                tracing::debug!(object = %name, "Nothing to delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// `STOR` the content of `stream` and return its MD5 hex digest
    pub(crate) async fn store(
        &mut self,
        name: &str,
        stream: &mut (dyn AsyncRead + Unpin + Send),
        on_block: &mut OnBlock<'_>,
        block_size: usize,
    ) -> Result<String> {
        let mut data = self.open_data("STOR", Some(name)).await?;
        let (digest, bytes) =
            super::copy_blocks(stream, &mut data, block_size, on_block).await?;
        data.shutdown().await?;
        drop(data);
        self.expect_reply("STOR", &[226, 250]).await?;

        tracing::debug!(object = %name, bytes, "STOR complete");
        Ok(digest)
    }

    /// Say goodbye; errors are irrelevant since the connection is discarded anyway
    pub(crate) async fn quit(mut self) {
        if let Err(e) = self.command("QUIT", None, &[221]).await {
            tracing::debug!(error = %e, "QUIT failed");
        }
    }

    /// Enter passive mode, send `verb`, wait for the preliminary reply and
    /// return the (protected) data stream
    async fn open_data(&mut self, verb: &str, arg: Option<&str>) -> Result<BoxStream> {
        let pasv = self.command("PASV", None, &[227]).await?;
        let port = parse_pasv(&pasv.message)?;
        // The advertised address is often private; the control peer is reachable
        let tcp = TcpStream::connect((self.peer, port)).await?;

        self.send(verb, arg).await?;
        let reply = self.read_reply().await?;
        if !(100..200).contains(&reply.code) {
            return Err(unexpected(verb, reply));
        }

        let stream: BoxStream = match &self.tls {
            Some(tls) => Box::new(
                tls.connector
                    .connect(tls.server_name.clone(), tcp)
                    .await
                    .map_err(|e| FtpError::Tls(format!("data channel handshake failed: {e}")))?,
            ),
            None => Box::new(tcp),
        };
        Ok(stream)
    }

    /// Send a command and require one of `accepted` as the reply code
    async fn command(&mut self, verb: &str, arg: Option<&str>, accepted: &[u16]) -> Result<Reply> {
        self.send(verb, arg).await?;
        self.expect_reply(verb, accepted).await
    }

    async fn expect_reply(&mut self, context: &str, accepted: &[u16]) -> Result<Reply> {
        let reply = self.read_reply().await?;
        if accepted.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(unexpected(context, reply))
        }
    }

    async fn send(&mut self, verb: &str, arg: Option<&str>) -> Result<()> {
        let line = match arg {
            Some(arg) => format!("{verb} {arg}\r\n"),
            None => format!("{verb}\r\n"),
        };
        if verb == "PASS" {
            tracing::debug!(command = "PASS ****", "FTP ->");
        } else {
            tracing::debug!(command = %line.trim_end(), "FTP ->");
        }

        let stream = self.control.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line().await?;
        let (code, continued, text) = parse_reply_line(&first)?;
        let mut message = text.to_string();

        if continued {
            loop {
                let line = self.read_line().await?;
                let last = matches!(parse_reply_line(&line), Ok((c, false, _)) if c == code);
                let text = if last { &line[4.min(line.len())..] } else { line.as_str() };
                message.push('\n');
                message.push_str(text.trim_end());
                if last {
                    break;
                }
            }
        }

        tracing::debug!(code, message = %message, "FTP <-");
        Ok(Reply { code, message })
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.control.read_line(&mut line).await? == 0 {
            return Err(FtpError::ConnectionClosed.into());
        }
        Ok(line)
    }
}

fn unexpected(command: &str, reply: Reply) -> Error {
    FtpError::UnexpectedReply {
        command: command.to_string(),
        code: reply.code,
        message: reply.message,
    }
    .into()
}

/// Split a reply line into code, continuation flag and text
pub(crate) fn parse_reply_line(line: &str) -> std::result::Result<(u16, bool, &str), FtpError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let malformed = || FtpError::MalformedReply(line.to_string());

    let digits = line.get(..3).ok_or_else(malformed)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let code: u16 = digits.parse().map_err(|_| malformed())?;

    match line.as_bytes().get(3) {
        None => Ok((code, false, "")),
        Some(b' ') => Ok((code, false, &line[4..])),
        Some(b'-') => Ok((code, true, &line[4..])),
        Some(_) => Err(malformed()),
    }
}

/// Data port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply
pub(crate) fn parse_pasv(message: &str) -> std::result::Result<u16, FtpError> {
    let malformed = || FtpError::MalformedReply(format!("PASV: {message}"));

    let start = message.find(|c: char| c.is_ascii_digit()).ok_or_else(malformed)?;
    let numbers: Vec<u16> = message[start..]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .take(6)
        .map(|s| s.parse::<u16>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| malformed())?;

    match numbers.as_slice() {
        [_, _, _, _, hi, lo] if *hi <= 255 && *lo <= 255 => Ok(hi * 256 + lo),
        _ => Err(malformed()),
    }
}

/// One Unix-style `LIST` line; directories and unparsable lines yield `None`
///
/// `-rw-r--r--   1 ftp ftp   1048576 Jan 01 12:00 a.fq.gz`
pub(crate) fn parse_list_line(line: &str) -> Option<RemoteObjectRef> {
    let mut rest = line.trim_end();
    let mut fields = Vec::with_capacity(8);
    for _ in 0..8 {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }
    let mut name = rest.trim_start();

    let kind = fields[0].chars().next()?;
    match kind {
        '-' => {}
        'l' => name = name.split(" -> ").next()?,
        _ => return None,
    }
    if name.is_empty() {
        return None;
    }

    let size = fields[4].parse().ok()?;
    Some(RemoteObjectRef::new(name, size))
}
