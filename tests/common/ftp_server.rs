//! In-process plain FTP server for integration tests
//!
//! Supports the command subset the destination uses: USER/PASS, TYPE, CWD,
//! NOOP, PASV, LIST, SIZE, DELE, STOR and QUIT. Files live in a flat map;
//! STOR writes incrementally so a broken upload leaves a partial object.

use ena_transfer::DestinationConfig;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Account the server accepts
pub const FTP_USER: &str = "Webin-1";
/// Password of [`FTP_USER`]
pub const FTP_PASSWORD: &str = "webin-secret";

#[derive(Default)]
struct ServerState {
    files: BTreeMap<String, Vec<u8>>,
    logins: usize,
    commands: Vec<String>,
}

/// Running fake server; stopped on drop
pub struct FakeFtpServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    generation: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl FakeFtpServer {
    /// Bind to an ephemeral localhost port and start accepting sessions
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(ServerState::default()));
        let generation = Arc::new(AtomicU64::new(0));

        let task = {
            let state = state.clone();
            let generation = generation.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let state = state.clone();
                    let generation = generation.clone();
                    tokio::spawn(async move {
                        let _ = serve(stream, state, generation).await;
                    });
                }
            })
        };

        Self {
            addr,
            state,
            generation,
            task,
        }
    }

    /// Destination configuration pointing at this server (plain FTP)
    pub fn destination_config(&self) -> DestinationConfig {
        DestinationConfig {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            tls: false,
            username: FTP_USER.to_string(),
            password: Some(FTP_PASSWORD.to_string()),
            directory: "upload".to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Store a file directly
    pub fn put(&self, name: &str, data: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(name.to_string(), data.to_vec());
    }

    /// Content of a stored file
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(name).cloned()
    }

    /// Names of all stored files
    pub fn names(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    /// Successful logins so far
    pub fn logins(&self) -> usize {
        self.state.lock().unwrap().logins
    }

    /// Verbs received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Close every open session at its next command, without replying
    pub fn drop_sessions(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for FakeFtpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reply(out: &mut OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    out.write_all(format!("{line}\r\n").as_bytes()).await
}

async fn serve(
    stream: TcpStream,
    state: Arc<Mutex<ServerState>>,
    generation: Arc<AtomicU64>,
) -> std::io::Result<()> {
    let session = generation.load(Ordering::SeqCst);
    let (read, mut out) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut passive: Option<TcpListener> = None;
    let mut user_ok = false;

    reply(&mut out, "220 fake ftp ready").await?;

    while let Some(line) = lines.next_line().await? {
        if generation.load(Ordering::SeqCst) != session {
            return Ok(());
        }
        let line = line.trim_end().to_string();
        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        state.lock().unwrap().commands.push(verb.clone());

        match verb.as_str() {
            "USER" => {
                user_ok = arg == FTP_USER;
                reply(&mut out, "331 password required").await?;
            }
            "PASS" => {
                if user_ok && arg == FTP_PASSWORD {
                    state.lock().unwrap().logins += 1;
                    reply(&mut out, "230 logged in").await?;
                } else {
                    reply(&mut out, "530 login incorrect").await?;
                }
            }
            "TYPE" => reply(&mut out, "200 type set").await?,
            "CWD" => reply(&mut out, "250 directory changed").await?,
            "NOOP" => reply(&mut out, "200 ok").await?,
            "QUIT" => {
                reply(&mut out, "221 bye").await?;
                return Ok(());
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                reply(
                    &mut out,
                    &format!(
                        "227 Entering Passive Mode (127,0,0,1,{},{})",
                        port / 256,
                        port % 256
                    ),
                )
                .await?;
            }
            "LIST" => {
                let Some(listener) = passive.take() else {
                    reply(&mut out, "425 use PASV first").await?;
                    continue;
                };
                let listing: String = state
                    .lock()
                    .unwrap()
                    .files
                    .iter()
                    .map(|(name, data)| {
                        format!(
                            "-rw-r--r--    1 ftp      ftp      {:>10} Jan 01 12:00 {}\r\n",
                            data.len(),
                            name
                        )
                    })
                    .collect();
                reply(&mut out, "150 here comes the listing").await?;
                let (mut data, _) = listener.accept().await?;
                data.write_all(listing.as_bytes()).await?;
                data.shutdown().await?;
                drop(data);
                reply(&mut out, "226 transfer complete").await?;
            }
            "SIZE" => {
                let size = state.lock().unwrap().files.get(&arg).map(Vec::len);
                match size {
                    Some(size) => reply(&mut out, &format!("213 {size}")).await?,
                    None => reply(&mut out, "550 no such file").await?,
                }
            }
            "DELE" => {
                let removed = state.lock().unwrap().files.remove(&arg).is_some();
                if removed {
                    reply(&mut out, "250 deleted").await?;
                } else {
                    reply(&mut out, "550 no such file").await?;
                }
            }
            "STOR" => {
                let Some(listener) = passive.take() else {
                    reply(&mut out, "425 use PASV first").await?;
                    continue;
                };
                state.lock().unwrap().files.insert(arg.clone(), Vec::new());
                reply(&mut out, "150 ok to send data").await?;
                let (mut data, _) = listener.accept().await?;
                let mut buf = vec![0u8; 8192];
                loop {
                    let n = match data.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    };
                    // A file deleted mid-upload stays deleted
                    if let Some(file) = state.lock().unwrap().files.get_mut(&arg) {
                        file.extend_from_slice(&buf[..n]);
                    }
                }
                reply(&mut out, "226 transfer complete").await?;
            }
            _ => reply(&mut out, "502 command not implemented").await?,
        }
    }
    Ok(())
}
