//! SSH transport backed by libssh2.
//!
//! libssh2 is blocking, so every call runs under `spawn_blocking`. Streamed
//! output is pumped from a blocking task into a bounded channel and read back
//! through [`ChannelReader`].
//!
//! Host keys are NOT checked against `known_hosts`. Any key the server
//! presents is accepted.

use async_trait::async_trait;
use ssh2::{Channel, ExtendedData, Session};
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::auth::{self, AuthMethod, PassphrasePrompt, TerminalPrompt};
use super::{ChannelReader, CommandOutput, Connector, Endpoint, OutputStream, RemoteSession};
use crate::error::{BackupError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Read size of the blocking pump.
const STREAM_CHUNK: usize = 32 * 1024;

/// Chunks buffered between the pump and the reader.
const STREAM_BUFFER: usize = 16;

pub struct SshConnector {
    prompt: Arc<dyn PassphrasePrompt>,
    timeout: Duration,
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(Arc::new(TerminalPrompt::default()))
    }
}

impl SshConnector {
    pub fn new(prompt: Arc<dyn PassphrasePrompt>) -> Self {
        Self {
            prompt,
            timeout: CONNECT_TIMEOUT,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>> {
        let endpoint = endpoint.clone();
        let prompt = self.prompt.clone();
        let timeout = self.timeout;
        let address = endpoint.address();

        let session = tokio::task::spawn_blocking(move || {
            let method = auth::resolve(&endpoint.auth, prompt.as_ref())?;
            open_session(&endpoint, &method, timeout)
        })
        .await
        .map_err(|e| BackupError::Channel(format!("connect task failed: {e}")))??;

        Ok(Box::new(SshSession { session, address }))
    }
}

fn open_session(endpoint: &Endpoint, method: &AuthMethod, timeout: Duration) -> Result<Session> {
    let address = endpoint.address();
    let connection_error = |message: String| BackupError::Connection {
        address: address.clone(),
        message,
    };

    let port: u16 = endpoint
        .port
        .parse()
        .map_err(|_| connection_error(format!("invalid port '{}'", endpoint.port)))?;

    let socket_addr = (endpoint.host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| connection_error(format!("failed to resolve host: {e}")))?
        .next()
        .ok_or_else(|| connection_error("host resolved to no addresses".to_string()))?;

    let tcp = TcpStream::connect_timeout(&socket_addr, timeout)
        .map_err(|e| connection_error(format!("failed to connect via SSH: {e}")))?;

    let mut session = Session::new().map_err(|e| connection_error(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| connection_error(format!("handshake failed: {e}")))?;

    match method {
        AuthMethod::PublicKey {
            key_path,
            passphrase,
        } => session.userauth_pubkey_file(&endpoint.user, None, key_path, passphrase.as_deref()),
        AuthMethod::Password(password) => session.userauth_password(&endpoint.user, password),
    }
    .map_err(|e| BackupError::Authentication(e.to_string()))?;

    if !session.authenticated() {
        return Err(BackupError::Authentication(format!(
            "server {} rejected credentials for {}",
            address, endpoint.user
        )));
    }

    debug!(server = %address, "SSH session authenticated");
    Ok(session)
}

struct SshSession {
    session: Session,
    address: String,
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| BackupError::Channel(format!("blocking task failed: {e}")))?
        .map_err(|e| BackupError::Channel(e.to_string()))
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let session = self.session.clone();
        let command = command.to_string();

        blocking(move || {
            let mut channel = session.channel_session()?;
            channel.handle_extended_data(ExtendedData::Merge)?;
            channel.exec(&command)?;

            let mut output = Vec::new();
            channel.read_to_end(&mut output)?;
            channel.wait_close()?;

            Ok(CommandOutput {
                status: channel.exit_status()?,
                output: String::from_utf8_lossy(&output).into_owned(),
            })
        })
        .await
    }

    async fn open_output_stream(&self, command: &str) -> Result<OutputStream> {
        let session = self.session.clone();
        let command = command.to_string();

        let channel = blocking(move || {
            let mut channel = session.channel_session()?;
            channel.handle_extended_data(ExtendedData::Ignore)?;
            channel.exec(&command)?;
            Ok(channel)
        })
        .await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || pump(channel, tx, exit_tx));

        let exit = async move {
            exit_rx.await.map_err(|_| {
                BackupError::Channel("stream ended without an exit status".to_string())
            })?
        };

        Ok(OutputStream::new(ChannelReader::new(rx), exit))
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.clone();
        let address = self.address.clone();

        blocking(move || {
            if let Err(e) = session.disconnect(None, "closing", None) {
                warn!(server = %address, error = %e, "SSH disconnect failed");
            }
            Ok(())
        })
        .await
    }
}

/// Copy channel stdout into `tx` until EOF, then report the exit status.
fn pump(
    mut channel: Channel,
    tx: mpsc::Sender<io::Result<Vec<u8>>>,
    exit_tx: oneshot::Sender<Result<i32>>,
) {
    let mut buf = vec![0u8; STREAM_CHUNK];

    loop {
        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                    // Reader went away; stop the remote side.
                    let _ = channel.close();
                    break;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    drop(tx);

    let status = channel
        .wait_close()
        .and_then(|_| channel.exit_status())
        .map_err(|e| BackupError::Channel(e.to_string()));
    let _ = exit_tx.send(status);
}
