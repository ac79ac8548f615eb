//! Remote command execution over a secure channel.
//!
//! The engine never speaks SSH itself. A [`Connector`] turns an [`Endpoint`]
//! into a [`RemoteSession`], and [`Connection`] wraps that session with the
//! `Disconnected → Connecting → Connected → Closed` lifecycle a worker owns.
//!
//! - `ssh`: libssh2-backed connector used in production
//! - `local`: runs commands through `sh -c` on this machine (simulation mode)
//! - `auth`: credential resolution shared by connectors

pub mod auth;
pub mod local;
pub mod ssh;

use async_trait::async_trait;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{Server, Settings};
use crate::error::{BackupError, Result};

pub use auth::{AuthConfig, AuthMethod, PassphrasePrompt, TerminalPrompt};
pub use local::LocalConnector;
pub use ssh::SshConnector;

/// Exit status of a streamed remote process, resolved once its output is drained.
pub type ExitFuture = Pin<Box<dyn Future<Output = Result<i32>> + Send>>;

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
    pub user: String,
    pub auth: AuthConfig,
}

impl Endpoint {
    pub fn from_config(server: &Server, settings: &Settings) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port_or(settings.server_port.as_deref()).to_string(),
            user: server.user.clone(),
            auth: AuthConfig::from_config(server, settings),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Exit status plus merged stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Live standard output of a remote process.
pub struct OutputStream {
    reader: Pin<Box<dyn AsyncRead + Send>>,
    exit: ExitFuture,
}

impl OutputStream {
    pub fn new(
        reader: impl AsyncRead + Send + 'static,
        exit: impl Future<Output = Result<i32>> + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::pin(reader),
            exit: Box::pin(exit),
        }
    }

    /// Read the next chunk. `Ok(0)` means end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).await
    }

    /// Wait for the process to exit and return its status.
    pub async fn wait(self) -> Result<i32> {
        drop(self.reader);
        self.exit.await
    }
}

/// Establishes sessions. Injected so the engine can run against SSH,
/// the local shell, or a test double.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>>;
}

/// An authenticated session able to run commands on the remote host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command to completion, capturing merged stdout and stderr.
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Start a command and hand back its live stdout.
    async fn open_output_stream(&self, command: &str) -> Result<OutputStream>;

    async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// One live session to one server, owned by exactly one worker.
pub struct Connection {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    session: Option<Box<dyn RemoteSession>>,
    state: ConnectionState,
}

impl Connection {
    pub fn new(endpoint: Endpoint, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoint,
            connector,
            session: None,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Connected {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        info!(server = %self.endpoint.address(), user = %self.endpoint.user, "Connecting to server");

        match self.connector.connect(&self.endpoint).await {
            Ok(session) => {
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                info!(server = %self.endpoint.address(), "Connection established");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn session(&self) -> Result<&dyn RemoteSession> {
        self.session
            .as_deref()
            .ok_or_else(|| BackupError::NotConnected(self.endpoint.address()))
    }

    pub async fn run_command(&self, command: &str) -> Result<CommandOutput> {
        debug!(server = %self.endpoint.address(), command = %command, "Running remote command");
        self.session()?.exec(command).await
    }

    /// Like [`run_command`](Self::run_command), but a non-zero exit is an error.
    pub async fn run_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.run_command(command).await?;
        if !output.success() {
            return Err(BackupError::RemoteCommand {
                command: command.to_string(),
                status: output.status,
                output: output.output.trim().to_string(),
            });
        }
        Ok(output)
    }

    pub async fn open_output_stream(&self, command: &str) -> Result<OutputStream> {
        debug!(server = %self.endpoint.address(), command = %command, "Opening remote output stream");
        self.session()?.open_output_stream(command).await
    }

    pub async fn test_connection(&self) -> Result<()> {
        self.run_checked("true").await.map(|_| ())
    }

    /// Tear down the session. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        self.state = ConnectionState::Closed;
        match self.session.take() {
            Some(session) => {
                debug!(server = %self.endpoint.address(), "Closing connection");
                session.close().await
            }
            None => Ok(()),
        }
    }
}

/// Quote a value for a POSIX shell command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Adapts chunks pushed through an mpsc channel into an [`AsyncRead`].
///
/// A closed channel reads as end of stream.
pub struct ChannelReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        loop {
            if this.offset < this.pending.len() {
                let n = (this.pending.len() - this.offset).min(buf.remaining());
                buf.put_slice(&this.pending[this.offset..this.offset + n]);
                this.offset += n;
                return Poll::Ready(Ok(()));
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.pending = chunk;
                    this.offset = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}
