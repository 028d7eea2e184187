//! Remote session: one authenticated SSH connection per operation
//!
//! Stages only see the traits in this module. [`SshConnector`] is the
//! production implementation on top of libssh2.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use secrecy::ExposeSecret;
use ssh2::{Channel, Session, Sftp};
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::models::project::ServerTarget;

const TRANSFER_CHUNK: usize = 32 * 1024;
const READ_CHUNK: usize = 4096;

/// Opens remote sessions
pub trait Connector: Send + Sync {
    /// Connect and authenticate. `timeout` bounds connection setup only.
    fn connect(
        &self,
        server: &ServerTarget,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn RemoteSession>, DeployError>;
}

/// An authenticated shell + file-transfer connection
pub trait RemoteSession: Send {
    /// Open the file-transfer sub-channel
    fn open_transfer(&self) -> Result<Box<dyn RemoteFs>, DeployError>;

    /// Run a command to completion and return its stdout
    fn exec(&self, command: &str) -> Result<String, DeployError>;

    /// Start a command and return a handle for streaming its output
    fn spawn(&self, command: &str, pty: bool) -> Result<Box<dyn RemoteProcess>, DeployError>;

    fn close(&mut self) -> Result<(), DeployError>;
}

/// Remote filesystem operations used by the transfer stage
pub trait RemoteFs {
    fn exists(&self, path: &str) -> bool;

    fn mkdir(&self, path: &str) -> Result<(), DeployError>;

    /// Copy `local` to `remote`, calling `progress(transferred, total)`
    /// after every chunk
    fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), DeployError>;
}

/// Result of one non-blocking read attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, without its terminator
    Line(String),

    /// Nothing available right now
    Pending,

    /// The remote side closed the stream and the buffer is drained
    Eof,
}

/// A running remote command
pub trait RemoteProcess: Send {
    /// Return the next buffered line without blocking
    fn read_line(&mut self) -> Result<LineRead, DeployError>;

    /// Send Ctrl+C to the pseudo-terminal and close our input side
    fn interrupt(&mut self) -> Result<(), DeployError>;

    /// Close the channel without waiting for the remote side
    fn close(&mut self) -> Result<(), DeployError>;

    /// Close, wait for the remote side, and return its exit status
    fn wait_exit(&mut self) -> Result<Option<i32>, DeployError>;
}

/// Owns a session for the lifetime of one invocation and closes it
/// exactly once: explicitly via [`OpenSession::close`], otherwise on drop.
pub struct OpenSession {
    inner: Box<dyn RemoteSession>,
    closed: bool,
}

impl OpenSession {
    pub fn new(inner: Box<dyn RemoteSession>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub fn session(&self) -> &dyn RemoteSession {
        self.inner.as_ref()
    }

    pub fn close(mut self) -> Result<(), DeployError> {
        self.closed = true;
        self.inner.close()
    }
}

impl Drop for OpenSession {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.inner.close() {
                warn!("Failed to close remote session: {}", e);
            }
        }
    }
}

/// Connects with libssh2 using password authentication.
///
/// Host keys are accepted without pinning; the fingerprint is logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct SshConnector;

impl Connector for SshConnector {
    fn connect(
        &self,
        server: &ServerTarget,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn RemoteSession>, DeployError> {
        let session = SshSession::connect(server, timeout)?;
        Ok(Box::new(session))
    }
}

pub struct SshSession {
    session: Session,
    host: String,
}

impl SshSession {
    pub fn connect(server: &ServerTarget, timeout: Option<Duration>) -> Result<Self, DeployError> {
        let address = server.address();
        debug!("Connecting to {}", address);

        let tcp = match timeout {
            Some(timeout) => connect_with_timeout(&address, timeout)?,
            None => TcpStream::connect(&address)
                .map_err(|e| DeployError::ConnectionFailed(format!("{}: {}", address, e)))?,
        };

        let mut session = Session::new()
            .map_err(|e| DeployError::ConnectionFailed(format!("session init: {}", e)))?;
        session.set_tcp_stream(tcp);
        if let Some(timeout) = timeout {
            session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        }

        session
            .handshake()
            .map_err(|e| DeployError::ConnectionFailed(format!("handshake with {}: {}", address, e)))?;

        if let Some(hash) = session.host_key_hash(ssh2::HashType::Sha256) {
            let hex: String = hash.iter().map(|b| format!("{:02x}", b)).collect();
            debug!("Accepting host key for {} (sha256 {})", address, hex);
        }

        session
            .userauth_password(&server.username, server.password.expose_secret())
            .map_err(|e| DeployError::ConnectionFailed(format!("authentication failed: {}", e)))?;
        if !session.authenticated() {
            return Err(DeployError::ConnectionFailed(
                "authentication failed".to_string(),
            ));
        }

        // Operational calls run without a deadline
        session.set_timeout(0);

        info!("SSH session established: {}@{}", server.username, address);
        Ok(Self {
            session,
            host: server.host.clone(),
        })
    }

    fn open_channel(&self, command: &str, pty: bool) -> Result<Channel, DeployError> {
        let mut channel = self.session.channel_session()?;
        if pty {
            channel.request_pty("xterm", None, None)?;
        }
        channel.exec(command)?;
        Ok(channel)
    }
}

fn connect_with_timeout(address: &str, timeout: Duration) -> Result<TcpStream, DeployError> {
    let addrs = address
        .to_socket_addrs()
        .map_err(|e| DeployError::ConnectionFailed(format!("{}: {}", address, e)))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }

    Err(DeployError::ConnectionFailed(match last_error {
        Some(e) => format!("{}: {}", address, e),
        None => format!("{}: no addresses resolved", address),
    }))
}

impl RemoteSession for SshSession {
    fn open_transfer(&self) -> Result<Box<dyn RemoteFs>, DeployError> {
        let sftp = self.session.sftp()?;
        Ok(Box::new(SftpFs { sftp }))
    }

    fn exec(&self, command: &str) -> Result<String, DeployError> {
        let mut channel = self.open_channel(command, false)?;
        let mut stdout = Vec::new();
        channel.read_to_end(&mut stdout)?;
        channel.wait_close()?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn spawn(&self, command: &str, pty: bool) -> Result<Box<dyn RemoteProcess>, DeployError> {
        let channel = self.open_channel(command, pty)?;
        Ok(Box::new(SshProcess {
            session: self.session.clone(),
            channel,
            buffer: LineBuffer::default(),
            eof: false,
        }))
    }

    fn close(&mut self) -> Result<(), DeployError> {
        debug!("Closing SSH session to {}", self.host);
        self.session.disconnect(None, "deployment finished", None)?;
        Ok(())
    }
}

struct SftpFs {
    sftp: Sftp,
}

impl RemoteFs for SftpFs {
    fn exists(&self, path: &str) -> bool {
        self.sftp.stat(Path::new(path)).is_ok()
    }

    fn mkdir(&self, path: &str) -> Result<(), DeployError> {
        self.sftp.mkdir(Path::new(path), 0o755)?;
        Ok(())
    }

    fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<(), DeployError> {
        let mut source = std::fs::File::open(local)?;
        let total = source.metadata()?.len();
        let mut target = self.sftp.create(Path::new(remote))?;

        let mut buf = vec![0u8; TRANSFER_CHUNK];
        let mut transferred = 0u64;
        if total == 0 {
            progress(0, 0);
        }
        loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            target.write_all(&buf[..n])?;
            transferred += n as u64;
            progress(transferred, total);
        }
        target.flush()?;
        Ok(())
    }
}

/// Splits a byte stream into lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Next complete line with `\r\n`/`\n` removed
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=pos).collect();
        Some(String::from_utf8_lossy(&line).trim_end_matches(['\r', '\n']).to_string())
    }

    /// Whatever is left after the stream ended
    pub fn take_rest(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

struct SshProcess {
    session: Session,
    channel: Channel,
    buffer: LineBuffer,
    eof: bool,
}

impl SshProcess {
    fn fill(&mut self) -> Result<(), DeployError> {
        let mut chunk = [0u8; READ_CHUNK];
        // Only this read is non-blocking; the session is shared with exec calls
        self.session.set_blocking(false);
        let read = self.channel.read(&mut chunk);
        self.session.set_blocking(true);

        match read {
            Ok(0) => {
                if self.channel.eof() {
                    self.eof = true;
                }
            }
            Ok(n) => self.buffer.push(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(DeployError::IoError(e)),
        }
        Ok(())
    }
}

impl RemoteProcess for SshProcess {
    fn read_line(&mut self) -> Result<LineRead, DeployError> {
        if let Some(line) = self.buffer.next_line() {
            return Ok(LineRead::Line(line));
        }
        if !self.eof {
            self.fill()?;
            if let Some(line) = self.buffer.next_line() {
                return Ok(LineRead::Line(line));
            }
        }
        if self.eof {
            return Ok(match self.buffer.take_rest() {
                Some(rest) => LineRead::Line(rest),
                None => LineRead::Eof,
            });
        }
        Ok(LineRead::Pending)
    }

    fn interrupt(&mut self) -> Result<(), DeployError> {
        self.channel.write_all(&[0x03])?;
        self.channel.flush()?;
        self.channel.send_eof()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeployError> {
        self.channel.close()?;
        Ok(())
    }

    fn wait_exit(&mut self) -> Result<Option<i32>, DeployError> {
        self.channel.close()?;
        self.channel.wait_close()?;
        Ok(self.channel.exit_status().ok())
    }
}
