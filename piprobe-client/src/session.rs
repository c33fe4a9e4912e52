use std::{
    fs::{self, OpenOptions},
    io::{self, Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use serde::Deserialize;
use ssh2::{Channel, CheckResult, HostKeyType, KnownHostFileKind, Session};

use crate::error::{ConnectionError, ExecutionError};

pub const DEFAULT_SSH_PORT: u16 = 22;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

/// A channel able to run commands on one remote host, one at a time.
pub trait RemoteSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecutionError>;

    /// Release the underlying connection
    fn close(self)
    where
        Self: Sized;
}

/// How the server's host key is checked against the known hosts file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Trust on first use: unknown keys are recorded, changed keys are rejected
    #[default]
    AcceptNew,
    /// Only keys already present in the known hosts file are accepted
    Strict,
    /// No verification at all
    AcceptAny,
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub port: u16,
    pub host_key_policy: HostKeyPolicy,
    /// Defaults to `~/.ssh/known_hosts`
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts: None,
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct SshSession {
    session: Session,
    host: String,
}

impl SshSession {
    pub fn connect(
        host: &str,
        credentials: &Credentials,
        options: &SshOptions,
    ) -> Result<Self, ConnectionError> {
        debug!("connecting to ({host}, {})", options.port);
        let tcp = TcpStream::connect((host, options.port)).map_err(|source| {
            ConnectionError::Unreachable {
                host: host.to_owned(),
                source,
            }
        })?;

        let mut session = Session::new().map_err(ConnectionError::Handshake)?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(ConnectionError::Handshake)?;
        debug!("SSH handshake with {host} completed");

        let (key, key_type) = session.host_key().ok_or(ConnectionError::NoHostKey)?;
        verify_host_key(&session, host, key, key_type, options)?;

        session
            .userauth_password(&credentials.username, &credentials.password)
            .map_err(|source| ConnectionError::Authentication {
                username: credentials.username.clone(),
                source: Some(source),
            })?;
        if !session.authenticated() {
            return Err(ConnectionError::Authentication {
                username: credentials.username.clone(),
                source: None,
            });
        }

        info!("session opened to {}@{host}", credentials.username);
        Ok(Self {
            session,
            host: host.to_owned(),
        })
    }
}

impl RemoteSession for SshSession {
    fn exec(&mut self, command: &str) -> Result<CommandOutput, ExecutionError> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let (stdout, stderr) = self.drain(&mut channel)?;
        channel.wait_close()?;
        let exit_status = channel.exit_status()?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        };
        log::trace!("`{command}` on {}: {output:?}", self.host);
        Ok(output)
    }

    fn close(self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!("disconnect from {} failed: {e}", self.host);
        }
        info!("session to {} closed", self.host);
    }
}

impl SshSession {
    /// Read stdout and stderr side by side until EOF. Leaving either unread
    /// stops the server once the shared channel window is full.
    fn drain(&self, channel: &mut Channel) -> Result<(Vec<u8>, Vec<u8>), ExecutionError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut buf = [0; 4096];

        self.session.set_blocking(false);
        let res = (|| -> io::Result<()> {
            loop {
                let read = read_available(&mut channel.stream(0), &mut buf, &mut stdout)?
                    + read_available(&mut channel.stderr(), &mut buf, &mut stderr)?;
                if channel.eof() {
                    return Ok(());
                }
                if read == 0 {
                    std::thread::sleep(DRAIN_POLL_INTERVAL);
                }
            }
        })();
        self.session.set_blocking(true);
        res?;

        channel.read_to_end(&mut stdout)?;
        channel.stderr().read_to_end(&mut stderr)?;
        Ok((stdout, stderr))
    }
}

/// Move whatever `stream` has buffered into `sink` without waiting for more
fn read_available(
    stream: &mut impl Read,
    buf: &mut [u8],
    sink: &mut Vec<u8>,
) -> io::Result<usize> {
    let mut total = 0;
    loop {
        match stream.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                sink.extend_from_slice(&buf[..n]);
                total += n;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(e) => return Err(e),
        }
    }
}

/// Check `key` against the known hosts file. `session` only provides the
/// known hosts store and need not be connected.
fn verify_host_key(
    session: &Session,
    host: &str,
    key: &[u8],
    key_type: HostKeyType,
    options: &SshOptions,
) -> Result<(), ConnectionError> {
    if options.host_key_policy == HostKeyPolicy::AcceptAny {
        warn!("host key verification is disabled for {host}");
        return Ok(());
    }

    let path = match &options.known_hosts {
        Some(path) => path.clone(),
        None => default_known_hosts_path().ok_or(ConnectionError::NoKnownHostsFile)?,
    };

    let mut known_hosts = session.known_hosts().map_err(ConnectionError::KnownHosts)?;
    if path.exists() {
        known_hosts
            .read_file(&path, KnownHostFileKind::OpenSSH)
            .map_err(ConnectionError::KnownHosts)?;
    }

    match known_hosts.check_port(host, options.port, key) {
        CheckResult::Match => {
            debug!("host key for {host} matches {}", path.display());
            Ok(())
        }
        CheckResult::Mismatch => Err(ConnectionError::HostKeyMismatch(host.to_owned())),
        CheckResult::NotFound if options.host_key_policy == HostKeyPolicy::AcceptNew => {
            let entry = known_hosts_entry(host, options.port);
            known_hosts
                .add(&entry, key, "added by piprobe", key_type.into())
                .map_err(ConnectionError::KnownHosts)?;
            let added = known_hosts
                .iter()
                .map_err(ConnectionError::KnownHosts)?
                .into_iter()
                .rev()
                .find(|h| h.name() == Some(entry.as_str()))
                .ok_or(ConnectionError::UnknownHostKey(host.to_owned()))?;
            let line = known_hosts
                .write_string(&added, KnownHostFileKind::OpenSSH)
                .map_err(ConnectionError::KnownHosts)?;
            append_known_host(&path, &line).map_err(|source| {
                ConnectionError::KnownHostsWrite {
                    path: path.clone(),
                    source,
                }
            })?;
            warn!(
                "permanently added host key for {entry} to {}",
                path.display()
            );
            Ok(())
        }
        CheckResult::NotFound | CheckResult::Failure => {
            Err(ConnectionError::UnknownHostKey(host.to_owned()))
        }
    }
}

/// Append one entry, leaving the rest of the file untouched
fn append_known_host(path: &Path, line: &str) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let unterminated = fs::read(path)
        .map(|content| content.last().is_some_and(|&b| b != b'\n'))
        .unwrap_or(false);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if unterminated {
        file.write_all(b"\n")?;
    }
    file.write_all(line.trim_end().as_bytes())?;
    file.write_all(b"\n")
}

fn default_known_hosts_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
}

/// Host pattern as OpenSSH writes it, bracketed when the port is not 22
fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_owned()
    } else {
        format!("[{host}]:{port}")
    }
}
