use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("unable to reach {host}: {source}")]
    Unreachable {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("SSH handshake failed: {0}")]
    Handshake(#[source] ssh2::Error),
    #[error("server did not present a host key")]
    NoHostKey,
    #[error("host key for {0} is not in the known hosts file")]
    UnknownHostKey(String),
    #[error("host key for {0} does not match the known hosts file")]
    HostKeyMismatch(String),
    #[error("unable to locate the known hosts file")]
    NoKnownHostsFile,
    #[error("known hosts file error: {0}")]
    KnownHosts(#[source] ssh2::Error),
    #[error("unable to record host key in {}: {source}", path.display())]
    KnownHostsWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("authentication failed for user {username}")]
    Authentication {
        username: String,
        #[source]
        source: Option<ssh2::Error>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("session is closed")]
    SessionClosed,
    #[error("SSH channel error: {0}")]
    Channel(#[from] ssh2::Error),
    #[error("failed to read command output: {0}")]
    Read(#[from] std::io::Error),
    #[error("`{command}` exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: i32,
        stderr: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing `=` in {0:?}")]
    MissingSeparator(String),
    #[error("missing `'C` unit in {0:?}")]
    MissingUnit(String),
    #[error("invalid temperature value in {0:?}")]
    InvalidNumber(String),
}
