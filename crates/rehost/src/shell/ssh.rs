//! libssh2-backed shell sessions.
//!
//! libssh2 is blocking, so every call runs on the blocking thread pool.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use ssh2::{Channel, Session};
use tracing::{debug, info};

use super::{CommandOutput, Credentials, RemoteShell, ShellConnector, ShellError};

/// Default SSH port.
const SSH_PORT: u16 = 22;

/// Pause between reads when the interactive shell has nothing to say.
const IDLE_READ_PAUSE: Duration = Duration::from_millis(50);

/// Opens password-authenticated SSH sessions.
#[derive(Debug, Clone)]
pub struct SshConnector {
    port: u16,
    connect_timeout: Duration,
}

impl SshConnector {
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self {
            port: SSH_PORT,
            connect_timeout,
        }
    }

    /// Use a non-standard port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteShell>, ShellError> {
        let host = host.to_string();
        let credentials = credentials.clone();
        let port = self.port;
        let timeout = self.connect_timeout;

        info!(host = %host, user = %credentials.username, "Opening SSH session");
        let session = blocking(move || connect_blocking(&host, port, &credentials, timeout)).await?;
        Ok(Box::new(session))
    }
}

/// An authenticated SSH session.
pub struct SshSession {
    host: String,
    session: Session,
    /// Interactive shell channel, opened by the first `invoke`.
    shell: Arc<Mutex<Option<Channel>>>,
}

#[async_trait]
impl RemoteShell for SshSession {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&mut self, command: &str) -> Result<CommandOutput, ShellError> {
        let session = self.session.clone();
        let host = self.host.clone();
        let command = command.to_string();

        blocking(move || exec_blocking(&session, &host, &command)).await
    }

    async fn invoke(
        &mut self,
        command: &str,
        expected: &Regex,
        timeout: Duration,
    ) -> Result<String, ShellError> {
        let session = self.session.clone();
        let shell = Arc::clone(&self.shell);
        let host = self.host.clone();
        let command = command.to_string();
        let expected = expected.clone();

        blocking(move || {
            let mut guard = shell
                .lock()
                .map_err(|_| ShellError::Worker("shell channel lock poisoned".to_string()))?;
            if guard.is_none() {
                *guard = Some(open_shell(&session, &host)?);
            }
            let channel = guard
                .as_mut()
                .ok_or_else(|| ShellError::Worker("shell channel unavailable".to_string()))?;

            channel
                .write_all(format!("{command}\n").as_bytes())
                .map_err(|source| ShellError::Io {
                    host: host.clone(),
                    source,
                })?;

            session.set_blocking(false);
            let result = read_until_match(channel, &expected, timeout, &host, &command);
            session.set_blocking(true);
            result
        })
        .await
    }

    async fn close(&mut self) {
        let session = self.session.clone();
        let host = self.host.clone();
        let result = tokio::task::spawn_blocking(move || {
            session.disconnect(None, "closing", None)
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(host = %self.host, "SSH session closed"),
            Ok(Err(e)) => debug!(host = %host, error = %e, "SSH disconnect failed"),
            Err(e) => debug!(host = %host, error = %e, "SSH disconnect worker failed"),
        }
    }
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ShellError>
where
    F: FnOnce() -> Result<T, ShellError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ShellError::Worker(e.to_string()))?
}

fn connect_blocking(
    host: &str,
    port: u16,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<SshSession, ShellError> {
    let connect_err = |source| ShellError::Connect {
        host: host.to_string(),
        source,
    };
    let ssh_err = |source| ShellError::Ssh {
        host: host.to_string(),
        source,
    };

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(connect_err)?
        .next()
        .ok_or_else(|| {
            connect_err(std::io::Error::new(
                ErrorKind::NotFound,
                "hostname resolved to no addresses",
            ))
        })?;
    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(connect_err)?;

    let mut session = Session::new().map_err(ssh_err)?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
    session.handshake().map_err(ssh_err)?;

    // Host keys are accepted without verification; lab machines are
    // reinstalled too often for a known_hosts file to stay valid.
    if session
        .userauth_password(&credentials.username, &credentials.password)
        .is_err()
        || !session.authenticated()
    {
        return Err(ShellError::Auth {
            host: host.to_string(),
            user: credentials.username.clone(),
        });
    }

    // Interactive reads poll on their own deadline.
    session.set_timeout(0);

    Ok(SshSession {
        host: host.to_string(),
        session,
        shell: Arc::new(Mutex::new(None)),
    })
}

fn exec_blocking(session: &Session, host: &str, command: &str) -> Result<CommandOutput, ShellError> {
    let ssh_err = |source| ShellError::Ssh {
        host: host.to_string(),
        source,
    };
    let io_err = |source| ShellError::Io {
        host: host.to_string(),
        source,
    };

    let mut channel = session.channel_session().map_err(ssh_err)?;
    channel.exec(command).map_err(ssh_err)?;

    let mut stdout = Vec::new();
    channel.read_to_end(&mut stdout).map_err(io_err)?;
    let mut stderr = Vec::new();
    channel.stderr().read_to_end(&mut stderr).map_err(io_err)?;

    channel.wait_close().map_err(ssh_err)?;
    let exit_status = channel.exit_status().map_err(ssh_err)?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    })
}

fn open_shell(session: &Session, host: &str) -> Result<Channel, ShellError> {
    let ssh_err = |source| ShellError::Ssh {
        host: host.to_string(),
        source,
    };

    let mut channel = session.channel_session().map_err(ssh_err)?;
    channel.request_pty("xterm", None, None).map_err(ssh_err)?;
    channel.shell().map_err(ssh_err)?;
    Ok(channel)
}

/// Read 4 KiB chunks until one matches `expected`.
///
/// Output is collected only after a chunk containing a `>` prompt, so the
/// echoed command line is not part of the result.
fn read_until_match<R: Read>(
    reader: &mut R,
    expected: &Regex,
    timeout: Duration,
    host: &str,
    command: &str,
) -> Result<String, ShellError> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0_u8; 4096];
    let mut output = String::new();
    let mut collecting = false;

    loop {
        let received = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => 0,
            Err(source) => {
                return Err(ShellError::Io {
                    host: host.to_string(),
                    source,
                })
            }
        };

        if received > 0 {
            let chunk = String::from_utf8_lossy(&buf[..received]);
            if collecting {
                output.push_str(&chunk);
            }
            if chunk.contains('>') {
                collecting = true;
            }
            if expected.is_match(&chunk) {
                return Ok(output);
            }
        }

        if Instant::now() >= deadline {
            return Err(ShellError::Timeout {
                host: host.to_string(),
                command: command.to_string(),
                secs: timeout.as_secs(),
            });
        }

        if received == 0 {
            std::thread::sleep(IDLE_READ_PAUSE);
        }
    }
}
