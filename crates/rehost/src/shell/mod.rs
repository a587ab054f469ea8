//! Remote command execution over SSH.
//!
//! [`ShellConnector`] opens sessions, [`RemoteShell`] runs commands on an
//! open session. [`run_session`] is the common pattern: connect, run a
//! fixed list of [`ShellStep`]s, always disconnect.

mod ssh;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

pub use ssh::{SshConnector, SshSession};

/// Errors raised while talking to a remote host.
#[derive(Debug, Error)]
pub enum ShellError {
    /// TCP connection could not be established.
    #[error("failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The server refused the credentials.
    #[error("SSH authentication failed for {user}@{host}")]
    Auth { host: String, user: String },

    /// libssh2 reported an error.
    #[error("SSH error on {host}: {source}")]
    Ssh {
        host: String,
        #[source]
        source: ssh2::Error,
    },

    /// Reading or writing a channel failed.
    #[error("I/O error on {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// A command exited with a non-zero status.
    #[error("`{command}` on {host} exited with status {status}: {stderr}")]
    Command {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    /// Expected output did not show up in time.
    #[error("timed out after {secs}s waiting for output of `{command}` on {host}")]
    Timeout {
        host: String,
        command: String,
        secs: u64,
    },

    /// The blocking SSH worker panicked or was cancelled.
    #[error("SSH worker failed: {0}")]
    Worker(String),
}

/// Password credentials for an SSH login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Captured output of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// An open shell session on a remote host.
#[async_trait]
pub trait RemoteShell: Send {
    /// Host this session is connected to.
    fn host(&self) -> &str;

    /// Run `command` and capture its output.
    async fn execute(&mut self, command: &str) -> Result<CommandOutput, ShellError>;

    /// Send `command` to the interactive shell and collect output until a
    /// chunk matches `expected`.
    async fn invoke(
        &mut self,
        command: &str,
        expected: &Regex,
        timeout: Duration,
    ) -> Result<String, ShellError>;

    /// Disconnect. Errors are logged, never returned.
    async fn close(&mut self);
}

/// Opens shell sessions.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    /// Connect and authenticate to `host`.
    async fn connect(
        &self,
        host: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn RemoteShell>, ShellError>;
}

/// A command in a scripted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellStep {
    pub command: String,
    /// Fail the session on a non-zero exit status or transport error.
    pub checked: bool,
}

impl ShellStep {
    /// A step that must succeed.
    #[must_use]
    pub fn checked(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            checked: true,
        }
    }

    /// A step whose failure is only logged (e.g. `reboot`, which drops the
    /// connection).
    #[must_use]
    pub fn unchecked(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            checked: false,
        }
    }
}

/// Run `command` and turn a non-zero exit status into an error.
///
/// # Errors
/// Returns the transport error or [`ShellError::Command`].
pub async fn run_checked(
    shell: &mut dyn RemoteShell,
    command: &str,
) -> Result<CommandOutput, ShellError> {
    let output = shell.execute(command).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(ShellError::Command {
            host: shell.host().to_string(),
            command: command.to_string(),
            status: output.exit_status,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

/// Run `steps` in order on an already open session.
///
/// # Errors
/// Stops at the first failing checked step.
pub async fn run_steps(shell: &mut dyn RemoteShell, steps: &[ShellStep]) -> Result<(), ShellError> {
    for step in steps {
        debug!(host = %shell.host(), command = %step.command, "Running remote command");
        if step.checked {
            run_checked(shell, &step.command).await?;
        } else if let Err(e) = shell.execute(&step.command).await {
            warn!(host = %shell.host(), command = %step.command, error = %e, "Ignoring command failure");
        }
    }
    Ok(())
}

/// Connect to `host`, run `steps`, and disconnect whatever the outcome.
///
/// # Errors
/// Returns the connection error or the first failing checked step.
pub async fn run_session(
    connector: &dyn ShellConnector,
    host: &str,
    credentials: &Credentials,
    steps: &[ShellStep],
) -> Result<(), ShellError> {
    let mut shell = connector.connect(host, credentials).await?;
    let result = run_steps(shell.as_mut(), steps).await;
    shell.close().await;
    result
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Shell that fails commands containing "fail" and records everything.
    struct ScriptedShell {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl RemoteShell for ScriptedShell {
        fn host(&self) -> &str {
            "pikvm-host-a.amd.com"
        }

        async fn execute(&mut self, command: &str) -> Result<CommandOutput, ShellError> {
            self.log.lock().unwrap().push(command.to_string());
            if command.contains("drop") {
                return Err(ShellError::Worker("connection dropped".to_string()));
            }
            Ok(CommandOutput {
                exit_status: i32::from(command.contains("fail")),
                stderr: "nope\n".to_string(),
                ..CommandOutput::default()
            })
        }

        async fn invoke(
            &mut self,
            _command: &str,
            _expected: &Regex,
            _timeout: Duration,
        ) -> Result<String, ShellError> {
            Ok(String::new())
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().push("<close>".to_string());
        }
    }

    struct ScriptedConnector {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ShellConnector for ScriptedConnector {
        async fn connect(
            &self,
            _host: &str,
            _credentials: &Credentials,
        ) -> Result<Box<dyn RemoteShell>, ShellError> {
            Ok(Box::new(ScriptedShell {
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[tokio::test]
    async fn test_session_closes_after_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector { log: Arc::clone(&log) };
        let steps = [ShellStep::checked("rw"), ShellStep::unchecked("reboot drop")];

        run_session(&connector, "pikvm", &Credentials::new("root", "pw"), &steps)
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["rw", "reboot drop", "<close>"]);
    }

    #[tokio::test]
    async fn test_session_closes_after_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector { log: Arc::clone(&log) };
        let steps = [ShellStep::checked("fail here"), ShellStep::checked("never")];

        let err = run_session(&connector, "pikvm", &Credentials::new("root", "pw"), &steps)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ShellError::Command { status: 1, ref stderr, .. } if stderr == "nope"
        ));
        assert_eq!(*log.lock().unwrap(), vec!["fail here", "<close>"]);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("amd", "hunter2"));
        assert!(rendered.contains("amd"));
        assert!(!rendered.contains("hunter2"));
    }
}
