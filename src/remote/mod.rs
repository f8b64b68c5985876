//! Remote command execution on managed hosts.
//!
//! Drivers talk to hosts through [`RemoteShell`] handles produced by a
//! [`ShellConnector`]. The production connector runs every command as a
//! separate `ssh` invocation authenticated by `sshpass`, so `open` only
//! verifies reachability and `close` has nothing to release. The password
//! reaches `sshpass` through its environment, never its arguments.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

use crate::config::ShellConfig;
use crate::model::Secret;

mod types;

pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner};

const MASK: &str = "******";

/// Variable `sshpass -e` reads the password from.
pub const SSHPASS_ENV: &str = "SSHPASS";

/// Future returned by shell operations.
pub type ShellFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ShellError>> + Send + 'a>>;

/// Errors raised by remote shells.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ShellError {
    /// Raised when a local helper process cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Operating system error message.
        message: String,
    },
    /// Raised when the host cannot be reached or rejects the login.
    #[error("cannot reach {host}: {message}")]
    Connection {
        /// Target host.
        host: String,
        /// Client error output.
        message: String,
    },
    /// Raised when a command exits unsuccessfully.
    #[error("`{command}` failed on {host} with status {code:?}: {stderr}")]
    CommandFailed {
        /// Target host.
        host: String,
        /// Command with sensitive values masked.
        command: String,
        /// Exit code, if the process reported one.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

/// Command interpreter on the remote side.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShellFlavor {
    /// A POSIX shell, reached over SSH.
    Posix,
    /// Windows PowerShell, reached over SSH.
    PowerShell,
}

/// Where and how to log in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShellTarget {
    /// Host name or address.
    pub host: String,
    /// SSH port; `22` when unset.
    pub port: Option<u16>,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: Secret,
    /// Remote interpreter.
    pub flavor: ShellFlavor,
}

/// A session on one remote host.
pub trait RemoteShell: Send + Sync {
    /// Verifies the host accepts the login.
    fn open(&self) -> ShellFuture<'_, ()>;

    /// Runs `command`, returning its output whatever the exit status.
    fn exec<'a>(&'a self, command: &'a str) -> ShellFuture<'a, CommandOutput>;

    /// Releases the session.
    fn close(&self) -> ShellFuture<'_, ()>;

    /// Runs `command` and returns its trimmed stdout, failing on a non-zero
    /// exit status.
    fn run<'a>(&'a self, command: &'a str) -> ShellFuture<'a, String> {
        Box::pin(async move {
            let output = self.exec(command).await?;
            if output.is_success() {
                return Ok(output.stdout.trim().to_owned());
            }
            Err(ShellError::CommandFailed {
                host: String::from("remote"),
                command: command.to_owned(),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            })
        })
    }
}

/// Creates [`RemoteShell`] handles for targets.
pub trait ShellConnector: Send + Sync {
    /// Returns an unopened shell for `target`.
    fn connect(&self, target: &ShellTarget) -> Box<dyn RemoteShell>;
}

/// [`ShellConnector`] that logs in with `sshpass` and `ssh`.
#[derive(Clone, Debug)]
pub struct SshConnector<R = ProcessCommandRunner> {
    config: ShellConfig,
    runner: Arc<R>,
}

impl SshConnector<ProcessCommandRunner> {
    /// Builds a connector that spawns real processes.
    #[must_use]
    pub fn with_process_runner(config: ShellConfig) -> Self {
        Self::new(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner + 'static> SshConnector<R> {
    /// Builds a connector over an explicit command runner.
    #[must_use]
    pub fn new(config: ShellConfig, runner: R) -> Self {
        Self {
            config,
            runner: Arc::new(runner),
        }
    }
}

impl<R: CommandRunner + 'static> ShellConnector for SshConnector<R> {
    fn connect(&self, target: &ShellTarget) -> Box<dyn RemoteShell> {
        Box::new(SshShell {
            config: self.config.clone(),
            runner: Arc::clone(&self.runner),
            target: target.clone(),
        })
    }
}

/// One host reached through `ssh`.
#[derive(Debug)]
pub struct SshShell<R> {
    config: ShellConfig,
    runner: Arc<R>,
    target: ShellTarget,
}

impl<R: CommandRunner + 'static> SshShell<R> {
    fn wrap_command(&self, command: &str) -> String {
        match self.target.flavor {
            ShellFlavor::Posix if self.target.username != "root" => {
                format!("sudo -n sh -c {}", escape(command.into()))
            }
            ShellFlavor::Posix => command.to_owned(),
            ShellFlavor::PowerShell => format!(
                "powershell -NoProfile -NonInteractive -Command {}",
                escape(command.into())
            ),
        }
    }

    fn build_args(&self, remote_command: &str) -> Vec<OsString> {
        let port = self.target.port.unwrap_or(22);
        let mut args = vec![
            OsString::from("-e"),
            OsString::from(&self.config.ssh_bin),
            OsString::from("-p"),
            OsString::from(port.to_string()),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.config.connect_timeout_secs
            )),
        ];

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            self.target.username, self.target.host
        )));
        args.push(OsString::from(remote_command));
        args
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, ShellError> {
        let wrapped = self.wrap_command(command);
        let args = self.build_args(&wrapped);
        debug!(
            host = %self.target.host,
            command = %mask(&wrapped, &self.target.password),
            "running remote command"
        );

        let runner = Arc::clone(&self.runner);
        let program = self.config.sshpass_bin.clone();
        let envs = [(
            OsString::from(SSHPASS_ENV),
            OsString::from(self.target.password.expose()),
        )];
        let output = tokio::task::spawn_blocking(move || runner.run(&program, &args, &envs))
            .await
            .map_err(|err| ShellError::Spawn {
                program: self.config.sshpass_bin.clone(),
                message: err.to_string(),
            })??;

        // ssh reserves 255 for its own failures; sshpass uses 5 for a bad login.
        if matches!(output.code, Some(255 | 5)) {
            return Err(ShellError::Connection {
                host: self.target.host.clone(),
                message: mask(output.stderr.trim(), &self.target.password),
            });
        }
        Ok(output)
    }
}

impl<R: CommandRunner + 'static> RemoteShell for SshShell<R> {
    fn open(&self) -> ShellFuture<'_, ()> {
        Box::pin(async move {
            let output = self.execute("true").await?;
            if output.is_success() {
                return Ok(());
            }
            Err(ShellError::Connection {
                host: self.target.host.clone(),
                message: mask(output.stderr.trim(), &self.target.password),
            })
        })
    }

    fn exec<'a>(&'a self, command: &'a str) -> ShellFuture<'a, CommandOutput> {
        Box::pin(self.execute(command))
    }

    fn close(&self) -> ShellFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn run<'a>(&'a self, command: &'a str) -> ShellFuture<'a, String> {
        Box::pin(async move {
            let output = self.execute(command).await?;
            if output.is_success() {
                return Ok(output.stdout.trim().to_owned());
            }
            Err(ShellError::CommandFailed {
                host: self.target.host.clone(),
                command: mask(command, &self.target.password),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            })
        })
    }
}

/// Replaces every occurrence of `secret` in `text` with a mask.
#[must_use]
pub fn mask(text: &str, secret: &Secret) -> String {
    if secret.is_empty() {
        return text.to_owned();
    }
    text.replace(secret.expose(), MASK)
}

#[cfg(test)]
mod tests;
