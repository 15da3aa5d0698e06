//! Execution of commands on the nodes of the deployment under test.
//!
//! Every remote interaction of the suite (heketi-cli, gluster, the cluster client used to reach
//! the gluster pods) is a command line run on some host. The [`CommandRunner`] trait is the seam
//! between the suite and the way those commands reach their host.

use async_trait::async_trait;
use snafu::{ResultExt, Snafu};

/// Errors raised when a command could not be executed at all.
/// A command which ran and returned a non-zero exit code is not an error at this level.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExecError {
    #[snafu(display("Failed to spawn '{command}' for host {host}. Error {source}"))]
    Spawn {
        host: String,
        command: String,
        source: std::io::Error,
    },
    #[snafu(display("Host {host} is unreachable: {stderr}"))]
    Unreachable { host: String, stderr: String },
    #[snafu(display("Refusing to run an empty command on host {host}"))]
    EmptyCommand { host: String },
}

/// The outcome of a command which ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// Exit code, -1 if the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    /// Check whether the command exited successfully.
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs a command line on a given host.
#[async_trait]
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    /// Run `command` on `host` and collect its output.
    async fn run(&self, host: &str, command: &[String]) -> Result<CmdOutput, ExecError>;
}

/// Quote a single argument for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'\''"#))
    }
}

/// Join the arguments into a single shell command line.
pub fn shell_join(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Flags whose value is a credential.
const SECRET_FLAGS: &[&str] = &["--secret"];

/// Replaces credentials in displayed command lines.
pub const REDACTED: &str = "<redacted>";

/// Join the arguments into a command line fit for logs and errors, with the values of the
/// credential flags masked.
pub fn display_line(command: &[String]) -> String {
    let mut secret_next = false;
    command
        .iter()
        .map(|arg| {
            if std::mem::take(&mut secret_next) {
                return REDACTED.to_string();
            }
            if let Some((flag, _)) = arg.split_once('=') {
                if SECRET_FLAGS.contains(&flag) {
                    return format!("{flag}={REDACTED}");
                }
            }
            secret_next = SECRET_FLAGS.contains(&arg.as_str());
            shell_quote(arg)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn spawn(
    host: &str,
    program: &str,
    args: &[String],
    display: String,
) -> Result<CmdOutput, ExecError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .context(SpawnSnafu {
            host: host.to_string(),
            command: display,
        })?;
    Ok(CmdOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Runs commands through the `ssh` client, authenticating non-interactively.
#[derive(Debug, Clone, Default)]
pub struct SshRunner {
    user: Option<String>,
    options: Vec<String>,
}

impl SshRunner {
    /// New `Self` logging in as `user`, or as the ssh client's default user.
    pub fn new(user: Option<String>) -> Self {
        Self {
            user,
            options: vec![
                "BatchMode=yes".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "ConnectTimeout=10".to_string(),
            ],
        }
    }

    fn args(&self, host: &str, command: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(self.options.len() * 2 + 4);
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        if let Some(user) = &self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        args.push(host.to_string());
        args.push("--".to_string());
        args.push(shell_join(command));
        args
    }
}

/// The ssh client itself exits with 255 on connection failures, which is also a legitimate exit
/// code of the remote command, so the client's own diagnostics are used to tell them apart.
fn is_ssh_failure(stderr: &str) -> bool {
    let stderr = stderr.trim_start();
    stderr.starts_with("ssh:")
        || stderr.contains("Could not resolve hostname")
        || stderr.contains("Connection refused")
        || stderr.contains("Connection timed out")
        || stderr.contains("Permission denied (publickey")
        || stderr.contains("Host key verification failed")
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn run(&self, host: &str, command: &[String]) -> Result<CmdOutput, ExecError> {
        if command.is_empty() {
            return EmptyCommandSnafu { host }.fail();
        }
        let line = display_line(command);
        tracing::debug!(host, command = %line, "Running remote command");
        let output = spawn(host, "ssh", &self.args(host, command), line).await?;
        if output.code == 255 && is_ssh_failure(&output.stderr) {
            return UnreachableSnafu {
                host,
                stderr: output.stderr.trim().to_string(),
            }
            .fail();
        }
        Ok(output)
    }
}

/// Runs commands on the local host, for when the suite runs on the control node itself.
#[derive(Debug, Clone, Default)]
pub struct LocalRunner {}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, host: &str, command: &[String]) -> Result<CmdOutput, ExecError> {
        let Some((program, args)) = command.split_first() else {
            return EmptyCommandSnafu { host }.fail();
        };
        let line = display_line(command);
        tracing::debug!(host, command = %line, "Running local command");
        spawn(host, program, args, line).await
    }
}
