//! Process execution
//!
//! Runs a resolved command as a direct child process (never through a
//! shell). stdout and stderr share the write end of one pipe, so the
//! captured buffer keeps the order in which the process wrote.
//!
//! By default there is no deadline and no output cap; both can be set
//! through [`ExecLimits`]. Children are killed if the calling future is
//! dropped, so an abandoned request does not leave a diagnostic running.

use std::future::Future;
use std::io;
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ConfigLookup, Settings};
use crate::resolve::ResolvedCommand;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("exec {command}: {source}")]
    Spawn { command: String, source: io::Error },
    /// Non-zero exit. Whatever the process printed is kept in `output`.
    #[error("{reason}")]
    Exit {
        code: Option<i32>,
        reason: String,
        output: Vec<u8>,
    },
    #[error("{command} timed out after {}ms", .after.as_millis())]
    Timeout { command: String, after: Duration },
    #[error("output of {command} exceeded {limit} bytes")]
    OutputLimit { command: String, limit: usize },
    #[error("reading output of {command}: {source}")]
    Io { command: String, source: io::Error },
}

impl ExecError {
    /// Output captured before the failure, when there is any.
    pub fn output(&self) -> Option<&[u8]> {
        match self {
            ExecError::Exit { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Runs resolved commands and returns their combined output
pub trait CommandExecutor: Send + Sync {
    fn execute(
        &self,
        command: &ResolvedCommand,
    ) -> impl Future<Output = Result<Vec<u8>, ExecError>> + Send;
}

/// Optional bounds on a single execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Option<Duration>,
    pub max_output: Option<usize>,
}

impl ExecLimits {
    /// `exec.timeout` and `exec.max_output`; zero means unbounded.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let timeout = settings.get_duration("exec.timeout")?;
        let max_output = settings.get_u64("exec.max_output")?;
        let max_output = usize::try_from(max_output).map_err(|_| ConfigError::InvalidValue {
            key: "exec.max_output".into(),
            value: settings.get_string("exec.max_output"),
            expected: "a byte count that fits in memory",
        })?;
        Ok(Self {
            timeout: (!timeout.is_zero()).then_some(timeout),
            max_output: (max_output > 0).then_some(max_output),
        })
    }
}

/// Executes commands with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    limits: ExecLimits,
}

impl ProcessExecutor {
    pub fn new(limits: ExecLimits) -> Self {
        Self { limits }
    }

    async fn run(&self, command: &ResolvedCommand) -> Result<Vec<u8>, ExecError> {
        let start = Instant::now();
        info!("Executing: {} {:?}", command.executable, command.arguments);

        let spawn_err = |source: io::Error| ExecError::Spawn {
            command: command.executable.clone(),
            source,
        };

        let (reader, writer) = io::pipe().map_err(spawn_err)?;
        let stderr_writer = writer.try_clone().map_err(spawn_err)?;

        // The Command is a temporary, so the parent's write ends close once
        // the child is spawned and EOF arrives when the child exits.
        let mut child = Command::new(&command.executable)
            .args(&command.arguments)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer)
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let mut merged =
            pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(|source| ExecError::Io {
                command: command.executable.clone(),
                source,
            })?;

        let captured = match self.limits.timeout {
            Some(after) => {
                let capturing = capture(&mut child, &mut merged, command, self.limits);
                let bounded = tokio::time::timeout(after, capturing).await;
                match bounded {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("{} timed out after {:?}, killing", command.executable, after);
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill {}: {e}", command.executable);
                        }
                        return Err(ExecError::Timeout {
                            command: command.executable.clone(),
                            after,
                        });
                    }
                }
            }
            None => capture(&mut child, &mut merged, command, self.limits).await,
        };
        let (output, status) = captured?;

        debug!(
            "{} finished in {}ms ({} bytes, {})",
            command.executable,
            start.elapsed().as_millis(),
            output.len(),
            status
        );

        if status.success() {
            Ok(output)
        } else {
            Err(ExecError::Exit {
                code: status.code(),
                reason: describe_status(status),
                output,
            })
        }
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute(
        &self,
        command: &ResolvedCommand,
    ) -> impl Future<Output = Result<Vec<u8>, ExecError>> + Send {
        self.run(command)
    }
}

/// Read the shared pipe until EOF, then reap the child.
async fn capture(
    child: &mut Child,
    reader: &mut pipe::Receiver,
    command: &ResolvedCommand,
    limits: ExecLimits,
) -> Result<(Vec<u8>, ExitStatus), ExecError> {
    let io_err = |source: io::Error| ExecError::Io {
        command: command.executable.clone(),
        source,
    };

    let mut buf = [0u8; READ_CHUNK];
    let mut output = Vec::new();

    loop {
        let n = reader.read(&mut buf).await.map_err(io_err)?;
        if n == 0 {
            break;
        }
        output.extend_from_slice(&buf[..n]);

        if let Some(limit) = limits.max_output {
            if output.len() > limit {
                warn!("{} exceeded {limit} bytes of output, killing", command.executable);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {e}", command.executable);
                }
                return Err(ExecError::OutputLimit {
                    command: command.executable.clone(),
                    limit,
                });
            }
        }
    }

    let status = child.wait().await.map_err(io_err)?;
    Ok((output, status))
}

fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit status {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {signal}");
        }
    }
    status.to_string()
}
