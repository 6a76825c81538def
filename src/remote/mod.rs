//! Replication targets reached over SSH.
//!
//! [`RemoteHost`] holds one multiplexed OpenSSH connection. [`dial`] starts a
//! background master on a private control socket; every later operation
//! runs a short-lived `ssh` client through that socket, which invokes `zsm`
//! on the far side. The host key is pinned through a per-connection
//! `known_hosts` file, so an unexpected key fails the dial rather than
//! prompting.
//!
//! [`dial`]: RemoteHost::dial

use std::mem;

use camino::Utf8PathBuf;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::process::{CommandIo, CommandOutput, CommandRunner, ProcessCommandRunner};
use crate::snapshot::{Lister, Name, Receiver, SnapshotError, SnapshotFuture};

mod command;
mod config;
mod control;
mod error;

use control::ControlChannel;

pub use config::{DEFAULT_SSH_PORT, RemoteConfig, expand_tilde};
pub use error::RemoteError;

/// Exit code the `ssh` client reserves for its own failures.
const SSH_FAILURE: i32 = 255;

#[derive(Debug)]
enum ConnectionState {
    Disconnected,
    Connected(ControlChannel),
}

/// A `zsm` installation on another machine, reached over SSH.
///
/// Implements [`Lister`] and [`Receiver`] so it can act as the destination
/// of a [`Replicator`](crate::snapshot::Replicator) transfer. Call
/// [`close`](Self::close) when done; dropping a connected host leaves the
/// background master running until `ssh` notices the socket is gone.
#[derive(Debug)]
pub struct RemoteHost<R: CommandRunner = ProcessCommandRunner> {
    config: RemoteConfig,
    runner: R,
    state: Mutex<ConnectionState>,
}

impl RemoteHost<ProcessCommandRunner> {
    /// Creates a disconnected host that runs the system `ssh` client.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Config`] when the configuration is incomplete.
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        Self::with_runner(config, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> RemoteHost<R> {
    /// Creates a disconnected host using a custom runner.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Config`] when the configuration is incomplete.
    pub fn with_runner(config: RemoteConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self {
            config,
            runner,
            state: Mutex::new(ConnectionState::Disconnected),
        })
    }

    /// Connection settings.
    #[must_use]
    pub const fn config(&self) -> &RemoteConfig {
        &self.config
    }

    /// Whether a master connection is currently established.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.lock().await, ConnectionState::Connected(_))
    }

    /// Establishes the master connection. Does nothing when already
    /// connected.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] when the control directory cannot
    /// be prepared or the master fails to start. The host stays
    /// disconnected and the control directory is removed.
    pub async fn dial(&self) -> Result<(), RemoteError> {
        const OPERATION: &str = "dial";

        let mut state = self.state.lock().await;
        if matches!(*state, ConnectionState::Connected(_)) {
            return Ok(());
        }

        let base = self.control_base()?;
        let pin = format!(
            "{} {}",
            self.config.known_hosts_pattern(),
            self.config.ssh_host_key.trim()
        );
        let channel = ControlChannel::create(&base, &pin).map_err(|err| RemoteError::Transport {
            operation: OPERATION,
            message: format!("control directory under {base}: {err}"),
        })?;

        let args = command::master_args(&self.config, &channel);
        debug!(destination = %self.config.destination(), control = %channel.directory(), "starting ssh master");
        let failure = match self
            .runner
            .run(&self.config.ssh_bin, &args, CommandIo::detached())
            .await
        {
            Ok(output) if output.is_success() => None,
            Ok(output) => Some(master_failure(&channel, &output)),
            Err(err) => Some(err.to_string()),
        };

        if let Some(message) = failure {
            if let Err(err) = channel.remove() {
                warn!(control = %channel.directory(), error = %err, "failed to remove control directory");
            }
            return Err(RemoteError::Transport {
                operation: OPERATION,
                message,
            });
        }

        info!(destination = %self.config.destination(), port = self.config.ssh_port, "connected");
        *state = ConnectionState::Connected(channel);
        Ok(())
    }

    /// Stops the master connection and removes the control directory.
    /// Does nothing when disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] when the control directory cannot
    /// be removed. The host is disconnected either way.
    pub async fn close(&self) -> Result<(), RemoteError> {
        let mut state = self.state.lock().await;
        let ConnectionState::Connected(channel) =
            mem::replace(&mut *state, ConnectionState::Disconnected)
        else {
            return Ok(());
        };

        let args = command::exit_args(&self.config, &channel);
        match self
            .runner
            .run(&self.config.ssh_bin, &args, CommandIo::captured())
            .await
        {
            Ok(output) if output.is_success() => {}
            Ok(output) => {
                warn!(code = ?output.code, stderr = output.stderr.trim(), "ssh master did not exit cleanly");
            }
            Err(err) => warn!(error = %err, "failed to stop ssh master"),
        }

        channel.remove().map_err(|err| RemoteError::Transport {
            operation: "close",
            message: format!("remove {}: {err}", channel.directory()),
        })?;
        info!(destination = %self.config.destination(), "disconnected");
        Ok(())
    }

    /// Lists the managed snapshots on the remote host.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotConnected`] before [`dial`](Self::dial),
    /// [`RemoteError::Transport`] or [`RemoteError::Exit`] when the remote
    /// command fails, and [`RemoteError::Decode`] for the first malformed
    /// record.
    pub async fn list(&self) -> Result<Vec<Name>, RemoteError> {
        let output = self
            .session("list", &["-o", "jsonl"], CommandIo::captured())
            .await?;
        output
            .stdout
            .split_inclusive(|byte| *byte == b'\n')
            .map(|line| line.strip_suffix(b"\n").unwrap_or(line))
            .map(|record| {
                Name::from_json(record).map_err(|source| RemoteError::Decode {
                    record: String::from_utf8_lossy(record).into_owned(),
                    source,
                })
            })
            .collect()
    }

    /// Streams `stream` into `zsm receive` on the remote host.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotConnected`] before [`dial`](Self::dial), and
    /// [`RemoteError::Transport`] or [`RemoteError::Exit`] when the remote
    /// command fails.
    pub async fn receive(
        &self,
        target_file_system: &str,
        name: &Name,
        stream: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<(), RemoteError> {
        let text = name.to_string();
        self.session(
            "receive",
            &[target_file_system, text.as_str()],
            CommandIo::reading_from(stream),
        )
        .await?;
        info!(snapshot = %name, target = target_file_system, "sent snapshot to remote host");
        Ok(())
    }

    async fn session(
        &self,
        subcommand: &'static str,
        words: &[&str],
        io: CommandIo<'_>,
    ) -> Result<CommandOutput, RemoteError> {
        let args = {
            let state = self.state.lock().await;
            let ConnectionState::Connected(channel) = &*state else {
                return Err(RemoteError::NotConnected);
            };
            let remote_words: Vec<&str> = std::iter::once(subcommand)
                .chain(words.iter().copied())
                .collect();
            let remote = command::remote_command(&self.config.remote_zsm, &remote_words);
            command::session_args(&self.config, channel, &remote)
        };

        debug!(subcommand, "starting remote session");
        let output = self
            .runner
            .run(&self.config.ssh_bin, &args, io)
            .await
            .map_err(|err| RemoteError::Transport {
                operation: subcommand,
                message: err.to_string(),
            })?;

        match output.code {
            Some(0) => Ok(output),
            Some(SSH_FAILURE) | None => Err(RemoteError::Transport {
                operation: subcommand,
                message: transport_message(&output),
            }),
            Some(exit_code) => Err(RemoteError::Exit {
                subcommand: subcommand.to_owned(),
                exit_code,
                stderr: output.stderr.trim().to_owned(),
            }),
        }
    }

    fn control_base(&self) -> Result<Utf8PathBuf, RemoteError> {
        self.config.control_dir.as_deref().map_or_else(
            || {
                Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|path| {
                    RemoteError::Transport {
                        operation: "dial",
                        message: format!("temporary directory {} is not UTF-8", path.display()),
                    }
                })
            },
            |dir| Ok(Utf8PathBuf::from(expand_tilde(dir.trim()))),
        )
    }
}

fn master_failure(channel: &ControlChannel, output: &CommandOutput) -> String {
    let log = channel.read_log();
    if !log.is_empty() {
        return log;
    }
    output.code.map_or_else(
        || String::from("ssh terminated by signal"),
        |code| format!("ssh exited with code {code}"),
    )
}

fn transport_message(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_owned();
    }
    output.code.map_or_else(
        || String::from("connection lost"),
        |code| format!("ssh exited with code {code}"),
    )
}

impl<R: CommandRunner> Lister for RemoteHost<R> {
    fn list_snapshots(&self) -> SnapshotFuture<'_, Vec<Name>> {
        Box::pin(async move { self.list().await.map_err(SnapshotError::from) })
    }
}

impl<R: CommandRunner> Receiver for RemoteHost<R> {
    fn receive_snapshot<'a>(
        &'a self,
        target_file_system: &'a str,
        name: &'a Name,
        stream: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> SnapshotFuture<'a, ()> {
        Box::pin(async move {
            self.receive(target_file_system, name, stream)
                .await
                .map_err(SnapshotError::from)
        })
    }
}

#[cfg(test)]
mod tests;
