//! `zfs` command-line adapter implementing [`StorageBackend`].

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::backend::{BackendError, BackendFuture, ListKind, StorageBackend};
use crate::process::{CommandIo, CommandOutput, CommandRunner, ProcessCommandRunner};

/// Default location of the `zfs` binary.
pub const DEFAULT_ZFS_CMD: &str = "/sbin/zfs";

/// Storage backend that shells out to the `zfs` binary.
#[derive(Clone, Debug)]
pub struct ZfsCommand<R: CommandRunner = ProcessCommandRunner> {
    program: Utf8PathBuf,
    runner: R,
}

impl ZfsCommand<ProcessCommandRunner> {
    /// Creates an adapter for the binary at `program`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotFound`] when the path does not exist,
    /// [`BackendError::NotAFile`] when it is a directory or other non-file,
    /// and [`BackendError::Inaccessible`] when it cannot be inspected.
    pub fn new(program: impl Into<Utf8PathBuf>) -> Result<Self, BackendError> {
        let path = program.into();
        check_program(&path)?;
        Ok(Self::with_runner(path, ProcessCommandRunner))
    }
}

impl<R: CommandRunner> ZfsCommand<R> {
    /// Creates an adapter using a custom runner without checking the path.
    #[must_use]
    pub fn with_runner(program: impl Into<Utf8PathBuf>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    /// Path of the wrapped binary.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    async fn execute(
        &self,
        subcommand: &str,
        args: &[OsString],
        io: CommandIo<'_>,
    ) -> Result<CommandOutput, BackendError> {
        debug!(program = %self.program, subcommand, "running zfs");
        let output = self
            .runner
            .run(self.program.as_str(), args, io)
            .await
            .map_err(|source| BackendError::Command {
                subcommand: subcommand.to_owned(),
                source,
            })?;

        match output.code {
            Some(0) => Ok(output),
            Some(exit_code) => Err(BackendError::Exit {
                subcommand: subcommand.to_owned(),
                exit_code,
                stderr: output.stderr.trim().to_owned(),
            }),
            None => Err(BackendError::Terminated {
                subcommand: subcommand.to_owned(),
                stderr: output.stderr.trim().to_owned(),
            }),
        }
    }

    async fn list_names(&self, kind: ListKind) -> Result<Vec<String>, BackendError> {
        let args = os_args(&["list", "-H", "-t", kind.as_str(), "-o", "name"]);
        let output = self.execute("list", &args, CommandIo::captured()).await?;
        let names: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        if names.is_empty() && kind == ListKind::FileSystem {
            return Err(BackendError::NoOutput {
                subcommand: String::from("list"),
            });
        }
        Ok(names)
    }
}

impl<R: CommandRunner> StorageBackend for ZfsCommand<R> {
    fn create_snapshot<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let args = os_args(&["snapshot", name]);
            self.execute("snapshot", &args, CommandIo::captured())
                .await
                .map(drop)
        })
    }

    fn list(&self, kind: ListKind) -> BackendFuture<'_, Vec<String>> {
        Box::pin(self.list_names(kind))
    }

    fn destroy<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let args = os_args(&["destroy", name]);
            self.execute("destroy", &args, CommandIo::captured())
                .await
                .map(drop)
        })
    }

    fn receive<'a>(
        &'a self,
        name: &'a str,
        stream: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let args = os_args(&["receive", name]);
            self.execute("receive", &args, CommandIo::reading_from(stream))
                .await
                .map(drop)
        })
    }

    fn send<'a>(
        &'a self,
        name: &'a str,
        reference: Option<&'a str>,
        stream: &'a mut (dyn AsyncWrite + Unpin + Send),
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut args = vec![OsString::from("send")];
            if let Some(base) = reference {
                args.push(OsString::from("-I"));
                args.push(OsString::from(base));
            }
            args.push(OsString::from(name));
            self.execute("send", &args, CommandIo::writing_to(stream))
                .await
                .map(drop)
        })
    }
}

fn os_args(args: &[&str]) -> Vec<OsString> {
    args.iter().map(OsString::from).collect()
}

fn check_program(path: &Utf8Path) -> Result<(), BackendError> {
    let metadata = path.metadata().map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            BackendError::NotFound {
                path: path.to_owned(),
            }
        } else {
            BackendError::Inaccessible {
                path: path.to_owned(),
                message: err.to_string(),
            }
        }
    })?;
    if metadata.is_file() {
        Ok(())
    } else {
        Err(BackendError::NotAFile {
            path: path.to_owned(),
        })
    }
}
