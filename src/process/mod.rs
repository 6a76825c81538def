//! Process execution seam shared by the `zfs` backend and the SSH transport.
//!
//! Both collaborators shell out to system binaries. Routing every invocation
//! through [`CommandRunner`] keeps the argument construction testable with a
//! scripted runner while the real [`ProcessCommandRunner`] streams stdin and
//! stdout through `tokio::process` without buffering whole snapshots.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

mod runner;

pub use runner::ProcessCommandRunner;

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output. Empty when stdout was streamed to a caller
    /// supplied writer or discarded.
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Stream wiring for a single command invocation.
///
/// Without a reader the child's stdin is `/dev/null`; without a writer its
/// stdout is captured into [`CommandOutput::stdout`]. A detached invocation
/// discards stdout and stderr entirely, which is required for commands that
/// fork a long-lived background process holding those descriptors open.
#[derive(Default)]
pub struct CommandIo<'a> {
    /// Data streamed into the child's stdin.
    pub stdin: Option<&'a mut (dyn AsyncRead + Unpin + Send)>,
    /// Destination for the child's stdout.
    pub stdout: Option<&'a mut (dyn AsyncWrite + Unpin + Send)>,
    /// Discard stdout and stderr instead of capturing them.
    pub detached: bool,
}

impl<'a> CommandIo<'a> {
    /// Captures stdout and stderr; stdin is empty.
    #[must_use]
    pub fn captured() -> Self {
        Self::default()
    }

    /// Streams `reader` into the child's stdin.
    #[must_use]
    pub fn reading_from(reader: &'a mut (dyn AsyncRead + Unpin + Send)) -> Self {
        Self {
            stdin: Some(reader),
            ..Self::default()
        }
    }

    /// Streams the child's stdout into `writer`.
    #[must_use]
    pub fn writing_to(writer: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self {
            stdout: Some(writer),
            ..Self::default()
        }
    }

    /// Discards all output.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            detached: true,
            ..Self::default()
        }
    }
}

/// Errors raised while starting or feeding a child process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when copying data to or from the child fails.
    #[error("{program}: stream failed: {message}")]
    Stream {
        /// Command whose streams failed.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Future returned by [`CommandRunner::run`].
pub type CommandFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with the given arguments and stream wiring.
    ///
    /// A non-zero exit status is not an error at this layer; callers inspect
    /// [`CommandOutput::code`] and map it into their own taxonomy. The
    /// streams in `io` may outlive the borrowed program and arguments.
    fn run<'a, 'io: 'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
        io: CommandIo<'io>,
    ) -> CommandFuture<'a>;
}

#[cfg(test)]
mod tests;
