//! Storage backend abstraction consumed by the snapshot manager.
//!
//! A backend knows nothing about snapshot naming or retention. It lists
//! datasets, creates and destroys snapshots by full name, and moves
//! snapshot streams in and out. The production implementation drives the
//! `zfs` binary; tests use an in-memory fake.

use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::process::CommandError;

/// Dataset type requested from [`StorageBackend::list`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ListKind {
    /// File systems (datasets that can be snapshotted).
    FileSystem,
    /// Snapshots of any file system.
    Snapshot,
}

impl ListKind {
    /// Type name understood by `zfs list -t`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileSystem => "filesystem",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Errors raised by storage backends.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// The configured storage command does not exist.
    #[error("zfs cmd: not found: {path}")]
    NotFound {
        /// Path that was checked.
        path: Utf8PathBuf,
    },
    /// The configured storage command is not a regular file.
    #[error("zfs cmd: not a file: {path}")]
    NotAFile {
        /// Path that was checked.
        path: Utf8PathBuf,
    },
    /// The configured storage command could not be inspected.
    #[error("zfs cmd: {path}: {message}")]
    Inaccessible {
        /// Path that was checked.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// The storage command exited with a non-zero status.
    #[error("zfs {subcommand}: exit code {exit_code}: {stderr}")]
    Exit {
        /// Storage subcommand that failed.
        subcommand: String,
        /// Exit code reported by the process.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },
    /// The storage command was terminated without an exit code.
    #[error("zfs {subcommand}: terminated by signal: {stderr}")]
    Terminated {
        /// Storage subcommand that failed.
        subcommand: String,
        /// Captured standard error.
        stderr: String,
    },
    /// A listing that must never be empty produced no output.
    #[error("zfs {subcommand}: no output")]
    NoOutput {
        /// Storage subcommand that produced nothing.
        subcommand: String,
    },
    /// The storage command could not be run or streamed.
    #[error("zfs {subcommand}: {source}")]
    Command {
        /// Storage subcommand that failed.
        subcommand: String,
        /// Underlying process failure.
        #[source]
        source: CommandError,
    },
}

/// Future returned by [`StorageBackend`] operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Storage operations required to manage and replicate snapshots.
pub trait StorageBackend: Send + Sync {
    /// Creates the snapshot `name` (`<file system>@<suffix>`).
    fn create_snapshot<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()>;

    /// Lists dataset names of the given kind.
    ///
    /// Listing snapshots on a pool without any yields an empty vector.
    /// Listing file systems never legitimately yields nothing, so an empty
    /// result is reported as [`BackendError::NoOutput`].
    fn list(&self, kind: ListKind) -> BackendFuture<'_, Vec<String>>;

    /// Destroys the snapshot `name`.
    fn destroy<'a>(&'a self, name: &'a str) -> BackendFuture<'a, ()>;

    /// Receives a snapshot stream from `stream` as `name`.
    fn receive<'a>(
        &'a self,
        name: &'a str,
        stream: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> BackendFuture<'a, ()>;

    /// Writes the stream for snapshot `name` to `stream`.
    ///
    /// With a `reference` the stream is incremental and carries every
    /// intermediate snapshot between the reference and `name`.
    fn send<'a>(
        &'a self,
        name: &'a str,
        reference: Option<&'a str>,
        stream: &'a mut (dyn AsyncWrite + Unpin + Send),
    ) -> BackendFuture<'a, ()>;
}
