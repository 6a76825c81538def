//! Error types for snapshot management and replication.

use thiserror::Error;

use super::{Name, NameError};
use crate::backend::BackendError;
use crate::remote::RemoteError;

/// Errors raised by the snapshot capabilities.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SnapshotError {
    /// A file system selected for snapshotting does not exist.
    #[error("unknown filesystem: {0:?}")]
    UnknownFileSystem(String),
    /// The receive target file system does not exist.
    #[error("receive snapshot: missing file system: {0}")]
    MissingFileSystem(String),
    /// The snapshot to receive already exists.
    #[error("receive snapshot: exists: {0}")]
    SnapshotExists(Name),
    /// The snapshot to send does not exist.
    #[error("send snapshot: unknown snapshot: {0}")]
    UnknownSnapshot(Name),
    /// The incremental reference does not exist.
    #[error("send snapshot: unknown reference: {0}")]
    UnknownReference(Name),
    /// A file system name cannot form a snapshot name.
    #[error("{operation}: {source}")]
    InvalidName {
        /// Operation being performed.
        operation: &'static str,
        /// Underlying naming failure.
        #[source]
        source: NameError,
    },
    /// The storage backend failed.
    #[error("{operation}: {source}")]
    Backend {
        /// Operation being performed.
        operation: &'static str,
        /// Underlying backend failure.
        #[source]
        source: BackendError,
    },
    /// The remote host failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Errors raised by [`Replicator::transfer`](super::Replicator::transfer).
#[derive(Debug, Error)]
pub enum TransferError {
    /// The source inventory could not be listed.
    #[error("transfer: list source: {0}")]
    ListSource(#[source] SnapshotError),
    /// The destination inventory could not be listed.
    #[error("transfer: list destination: {0}")]
    ListDestination(#[source] SnapshotError),
    /// The destination holds more snapshots of a file system than the source.
    #[error("transfer: {file_system}: dst has more snapshots: {destination} > {source_count}")]
    DestinationAhead {
        /// File system being compared.
        file_system: String,
        /// Snapshot count at the destination.
        destination: usize,
        /// Snapshot count at the source.
        source_count: usize,
    },
    /// The destination holds snapshots of a file system, none of which
    /// exist at the source.
    #[error("transfer: {file_system}: no snapshot in common with destination")]
    Diverged {
        /// File system being compared.
        file_system: String,
    },
    /// The source failed to produce the stream.
    #[error("transfer: send {name}: {source}")]
    Send {
        /// Snapshot being sent.
        name: Name,
        /// Underlying failure.
        #[source]
        source: Box<SnapshotError>,
    },
    /// The destination failed to consume the stream.
    #[error("transfer: receive {name}: {source}")]
    Receive {
        /// Snapshot being received.
        name: Name,
        /// Underlying failure.
        #[source]
        source: Box<SnapshotError>,
    },
    /// The in-memory pipe between producer and consumer failed.
    #[error("transfer: pipe: {0}")]
    Pipe(#[source] std::io::Error),
    /// The transfer was cancelled.
    #[error("transfer: cancelled")]
    Cancelled,
}
