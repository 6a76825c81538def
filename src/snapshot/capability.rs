//! Capabilities composed by the replicator.
//!
//! The local manager lists, sends and receives; a remote host only lists and
//! receives. Keeping the traits separate lets [`Replicator`](super::Replicator)
//! state exactly what it needs from each side.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use super::{Name, SnapshotError};

/// Future returned by snapshot capabilities.
pub type SnapshotFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, SnapshotError>> + Send + 'a>>;

/// Lists managed snapshots.
pub trait Lister: Sync {
    /// Returns every managed snapshot, in no particular order.
    fn list_snapshots(&self) -> SnapshotFuture<'_, Vec<Name>>;
}

/// Produces snapshot streams.
pub trait Sender: Sync {
    /// Writes snapshot `name` to `stream`, incrementally from `reference`
    /// when one is given.
    fn send_snapshot<'a>(
        &'a self,
        name: &'a Name,
        stream: &'a mut (dyn AsyncWrite + Unpin + Send),
        reference: Option<&'a Name>,
    ) -> SnapshotFuture<'a, ()>;
}

/// Consumes snapshot streams.
pub trait Receiver: Sync {
    /// Reads snapshot `name` from `stream` into `target_file_system`.
    fn receive_snapshot<'a>(
        &'a self,
        target_file_system: &'a str,
        name: &'a Name,
        stream: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> SnapshotFuture<'a, ()>;
}
