//! Snapshot naming, retention, management and replication.

mod capability;
mod error;
mod manager;
mod name;
mod retention;
mod transfer;

pub use capability::{Lister, Receiver, Sender, SnapshotFuture};
pub use error::{SnapshotError, TransferError};
pub use manager::{CreateOptions, SnapshotManager};
pub use name::{Name, NameError};
pub use retention::{BucketConfig, Interval, clean};
pub use transfer::{DEFAULT_PIPE_CAPACITY, Replicator, TransferStep, plan};

#[cfg(test)]
mod tests;
