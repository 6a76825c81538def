//! Core library for the `zsm` ZFS snapshot manager.
//!
//! The crate creates timestamped snapshots, prunes them with a bucketed
//! retention policy, and replicates them to another host over SSH as
//! incremental `zfs send` streams. Storage access goes through the
//! [`StorageBackend`] seam, implemented for the real `zfs` binary by
//! [`ZfsCommand`]; replication composes the [`Lister`], [`Sender`] and
//! [`Receiver`] capabilities of a local [`SnapshotManager`] and a
//! [`RemoteHost`].

pub mod backend;
pub mod config;
pub mod process;
pub mod remote;
pub mod snapshot;
pub mod test_support;
pub mod zfs;

pub use backend::{BackendError, ListKind, StorageBackend};
pub use config::{ConfigError, ZsmConfig};
pub use process::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use remote::{RemoteConfig, RemoteError, RemoteHost};
pub use snapshot::{
    BucketConfig, CreateOptions, Interval, Lister, Name, NameError, Receiver, Replicator, Sender,
    SnapshotError, SnapshotManager, TransferError,
};
pub use zfs::{DEFAULT_ZFS_CMD, ZfsCommand};
