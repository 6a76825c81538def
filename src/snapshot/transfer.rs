//! Replication of snapshot inventories from a source to a destination.
//!
//! The replicator compares both inventories per file system and, for every
//! file system the destination lags behind on, streams the newest source
//! snapshot. When the destination already holds some snapshots the stream is
//! incremental from the newest one it has, so one stream carries every
//! missing intermediate snapshot.
//!
//! Each stream flows through a bounded in-memory pipe. The producer writes
//! into one half while the consumer reads from the other; a slow consumer
//! blocks the producer instead of buffering the whole snapshot.

use std::collections::{HashMap, HashSet};

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::capability::{Lister, Receiver, Sender};
use super::{Name, TransferError};

/// Default capacity of the in-memory pipe between producer and consumer.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// One planned stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferStep {
    /// Snapshot to send.
    pub name: Name,
    /// Newest snapshot the destination already has, if any.
    pub reference: Option<Name>,
}

/// Replicates the file systems of a source into one target file system of
/// a destination.
///
/// Every source file system is replicated unless the selection is narrowed
/// with [`file_system`](Self::file_system) or [`exclude`](Self::exclude).
/// File system names given to either ignore a single leading `/`.
#[derive(Clone, Debug)]
pub struct Replicator {
    target_file_system: String,
    pipe_capacity: usize,
    only: Option<String>,
    excluded: HashSet<String>,
}

impl Replicator {
    /// Creates a replicator receiving into `target_file_system`.
    #[must_use]
    pub fn new(target_file_system: impl Into<String>) -> Self {
        Self {
            target_file_system: target_file_system.into(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            only: None,
            excluded: HashSet::new(),
        }
    }

    /// Replicates only the source file system `name`.
    #[must_use]
    pub fn file_system(mut self, name: &str) -> Self {
        self.only = Some(strip_root(name).to_owned());
        self
    }

    /// Never replicates the source file system `name`; may be called
    /// repeatedly.
    #[must_use]
    pub fn exclude(mut self, name: &str) -> Self {
        self.excluded.insert(strip_root(name).to_owned());
        self
    }

    /// Overrides the pipe capacity in bytes (at least one).
    #[must_use]
    pub const fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Target file system passed to every receive.
    #[must_use]
    pub fn target_file_system(&self) -> &str {
        &self.target_file_system
    }

    /// Whether snapshots of the source file system `file_system` are
    /// replicated.
    #[must_use]
    pub fn selects_file_system(&self, file_system: &str) -> bool {
        self.only
            .as_deref()
            .is_none_or(|only| only == file_system)
            && !self.excluded.contains(file_system)
    }

    /// Brings `destination` up to date with the selected file systems of
    /// `source`.
    ///
    /// Returns the snapshots streamed. Source snapshots outside the selection
    /// are dropped before planning, so they never take part in a transfer. The first failure aborts the call and
    /// leaves remaining file systems untouched. Cancelling `cancel` drops the
    /// in-flight stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ListSource`] or
    /// [`TransferError::ListDestination`] when an inventory cannot be read,
    /// [`TransferError::DestinationAhead`] when the destination holds more
    /// snapshots of a file system than the source, [`TransferError::Diverged`]
    /// when the two sides share no snapshot, [`TransferError::Send`] or
    /// [`TransferError::Receive`] when streaming fails, and
    /// [`TransferError::Cancelled`] when cancelled.
    pub async fn transfer<D, S>(
        &self,
        destination: &D,
        source: &S,
        cancel: &CancellationToken,
    ) -> Result<Vec<Name>, TransferError>
    where
        D: Lister + Receiver + ?Sized,
        S: Lister + Sender + ?Sized,
    {
        let mut local = source
            .list_snapshots()
            .await
            .map_err(TransferError::ListSource)?;
        local.retain(|name| self.selects_file_system(name.file_system()));
        if let Some(only) = self.only.as_deref().filter(|_| local.is_empty()) {
            warn!(file_system = %only, "no managed snapshots to send");
        }
        let remote = destination
            .list_snapshots()
            .await
            .map_err(TransferError::ListDestination)?;

        let steps = plan(local, remote)?;
        let mut transferred = Vec::with_capacity(steps.len());
        for step in steps {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            info!(
                snapshot = %step.name,
                reference = ?step.reference.as_ref().map(ToString::to_string),
                target = %self.target_file_system,
                "transferring snapshot"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransferError::Cancelled),
                streamed = self.stream(destination, source, &step) => streamed?,
            }
            transferred.push(step.name);
        }
        Ok(transferred)
    }

    async fn stream<D, S>(
        &self,
        destination: &D,
        source: &S,
        step: &TransferStep,
    ) -> Result<(), TransferError>
    where
        D: Receiver + ?Sized,
        S: Sender + ?Sized,
    {
        let (mut writer, mut reader) = tokio::io::duplex(self.pipe_capacity);

        let producer = async {
            let sent = source
                .send_snapshot(&step.name, &mut writer, step.reference.as_ref())
                .await;
            let closed = writer.shutdown().await;
            drop(writer);
            sent.map_err(|err| TransferError::Send {
                name: step.name.clone(),
                source: Box::new(err),
            })?;
            closed.map_err(TransferError::Pipe)
        };

        let consumer = async {
            let received = destination
                .receive_snapshot(&self.target_file_system, &step.name, &mut reader)
                .await;
            drop(reader);
            received.map_err(|err| TransferError::Receive {
                name: step.name.clone(),
                source: Box::new(err),
            })
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        if let (Err(_), Err(received)) = (&produced, &consumed) {
            warn!(snapshot = %step.name, error = %received, "receiving side failed too");
        }
        produced?;
        consumed
    }
}

/// Decides which snapshots to stream.
///
/// File systems are compared by snapshot count. A file system missing at the
/// destination gets a full stream of the newest source snapshot; one the
/// destination lags behind on gets an incremental stream from the newest
/// source snapshot the destination also has. Equal counts need nothing, nor
/// does a destination already holding the newest source snapshot.
///
/// # Errors
///
/// Returns [`TransferError::DestinationAhead`] when the destination holds
/// more snapshots of a file system than the source, and
/// [`TransferError::Diverged`] when it holds some but none of them exist at
/// the source. No step is returned in either case.
pub fn plan(source: Vec<Name>, destination: Vec<Name>) -> Result<Vec<TransferStep>, TransferError> {
    let mut at_destination = group_by_file_system(destination);
    let mut steps = Vec::new();

    for (file_system, local) in group_by_file_system(source) {
        let remote = at_destination.remove(&file_system).unwrap_or_default();
        let Some(newest) = local.last() else {
            continue;
        };

        if remote.len() > local.len() {
            return Err(TransferError::DestinationAhead {
                file_system,
                destination: remote.len(),
                source_count: local.len(),
            });
        }
        if remote.len() == local.len() {
            debug!(file_system = %file_system, "destination up to date");
            continue;
        }
        if remote.is_empty() {
            steps.push(TransferStep {
                name: newest.clone(),
                reference: None,
            });
            continue;
        }

        let Some(reference) = local.iter().rev().find(|name| remote.contains(name)) else {
            return Err(TransferError::Diverged { file_system });
        };
        if reference == newest {
            debug!(file_system = %file_system, "destination holds newest snapshot");
            continue;
        }
        steps.push(TransferStep {
            name: newest.clone(),
            reference: Some(reference.clone()),
        });
    }
    Ok(steps)
}

fn strip_root(name: &str) -> &str {
    name.strip_prefix('/').unwrap_or(name)
}

fn group_by_file_system(names: Vec<Name>) -> HashMap<String, Vec<Name>> {
    let mut groups: HashMap<String, Vec<Name>> = HashMap::new();
    for name in names {
        groups
            .entry(name.file_system().to_owned())
            .or_default()
            .push(name);
    }
    for group in groups.values_mut() {
        group.sort_by_key(Name::timestamp);
    }
    groups
}
