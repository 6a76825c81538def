//! Local snapshot operations over a [`StorageBackend`].

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use super::capability::{Lister, Receiver, Sender, SnapshotFuture};
use super::retention::{self, BucketConfig};
use super::{Name, SnapshotError};
use crate::backend::{ListKind, StorageBackend};

/// Selection of file systems for [`SnapshotManager::create_snapshots`].
///
/// Without any explicit file system every file system is selected.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateOptions {
    file_systems: Vec<String>,
    excluded: HashSet<String>,
}

impl CreateOptions {
    /// Selects every file system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts creation to `name`; may be called repeatedly.
    #[must_use]
    pub fn file_system(mut self, name: impl Into<String>) -> Self {
        self.file_systems.push(name.into());
        self
    }

    /// Skips `name`. A single leading `/` is ignored, so `/tank/tmp` and
    /// `tank/tmp` exclude the same file system.
    #[must_use]
    pub fn exclude(mut self, name: &str) -> Self {
        self.excluded
            .insert(name.strip_prefix('/').unwrap_or(name).to_owned());
        self
    }

    fn is_excluded(&self, file_system: &str) -> bool {
        self.excluded.contains(file_system)
    }
}

/// Creates, lists, cleans, sends and receives managed snapshots.
#[derive(Clone, Debug)]
pub struct SnapshotManager<B> {
    backend: B,
}

impl<B: StorageBackend> SnapshotManager<B> {
    /// Wraps `backend`.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Borrows the backend.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Snapshots the selected file systems at one shared instant.
    ///
    /// Returns the names created. Creation stops at the first failure; any
    /// snapshots already created are left in place.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::UnknownFileSystem`] when an explicitly
    /// selected file system does not exist, and [`SnapshotError::Backend`]
    /// when listing or creating fails.
    pub async fn create_snapshots(
        &self,
        options: &CreateOptions,
    ) -> Result<Vec<Name>, SnapshotError> {
        const OPERATION: &str = "create snapshots";

        let known = self.file_systems(OPERATION).await?;
        let selected = if options.file_systems.is_empty() {
            known
        } else {
            if let Some(unknown) = options
                .file_systems
                .iter()
                .find(|candidate| !known.contains(*candidate))
            {
                return Err(SnapshotError::UnknownFileSystem(unknown.clone()));
            }
            options.file_systems.clone()
        };

        let now = Utc::now();
        let mut created = Vec::new();
        for file_system in selected {
            if options.is_excluded(&file_system) {
                debug!(file_system = %file_system, "skipping excluded file system");
                continue;
            }
            let name = Name::new(file_system, now).map_err(|source| {
                SnapshotError::InvalidName {
                    operation: OPERATION,
                    source,
                }
            })?;
            self.backend
                .create_snapshot(&name.to_string())
                .await
                .map_err(|source| SnapshotError::Backend {
                    operation: OPERATION,
                    source,
                })?;
            info!(snapshot = %name, "created snapshot");
            created.push(name);
        }
        Ok(created)
    }

    /// Destroys every snapshot the retention policy rejects.
    ///
    /// Snapshots are grouped by file system and each group is judged on its
    /// own. Returns the names destroyed. Destruction stops at the first
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Backend`] when listing or destroying fails.
    pub async fn clean_snapshots(&self, config: &BucketConfig) -> Result<Vec<Name>, SnapshotError> {
        const OPERATION: &str = "clean snapshots";

        let mut groups: BTreeMap<String, Vec<Name>> = BTreeMap::new();
        for name in self.managed_snapshots(OPERATION).await? {
            groups
                .entry(name.file_system().to_owned())
                .or_default()
                .push(name);
        }

        let rejected: Vec<Name> = groups
            .values()
            .flat_map(|names| retention::clean(config, names).1)
            .collect();

        let mut destroyed = Vec::with_capacity(rejected.len());
        for name in rejected {
            self.backend
                .destroy(&name.to_string())
                .await
                .map_err(|source| SnapshotError::Backend {
                    operation: OPERATION,
                    source,
                })?;
            info!(snapshot = %name, "destroyed snapshot");
            destroyed.push(name);
        }
        Ok(destroyed)
    }

    async fn file_systems(&self, operation: &'static str) -> Result<Vec<String>, SnapshotError> {
        self.backend
            .list(ListKind::FileSystem)
            .await
            .map_err(|source| SnapshotError::Backend { operation, source })
    }

    async fn managed_snapshots(&self, operation: &'static str) -> Result<Vec<Name>, SnapshotError> {
        let listed = self
            .backend
            .list(ListKind::Snapshot)
            .await
            .map_err(|source| SnapshotError::Backend { operation, source })?;
        Ok(listed.iter().filter_map(|text| Name::parse(text)).collect())
    }
}

impl<B: StorageBackend> Lister for SnapshotManager<B> {
    fn list_snapshots(&self) -> SnapshotFuture<'_, Vec<Name>> {
        Box::pin(self.managed_snapshots("list snapshots"))
    }
}

impl<B: StorageBackend> Receiver for SnapshotManager<B> {
    fn receive_snapshot<'a>(
        &'a self,
        target_file_system: &'a str,
        name: &'a Name,
        stream: &'a mut (dyn AsyncRead + Unpin + Send),
    ) -> SnapshotFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "receive snapshot";

            let file_systems = self.file_systems(OPERATION).await?;
            if !file_systems.iter().any(|known| known == target_file_system) {
                return Err(SnapshotError::MissingFileSystem(
                    target_file_system.to_owned(),
                ));
            }
            if self.managed_snapshots(OPERATION).await?.contains(name) {
                return Err(SnapshotError::SnapshotExists(name.clone()));
            }

            self.backend
                .receive(&name.to_string(), stream)
                .await
                .map_err(|source| SnapshotError::Backend {
                    operation: OPERATION,
                    source,
                })?;
            info!(snapshot = %name, target = target_file_system, "received snapshot");
            Ok(())
        })
    }
}

impl<B: StorageBackend> Sender for SnapshotManager<B> {
    fn send_snapshot<'a>(
        &'a self,
        name: &'a Name,
        stream: &'a mut (dyn AsyncWrite + Unpin + Send),
        reference: Option<&'a Name>,
    ) -> SnapshotFuture<'a, ()> {
        Box::pin(async move {
            const OPERATION: &str = "send snapshot";

            let known = self.managed_snapshots(OPERATION).await?;
            if !known.contains(name) {
                return Err(SnapshotError::UnknownSnapshot(name.clone()));
            }
            if let Some(base) = reference
                && !known.contains(base)
            {
                return Err(SnapshotError::UnknownReference(base.clone()));
            }

            let reference_text = reference.map(ToString::to_string);
            self.backend
                .send(&name.to_string(), reference_text.as_deref(), stream)
                .await
                .map_err(|source| SnapshotError::Backend {
                    operation: OPERATION,
                    source,
                })?;
            info!(snapshot = %name, reference = ?reference_text, "sent snapshot");
            Ok(())
        })
    }
}

