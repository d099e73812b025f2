//! Snapshots, backups and their retention for single volumes.

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};

use crate::api::{ClusterApi, ClusterError, StorageApi, StorageError, VolumeIdentity};
use crate::util::retention::{self, RetentionConfig};

#[derive(Debug, Display, Error, From)]
/// Errors of storage operations on a volume.
pub enum VolumeError {
    /// The storage system doesn't know the volume.
    #[display("Cannot find volume {_0}")]
    VolumeNotFound(#[error(ignore)] String),
    /// A backup was requested from a snapshot that doesn't exist.
    #[display("Unable to find the snapshot {snapshot} of volume {volume}, the backup cannot be done")]
    SnapshotNotFound { volume: String, snapshot: String },
    /// A creation time reported by the storage system can't be parsed.
    #[display("Invalid creation time '{value}' of {item} on volume {volume}: {source}")]
    InvalidTimestamp {
        volume: String,
        item: String,
        value: String,
        source: chrono::ParseError,
    },
    /// The storage API call failed.
    #[display("{_0}")]
    #[from]
    Storage(StorageError),
    /// Resolving the volume of a claim failed.
    #[display("{_0}")]
    #[from]
    Cluster(ClusterError),
}

/// Creates snapshots and backups of volumes and prunes old ones.
///
/// Volumes are addressed by the name of their persistent volume, see
/// [resolve](Self::resolve). Nothing is cached between calls.
pub struct VolumeBackups<'a> {
    cluster: &'a dyn ClusterApi,
    storage: &'a dyn StorageApi,
    retention: RetentionConfig,
}

impl<'a> VolumeBackups<'a> {
    pub fn new(
        cluster: &'a dyn ClusterApi,
        storage: &'a dyn StorageApi,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            cluster,
            storage,
            retention,
        }
    }

    /// Resolves the volume bound to `claim`.
    pub fn resolve(&self, claim: &str) -> Result<VolumeIdentity, VolumeError> {
        let identity = self.cluster.volume_for_claim(claim)?;
        log::trace!(target: "backend::volume", "Claim {claim} is bound to volume {identity}");
        Ok(identity)
    }

    fn require_volume(&self, pv_name: &str) -> Result<(), VolumeError> {
        if self.storage.has_volume(pv_name)? {
            Ok(())
        } else {
            Err(VolumeError::VolumeNotFound(pv_name.to_string()))
        }
    }

    /// Creates the snapshot `name` of the volume `pv_name`.
    pub fn create_volume_snapshot(&self, name: &str, pv_name: &str) -> Result<(), VolumeError> {
        self.require_volume(pv_name)?;

        log::debug!(target: "backend::volume", "Create snapshot {name} of volume {pv_name}");
        self.storage.create_snapshot(pv_name, name)?;
        Ok(())
    }

    /// Starts a backup of the existing snapshot `name` of the volume `pv_name`.
    pub fn create_volume_backup(&self, name: &str, pv_name: &str) -> Result<(), VolumeError> {
        self.require_volume(pv_name)?;

        let snapshots = self.storage.list_snapshots(pv_name)?;
        if !snapshots.iter().any(|snapshot| snapshot.name == name) {
            return Err(VolumeError::SnapshotNotFound {
                volume: pv_name.to_string(),
                snapshot: name.to_string(),
            });
        }

        log::debug!(target: "backend::volume", "Create backup of snapshot {name} of volume {pv_name}");
        self.storage.create_backup(pv_name, name)?;
        Ok(())
    }

    /// Deletes the oldest snapshots of `pv_name` until only the configured
    /// number is left. Snapshots already marked removed are ignored.
    pub fn delete_snapshots_over_retain_count(&self, pv_name: &str) -> Result<(), VolumeError> {
        self.require_volume(pv_name)?;

        let snapshots = self
            .storage
            .list_snapshots(pv_name)?
            .into_iter()
            .filter(|snapshot| !snapshot.removed)
            .map(|snapshot| {
                let created = parse_created(pv_name, &snapshot.name, &snapshot.created)?;
                Ok((created, snapshot.name))
            })
            .collect::<Result<Vec<_>, VolumeError>>()?;
        let found = snapshots.len();

        let expired = retention::expired(snapshots, self.retention.snapshots);
        log::debug!(
            target: "backend::volume",
            "Volume {pv_name} has {found} snapshot(s), deleting {} to keep {}",
            expired.len(),
            self.retention.snapshots,
        );

        for name in expired {
            log::trace!(target: "backend::volume", "Delete snapshot {name} of volume {pv_name}");
            self.storage.delete_snapshot(pv_name, &name)?;
        }
        Ok(())
    }

    /// Deletes the completed backups of `pv_name` from the oldest snapshot on
    /// until only the configured number is left.
    ///
    /// Backups in progress are neither counted nor deleted.
    pub fn delete_backups_over_retain_count(&self, pv_name: &str) -> Result<(), VolumeError> {
        if !self.storage.has_backup_volume(pv_name)? {
            log::debug!(target: "backend::volume", "Volume {pv_name} has no backups to delete");
            return Ok(());
        }

        let backups = self
            .storage
            .list_backups(pv_name)?
            .into_iter()
            .filter(|backup| {
                if !backup.is_complete() {
                    log::trace!(
                        target: "backend::volume",
                        "Skip backup {} of volume {pv_name} in progress ({}%)",
                        backup.name,
                        backup.progress,
                    );
                }
                backup.is_complete()
            })
            .map(|backup| {
                let created = parse_created(pv_name, &backup.name, &backup.snapshot_created)?;
                Ok((created, backup.name))
            })
            .collect::<Result<Vec<_>, VolumeError>>()?;
        let found = backups.len();

        let expired = retention::expired(backups, self.retention.backups);
        log::debug!(
            target: "backend::volume",
            "Volume {pv_name} has {found} completed backup(s), deleting {} to keep {}",
            expired.len(),
            self.retention.backups,
        );

        for name in expired {
            log::trace!(target: "backend::volume", "Delete backup {name} of volume {pv_name}");
            self.storage.delete_backup(pv_name, &name)?;
        }
        Ok(())
    }

    /// Prunes backups first, then snapshots, of `pv_name`.
    pub fn delete_backups_and_snapshots_over_retain_count(
        &self,
        pv_name: &str,
    ) -> Result<(), VolumeError> {
        self.delete_backups_over_retain_count(pv_name)?;
        self.delete_snapshots_over_retain_count(pv_name)
    }
}

fn parse_created(volume: &str, item: &str, value: &str) -> Result<DateTime<Utc>, VolumeError> {
    retention::parse_timestamp(value).map_err(|source| VolumeError::InvalidTimestamp {
        volume: volume.to_string(),
        item: item.to_string(),
        value: value.to_string(),
        source,
    })
}
