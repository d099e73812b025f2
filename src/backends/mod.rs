//! Backend modules for performing individual backup tasks.
//!
//! Currently the following backends are implemented:
//!
//! - [VolumeBackups]: Snapshots, backups and retention of single volumes.
//! - [MariaDbApp]: Backup stage locking and SQL dump of the MariaDB server.

pub mod mariadb;
pub mod volume;

pub use mariadb::MariaDbApp;
pub use volume::VolumeBackups;

use derive_more::{Display, Error};

/// Kind of copy taken of every volume.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum BackupMode {
    /// Snapshot and backup from that snapshot.
    #[value(name = "FULL-BACKUP")]
    FullBackup,
    /// Snapshot only.
    #[value(name = "SNAPSHOT")]
    SnapshotOnly,
}

impl BackupMode {
    pub fn includes_backup(self) -> bool {
        matches!(self, BackupMode::FullBackup)
    }
}

/// An operation was called while the mode protecting it was not active.
#[derive(Debug, Display, Error)]
#[display("{mode} not enabled. Cannot continue with the {operation}")]
pub struct ConsistencyGuardError {
    pub mode: &'static str,
    pub operation: &'static str,
}
