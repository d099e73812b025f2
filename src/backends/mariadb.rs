//! Implements the consistent backup of the MariaDB server using [MariaDbApp].

use derive_more::{Display, Error, From};

use super::volume::{VolumeBackups, VolumeError};
use super::ConsistencyGuardError;
use crate::api::{ClusterApi, ClusterError, DatabaseError, DbSession};
use crate::cli::MariaDbConfig;

const BACKUP_STAGE_START: &str = "BACKUP STAGE START";
const BACKUP_STAGE_BLOCK_COMMIT: &str = "BACKUP STAGE BLOCK_COMMIT";
const BACKUP_STAGE_END: &str = "BACKUP STAGE END";

const PASSWORD_PLACEHOLDER: &str = "{password}";
const FILE_PATH_PLACEHOLDER: &str = "{file_path}";
/// Dumps every database with drop statements so the dump restores over an
/// existing installation. Prints nothing on success.
const MYSQLDUMP_CMD_TEMPLATE: &str = "mysqldump --add-drop-database --add-drop-table --lock-all-tables --result-file={file_path} --password={password} --all-databases";

const BACKUP_MODE: &str = "MariaDB backup mode";

#[derive(Debug, Display, Error, From)]
/// Errors of the MariaDB backup.
pub enum MariaDbError {
    /// `mysqldump` couldn't be run in the database pod.
    #[display("Unable to create the mysqldump file: {_0}")]
    Dump(ClusterError),
    /// `mysqldump` printed an error.
    #[display("Unable to create the mysqldump file, mysqldump reported: {output}")]
    DumpOutput { output: String },
    /// Locking commits for the backup failed.
    #[display("Unable to enter MariaDB backup mode: {_0}")]
    BackupModeEnter(DatabaseError),
    /// Unlocking failed, the database may still block commits.
    #[display("Unable to exit MariaDB backup mode, check that the database works well after the end of this process: {_0}")]
    BackupModeExit(DatabaseError),
    #[display("{_0}")]
    #[from]
    Guard(ConsistencyGuardError),
    #[display("{_0}")]
    #[from]
    Volume(VolumeError),
}

/// Freezes the MariaDB server for volume snapshots and creates SQL dumps.
///
/// Dropping a [MariaDbApp] still in backup mode exits the backup mode.
pub struct MariaDbApp<'a> {
    config: &'a MariaDbConfig,
    cluster: &'a dyn ClusterApi,
    session: &'a mut dyn DbSession,
    volumes: &'a VolumeBackups<'a>,
    backup_mode: bool,
}

impl<'a> MariaDbApp<'a> {
    pub fn new(
        config: &'a MariaDbConfig,
        cluster: &'a dyn ClusterApi,
        session: &'a mut dyn DbSession,
        volumes: &'a VolumeBackups<'a>,
    ) -> Self {
        Self {
            config,
            cluster,
            session,
            volumes,
            backup_mode: false,
        }
    }

    /// Creates a [MariaDbApp] and enters the backup mode.
    pub fn enter(
        config: &'a MariaDbConfig,
        cluster: &'a dyn ClusterApi,
        session: &'a mut dyn DbSession,
        volumes: &'a VolumeBackups<'a>,
    ) -> Result<Self, MariaDbError> {
        let mut app = Self::new(config, cluster, session, volumes);
        app.enter_backup_mode()?;
        Ok(app)
    }

    pub fn is_backup_mode(&self) -> bool {
        self.backup_mode
    }

    fn pod_label(&self) -> String {
        format!("app={}", self.config.app_name)
    }

    /// Dumps all databases into the configured file inside the database pod.
    pub fn create_logical_dump(&self) -> Result<(), MariaDbError> {
        log::info!(target: "backend::mariadb", "Create mysqldump file {}", self.config.dump_file_path);
        log::trace!(target: "backend::mariadb", "Running: {MYSQLDUMP_CMD_TEMPLATE}");

        let command = MYSQLDUMP_CMD_TEMPLATE
            .replace(FILE_PATH_PLACEHOLDER, &shell_quote(&self.config.dump_file_path))
            .replace(PASSWORD_PLACEHOLDER, &shell_quote(&self.config.root_password));

        let output = self
            .cluster
            .exec_by_label(&self.pod_label(), &command)
            .map_err(MariaDbError::Dump)?;
        if !output.is_empty() {
            return Err(MariaDbError::DumpOutput {
                output: output.trim_end().to_string(),
            });
        }

        log::info!(target: "backend::mariadb", "Finished mysqldump file");
        Ok(())
    }

    /// Blocks commits so the data files on the volume stay consistent.
    ///
    /// Does nothing when already in backup mode.
    pub fn enter_backup_mode(&mut self) -> Result<(), MariaDbError> {
        if self.backup_mode {
            log::info!(target: "backend::mariadb", "MariaDB backup mode already enabled");
            return Ok(());
        }

        log::info!(target: "backend::mariadb", "Enable MariaDB backup mode");
        self.session
            .execute(BACKUP_STAGE_START)
            .map_err(MariaDbError::BackupModeEnter)?;

        if let Err(e) = self.session.execute(BACKUP_STAGE_BLOCK_COMMIT) {
            // leave the started stage again
            if let Err(end_err) = self.session.execute(BACKUP_STAGE_END) {
                log::error!(target: "backend::mariadb", "Ending the started backup stage failed: {end_err}");
            }
            return Err(MariaDbError::BackupModeEnter(e));
        }

        self.backup_mode = true;
        log::info!(target: "backend::mariadb", "MariaDB backup mode enabled");
        Ok(())
    }

    /// Unblocks commits.
    ///
    /// Does nothing when not in backup mode. The mode counts as left after the
    /// attempt, whether it succeeded or not.
    pub fn exit_backup_mode(&mut self) -> Result<(), MariaDbError> {
        if !self.backup_mode {
            log::debug!(target: "backend::mariadb", "MariaDB backup mode already disabled");
            return Ok(());
        }

        log::info!(target: "backend::mariadb", "Disable MariaDB backup mode");
        self.backup_mode = false;
        self.session
            .execute(BACKUP_STAGE_END)
            .map_err(MariaDbError::BackupModeExit)?;

        log::info!(target: "backend::mariadb", "MariaDB backup mode disabled");
        Ok(())
    }

    /// Snapshots the live data volume; requires the backup mode.
    pub fn create_actual_volume_snapshot(&self, snapshot_name: &str) -> Result<(), MariaDbError> {
        if !self.backup_mode {
            return Err(ConsistencyGuardError {
                mode: BACKUP_MODE,
                operation: "snapshot creation",
            }
            .into());
        }

        log::info!(target: "backend::mariadb", "Create MariaDB volume snapshot {snapshot_name}");
        let pv = self.volumes.resolve(&self.config.actual_volume_claim)?;
        self.volumes.create_volume_snapshot(snapshot_name, &pv.volume)?;
        Ok(())
    }

    pub fn create_actual_volume_backup(&self, snapshot_name: &str) -> Result<(), MariaDbError> {
        log::info!(target: "backend::mariadb", "Create MariaDB volume backup from snapshot {snapshot_name}");
        let pv = self.volumes.resolve(&self.config.actual_volume_claim)?;
        self.volumes.create_volume_backup(snapshot_name, &pv.volume)?;
        Ok(())
    }

    /// Snapshots the volume holding the dump file.
    pub fn create_backup_volume_snapshot(&self, snapshot_name: &str) -> Result<(), MariaDbError> {
        log::info!(target: "backend::mariadb", "Create MariaDB backup volume snapshot {snapshot_name}");
        let pv = self.volumes.resolve(&self.config.backup_volume_claim)?;
        self.volumes.create_volume_snapshot(snapshot_name, &pv.volume)?;
        Ok(())
    }

    pub fn create_backup_volume_backup(&self, snapshot_name: &str) -> Result<(), MariaDbError> {
        log::info!(target: "backend::mariadb", "Create MariaDB backup volume backup from snapshot {snapshot_name}");
        let pv = self.volumes.resolve(&self.config.backup_volume_claim)?;
        self.volumes.create_volume_backup(snapshot_name, &pv.volume)?;
        Ok(())
    }

    /// Prunes the data volume, then the dump volume.
    pub fn delete_old_snapshots_and_backups(&self) -> Result<(), MariaDbError> {
        log::info!(target: "backend::mariadb", "Delete old MariaDB volume backups and snapshots");
        for claim in [
            &self.config.actual_volume_claim,
            &self.config.backup_volume_claim,
        ] {
            let pv = self.volumes.resolve(claim)?;
            self.volumes
                .delete_backups_and_snapshots_over_retain_count(&pv.volume)?;
        }
        Ok(())
    }
}

impl Drop for MariaDbApp<'_> {
    fn drop(&mut self) {
        if self.backup_mode {
            if let Err(e) = self.exit_backup_mode() {
                log::error!(target: "backend::mariadb", "{e}");
            }
        }
    }
}

/// Quotes `value` for use as a single `sh` word.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
