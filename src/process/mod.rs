//! Runs the backup steps in order and records how far the run got.
//!
//! A run is a fixed sequence:
//!
//! 1. open the Kubernetes, MariaDB and Longhorn connections,
//! 2. enter the Nextcloud maintenance mode,
//! 3. capture the Nextcloud volume,
//! 4. capture the MariaDB data volume in MariaDB backup mode,
//! 5. write the SQL dump and capture the volume holding it,
//! 6. delete snapshots and backups over the retention count.
//!
//! A failure of step 4 is recorded and the run continues, every other failure
//! ends the run. Modes and connections are left by dropping their owners, so
//! they are left on every path.

mod status;

pub use status::{Outcome, ProcessStatus, Step};

use std::error::Error as StdError;
use std::time::Duration;

use chrono::Local;
use derive_more::{Display, Error, From};

use crate::api::kubernetes::KubernetesClient;
use crate::api::longhorn::LonghornClient;
use crate::api::mariadb::MariaDbSession;
use crate::api::{
    ClusterApi, ClusterError, ConnectionError, DatabaseError, DbSession, StorageApi, StorageError,
};
use crate::backends::mariadb::MariaDbError;
use crate::backends::{MariaDbApp, VolumeBackups};
use crate::cli::{BackupConfig, DatabaseConfig, KubernetesConfig};
use crate::nextcloud::{NextcloudApp, NextcloudError, MAINTENANCE_DRAIN_PERIOD};

const SNAPSHOT_NAME_FORMAT: &str = "%d-%m-%Y__%H-%M-%S";

/// Name shared by every snapshot and backup of a run.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub struct SnapshotName(String);

impl SnapshotName {
    /// Name from the local time, e.g. `24-12-2024__03-00-00`.
    pub fn now() -> Self {
        Self(Local::now().format(SNAPSHOT_NAME_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Display, Error, From)]
/// A failure ending the backup run.
pub enum BackupError {
    #[display("Unable to connect: {_0}")]
    Connection(ConnectionError),
    #[display("{_0}")]
    Nextcloud(NextcloudError),
    #[display("{_0}")]
    MariaDb(MariaDbError),
}

/// Drives one backup run against already opened clients.
pub struct Orchestrator<'a> {
    config: &'a BackupConfig,
    cluster: &'a dyn ClusterApi,
    storage: &'a dyn StorageApi,
    session: &'a mut dyn DbSession,
    drain_period: Duration,
    status: ProcessStatus,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a BackupConfig,
        cluster: &'a dyn ClusterApi,
        storage: &'a dyn StorageApi,
        session: &'a mut dyn DbSession,
    ) -> Self {
        Self {
            config,
            cluster,
            storage,
            session,
            drain_period: MAINTENANCE_DRAIN_PERIOD,
            status: ProcessStatus::default(),
        }
    }

    /// Overrides the wait after entering the Nextcloud maintenance mode.
    pub fn with_drain_period(mut self, drain_period: Duration) -> Self {
        self.drain_period = drain_period;
        self
    }

    /// Runs the backup steps, naming every snapshot and backup `name`.
    pub fn run(mut self, name: &SnapshotName) -> ProcessStatus {
        log::info!(target: "process", "Start {:?} run with snapshot name {name}", self.config.mode);

        let volumes = VolumeBackups::new(
            self.cluster,
            self.storage,
            self.config.longhorn.retention,
        );
        if let Err(e) = self.run_steps(&volumes, name.as_str()) {
            report_failure("Backup aborted", &e);
        }

        log::debug!(target: "process", "Process status {}", self.status);
        self.status
    }

    fn run_steps(&mut self, volumes: &VolumeBackups<'_>, name: &str) -> Result<(), BackupError> {
        let config = self.config;

        let mut nextcloud = NextcloudApp::new(&config.nextcloud, self.cluster, volumes)
            .with_drain_period(self.drain_period)
            .enter()?;
        self.status.complete(Step::NextcloudFreeze);

        let result = self.run_in_maintenance(&nextcloud, volumes, name);

        if let Err(e) = nextcloud.exit_maintenance_mode() {
            self.status.maintenance_exit_failed();
            report_failure("Leaving Nextcloud maintenance mode failed", &BackupError::from(e));
        }
        result
    }

    fn run_in_maintenance(
        &mut self,
        nextcloud: &NextcloudApp<'_>,
        volumes: &VolumeBackups<'_>,
        name: &str,
    ) -> Result<(), BackupError> {
        self.capture_nextcloud(nextcloud, name)?;
        self.status.complete(Step::NextcloudCapture);

        match self.capture_mariadb_actual(volumes, name) {
            Ok(()) => self.status.complete(Step::MariaDbActualCapture),
            Err(e) => report_failure("MariaDB 'actual' volume capture failed, continuing", &e),
        }

        self.capture_mariadb_dump(volumes, name)?;
        self.status.complete(Step::MariaDbDumpCapture);

        if !self.status.is_ready_for_pruning() {
            log::warn!(target: "process", "Not every capture succeeded, old snapshots and backups are kept");
            return Ok(());
        }

        nextcloud.delete_old_snapshots_and_backups()?;
        MariaDbApp::new(&self.config.mariadb, self.cluster, &mut *self.session, volumes)
            .delete_old_snapshots_and_backups()?;
        self.status.complete(Step::Pruning);

        log::info!(target: "process", "Old snapshots and backups deleted");
        Ok(())
    }

    fn capture_nextcloud(&self, nextcloud: &NextcloudApp<'_>, name: &str) -> Result<(), BackupError> {
        nextcloud.create_volume_snapshot(name)?;
        if self.config.mode.includes_backup() {
            nextcloud.create_volume_backup(name)?;
        }
        Ok(())
    }

    /// Captures the data volume while commits are blocked.
    ///
    /// The capture only counts if the backup mode was left again.
    fn capture_mariadb_actual(
        &mut self,
        volumes: &VolumeBackups<'_>,
        name: &str,
    ) -> Result<(), BackupError> {
        let include_backup = self.config.mode.includes_backup();
        let mut mariadb =
            MariaDbApp::enter(&self.config.mariadb, self.cluster, &mut *self.session, volumes)?;

        let captured = mariadb.create_actual_volume_snapshot(name).and_then(|()| {
            if include_backup {
                mariadb.create_actual_volume_backup(name)
            } else {
                Ok(())
            }
        });
        let exited = mariadb.exit_backup_mode();

        match (captured, exited) {
            (Err(e), Err(exit_err)) => {
                report_failure("Leaving MariaDB backup mode failed", &BackupError::from(exit_err));
                Err(e.into())
            }
            (captured, exited) => {
                captured?;
                exited?;
                Ok(())
            }
        }
    }

    /// Dumps the databases and captures the volume holding the dump.
    fn capture_mariadb_dump(
        &mut self,
        volumes: &VolumeBackups<'_>,
        name: &str,
    ) -> Result<(), BackupError> {
        let mariadb =
            MariaDbApp::new(&self.config.mariadb, self.cluster, &mut *self.session, volumes);

        mariadb.create_logical_dump()?;
        mariadb.create_backup_volume_snapshot(name)?;
        if self.config.mode.includes_backup() {
            mariadb.create_backup_volume_backup(name)?;
        }
        Ok(())
    }
}

/// Logs `err`; the chain of causes is logged at debug level.
fn report_failure(context: &str, err: &(dyn StdError + 'static)) {
    log::error!(target: "process", "{context}: {err}");

    let mut source = err.source();
    while let Some(cause) = source {
        log::debug!(target: "process", "Caused by: {cause}");
        source = cause.source();
    }
}

/// Opens the cluster client, the database session and the storage client in
/// this order and runs the backup with them.
///
/// Whatever was opened is closed again in reverse order.
fn connect_and_run<C, D, S>(
    config: &BackupConfig,
    name: &SnapshotName,
    connect_cluster: impl FnOnce(&KubernetesConfig) -> Result<C, ClusterError>,
    connect_database: impl FnOnce(&DatabaseConfig) -> Result<D, DatabaseError>,
    connect_storage: impl FnOnce(&str) -> Result<S, StorageError>,
) -> Result<ProcessStatus, ConnectionError>
where
    C: ClusterApi,
    D: DbSession,
    S: StorageApi,
{
    log::info!(target: "process", "Preparing the system for the backups");

    let cluster = connect_cluster(&config.kubernetes)?;
    let mut session = connect_database(&config.database)?;
    let storage = connect_storage(&config.longhorn.url)?;

    Ok(Orchestrator::new(config, &cluster, &storage, &mut session).run(name))
}

fn backup_with<C, D, S>(
    config: &BackupConfig,
    name: &SnapshotName,
    connect_cluster: impl FnOnce(&KubernetesConfig) -> Result<C, ClusterError>,
    connect_database: impl FnOnce(&DatabaseConfig) -> Result<D, DatabaseError>,
    connect_storage: impl FnOnce(&str) -> Result<S, StorageError>,
) -> ProcessStatus
where
    C: ClusterApi,
    D: DbSession,
    S: StorageApi,
{
    match connect_and_run(config, name, connect_cluster, connect_database, connect_storage) {
        Ok(status) => status,
        Err(e) => {
            report_failure("Backup aborted", &BackupError::from(e));
            ProcessStatus::default()
        }
    }
}

/// Opens the connections and runs the backup.
pub fn backup(config: &BackupConfig) -> ProcessStatus {
    backup_with(
        config,
        &SnapshotName::now(),
        KubernetesClient::connect,
        MariaDbSession::connect,
        LonghornClient::connect,
    )
}
