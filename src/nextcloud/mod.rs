mod occ;

use std::thread;
use std::time::Duration;

use derive_more::{Display, Error, From};

pub use occ::{Occ, OccError};

use crate::api::ClusterApi;
use crate::backends::volume::{VolumeBackups, VolumeError};
use crate::backends::ConsistencyGuardError;
use crate::cli::NextcloudConfig;

/// Time granted to requests still running when maintenance mode got enabled.
pub const MAINTENANCE_DRAIN_PERIOD: Duration = Duration::from_secs(30);

const MAINTENANCE_MODE: &str = "Nextcloud maintenance mode";

#[derive(Debug, Display, Error, From)]
/// Errors of the Nextcloud backup.
pub enum NextcloudError {
    /// Maintenance mode couldn't be enabled.
    #[display("Unable to enter Nextcloud maintenance mode: {_0}")]
    MaintenanceEnter(OccError),
    /// Maintenance mode couldn't be disabled, users are locked out.
    #[display("Unable to exit Nextcloud maintenance mode, you have to disable it by hand (occ maintenance:mode --off): {_0}")]
    MaintenanceExit(OccError),
    #[display("{_0}")]
    #[from]
    Guard(ConsistencyGuardError),
    #[display("{_0}")]
    #[from]
    Volume(VolumeError),
}

/// Drives the maintenance mode of the Nextcloud instance and captures its volume.
///
/// Dropping a [NextcloudApp] still in maintenance mode exits the maintenance
/// mode; a failure there is only logged.
pub struct NextcloudApp<'a> {
    config: &'a NextcloudConfig,
    occ: Occ<'a>,
    volumes: &'a VolumeBackups<'a>,
    drain_period: Duration,
    maintenance: bool,
}

impl<'a> NextcloudApp<'a> {
    pub fn new(
        config: &'a NextcloudConfig,
        cluster: &'a dyn ClusterApi,
        volumes: &'a VolumeBackups<'a>,
    ) -> Self {
        Self {
            config,
            occ: Occ::new(cluster, &config.app_name),
            volumes,
            drain_period: MAINTENANCE_DRAIN_PERIOD,
            maintenance: false,
        }
    }

    /// Overrides the [MAINTENANCE_DRAIN_PERIOD].
    pub fn with_drain_period(mut self, drain_period: Duration) -> Self {
        self.drain_period = drain_period;
        self
    }

    /// Enters the maintenance mode, keeping the [NextcloudApp] on success.
    pub fn enter(mut self) -> Result<Self, NextcloudError> {
        self.enter_maintenance_mode()?;
        Ok(self)
    }

    pub fn is_maintenance_mode(&self) -> bool {
        self.maintenance
    }

    /// Enables maintenance mode and waits for running requests to drain.
    pub fn enter_maintenance_mode(&mut self) -> Result<(), NextcloudError> {
        log::info!(target: "nextcloud", "Enable Nextcloud maintenance mode");
        self.occ
            .enable_maintenance()
            .map_err(NextcloudError::MaintenanceEnter)?;

        log::debug!(target: "nextcloud", "Wait {:?} for running requests", self.drain_period);
        thread::sleep(self.drain_period);

        self.maintenance = true;
        log::info!(target: "nextcloud", "Nextcloud maintenance mode enabled");
        Ok(())
    }

    /// Disables maintenance mode.
    ///
    /// Does nothing when not in maintenance mode. The mode counts as left after
    /// the attempt, whether it succeeded or not.
    pub fn exit_maintenance_mode(&mut self) -> Result<(), NextcloudError> {
        if !self.maintenance {
            log::debug!(target: "nextcloud", "Nextcloud maintenance mode already disabled");
            return Ok(());
        }

        log::info!(target: "nextcloud", "Disable Nextcloud maintenance mode");
        self.maintenance = false;
        self.occ
            .disable_maintenance()
            .map_err(NextcloudError::MaintenanceExit)?;

        log::info!(target: "nextcloud", "Nextcloud maintenance mode disabled");
        Ok(())
    }

    fn require_maintenance(&self, operation: &'static str) -> Result<(), ConsistencyGuardError> {
        if self.maintenance {
            Ok(())
        } else {
            Err(ConsistencyGuardError {
                mode: MAINTENANCE_MODE,
                operation,
            })
        }
    }

    pub fn create_volume_snapshot(&self, snapshot_name: &str) -> Result<(), NextcloudError> {
        self.require_maintenance("snapshot creation")?;

        log::info!(target: "nextcloud", "Create Nextcloud volume snapshot {snapshot_name}");
        let pv = self.volumes.resolve(&self.config.volume_claim)?;
        self.volumes.create_volume_snapshot(snapshot_name, &pv.volume)?;
        Ok(())
    }

    pub fn create_volume_backup(&self, snapshot_name: &str) -> Result<(), NextcloudError> {
        self.require_maintenance("backup creation")?;

        log::info!(target: "nextcloud", "Create Nextcloud volume backup from snapshot {snapshot_name}");
        let pv = self.volumes.resolve(&self.config.volume_claim)?;
        self.volumes.create_volume_backup(snapshot_name, &pv.volume)?;
        Ok(())
    }

    pub fn delete_old_snapshots_and_backups(&self) -> Result<(), NextcloudError> {
        self.require_maintenance("old snapshots and backups deletion")?;

        log::info!(target: "nextcloud", "Delete old Nextcloud volume backups and snapshots");
        let pv = self.volumes.resolve(&self.config.volume_claim)?;
        self.volumes
            .delete_backups_and_snapshots_over_retain_count(&pv.volume)?;
        Ok(())
    }
}

impl Drop for NextcloudApp<'_> {
    fn drop(&mut self) {
        if self.maintenance {
            if let Err(e) = self.exit_maintenance_mode() {
                log::error!(target: "nextcloud", "{e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{FakeCluster, FakeStorage};
    use crate::util::retention::RetentionConfig;

    const PV: &str = "pv-nextcloud-data";
    const EXIT_CMD: &str = "maintenance:mode --off";

    fn config() -> NextcloudConfig {
        NextcloudConfig {
            app_name: "nextcloud".into(),
            volume_claim: "nextcloud-data".into(),
        }
    }

    #[test]
    fn enter_sets_maintenance_flag() {
        let config = config();
        let cluster = FakeCluster::default();
        let storage = FakeStorage::with_volumes(&[PV]);
        let volumes = VolumeBackups::new(&cluster, &storage, RetentionConfig::default());

        let app = NextcloudApp::new(&config, &cluster, &volumes)
            .with_drain_period(Duration::ZERO)
            .enter()
            .unwrap();

        assert!(app.is_maintenance_mode());
        app.create_volume_snapshot("snap").unwrap();
        app.create_volume_backup("snap").unwrap();
        assert_eq!(storage.backup_names(PV), ["backup-snap"]);
    }

    #[test]
    fn failed_enter_leaves_flag_unset() {
        let config = config();
        let cluster = FakeCluster::default();
        cluster.reply("--on", "Maintenance mode enabled \n");
        let storage = FakeStorage::with_volumes(&[PV]);
        let volumes = VolumeBackups::new(&cluster, &storage, RetentionConfig::default());
        let mut app =
            NextcloudApp::new(&config, &cluster, &volumes).with_drain_period(Duration::ZERO);

        let err = app.enter_maintenance_mode().unwrap_err();

        assert!(matches!(err, NextcloudError::MaintenanceEnter(_)));
        assert!(!app.is_maintenance_mode());
        drop(app);
        assert_eq!(cluster.count_commands(EXIT_CMD), 0);
    }

    #[test]
    fn capture_refused_without_maintenance() {
        let config = config();
        let cluster = FakeCluster::default();
        let storage = FakeStorage::with_volumes(&[PV]);
        let volumes = VolumeBackups::new(&cluster, &storage, RetentionConfig::default());
        let app = NextcloudApp::new(&config, &cluster, &volumes);

        assert!(matches!(
            app.create_volume_snapshot("snap").unwrap_err(),
            NextcloudError::Guard(_)
        ));
        assert!(matches!(
            app.create_volume_backup("snap").unwrap_err(),
            NextcloudError::Guard(_)
        ));
        assert!(matches!(
            app.delete_old_snapshots_and_backups().unwrap_err(),
            NextcloudError::Guard(_)
        ));
        assert!(storage.calls().is_empty());
    }

    #[test]
    fn failing_snapshot_still_exits_maintenance_once() {
        let config = config();
        let cluster = FakeCluster::default();
        let storage = FakeStorage::with_volumes(&[PV]);
        storage.fail_on("create_snapshot", PV);
        let volumes = VolumeBackups::new(&cluster, &storage, RetentionConfig::default());

        let result = NextcloudApp::new(&config, &cluster, &volumes)
            .with_drain_period(Duration::ZERO)
            .enter()
            .and_then(|app| app.create_volume_snapshot("snap"));

        assert!(matches!(result, Err(NextcloudError::Volume(_))));
        assert_eq!(cluster.count_commands(EXIT_CMD), 1);
    }

    #[test]
    fn failed_exit_asks_for_manual_intervention() {
        let config = config();
        let cluster = FakeCluster::default();
        cluster.reply("--off", "An unhandled exception has been thrown\n");
        let storage = FakeStorage::default();
        let volumes = VolumeBackups::new(&cluster, &storage, RetentionConfig::default());
        let mut app = NextcloudApp::new(&config, &cluster, &volumes)
            .with_drain_period(Duration::ZERO)
            .enter()
            .unwrap();

        let err = app.exit_maintenance_mode().unwrap_err();

        assert!(matches!(err, NextcloudError::MaintenanceExit(_)));
        assert!(err.to_string().contains("by hand"));
        drop(app);
        assert_eq!(cluster.count_commands(EXIT_CMD), 1);
    }
}
