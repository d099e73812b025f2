use std::fmt;

use derive_more::Display;

/// Checkpoints of a backup run, in execution order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Nextcloud maintenance mode entered.
    NextcloudFreeze = 0,
    /// Nextcloud volume captured.
    NextcloudCapture = 1,
    /// MariaDB data volume captured in backup mode.
    MariaDbActualCapture = 2,
    /// SQL dump written and its volume captured.
    MariaDbDumpCapture = 3,
    /// Snapshots and backups over the retention count deleted.
    Pruning = 4,
}

/// Which [Step]s of a run completed.
///
/// Every flag is set at most once and only after its step succeeded. The
/// MariaDB data volume capture is the only step allowed to fail without
/// aborting, so [Step::MariaDbDumpCapture] can complete while
/// [Step::MariaDbActualCapture] did not.
///
/// Apart from the steps it tracks whether Nextcloud may have been left in
/// maintenance mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessStatus {
    steps: [bool; 5],
    maintenance_left_on: bool,
}

impl ProcessStatus {
    pub const fn from_flags(flags: [bool; 5]) -> Self {
        Self {
            steps: flags,
            maintenance_left_on: false,
        }
    }

    pub fn flags(&self) -> [bool; 5] {
        self.steps
    }

    pub fn is_complete(&self, step: Step) -> bool {
        self.steps[step as usize]
    }

    /// Records that disabling the Nextcloud maintenance mode failed.
    pub fn maintenance_exit_failed(&mut self) {
        self.maintenance_left_on = true;
    }

    pub fn is_maintenance_left_on(&self) -> bool {
        self.maintenance_left_on
    }

    /// Marks `step` as completed.
    pub fn complete(&mut self, step: Step) {
        debug_assert!(
            match step {
                Step::NextcloudFreeze => true,
                Step::NextcloudCapture => self.is_complete(Step::NextcloudFreeze),
                Step::MariaDbActualCapture | Step::MariaDbDumpCapture =>
                    self.is_complete(Step::NextcloudCapture),
                Step::Pruning => self.is_ready_for_pruning(),
            },
            "{step:?} completed out of order in {self}"
        );
        self.steps[step as usize] = true;
    }

    /// Deleting old snapshots and backups is only allowed once every capture
    /// of this run succeeded.
    pub fn is_ready_for_pruning(&self) -> bool {
        self.steps == [true, true, true, true, false]
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<&str> = self
            .steps
            .iter()
            .map(|done| if *done { "1" } else { "0" })
            .collect();
        write!(f, "[{}]", flags.join(","))
    }
}

/// Final result of a run as reported to the operator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Outcome {
    #[display("Backup completed. Snapshots (and backups) of the Nextcloud volume and both MariaDB volumes were created, old snapshots and backups over the retention count were deleted.")]
    Success,
    #[display("Snapshots (and backups) of the Nextcloud volume and both MariaDB volumes were created, but deleting the old snapshots and backups over the retention count failed. Some old snapshots or backups may be left over.")]
    PruneFailed,
    #[display("Snapshot (and backup) of the Nextcloud volume and the MariaDB 'actual' volume were created. Unable to create the mysqldump file or the MariaDB 'backup' volume snapshot/backup. Nothing has been deleted.")]
    BackupVolumeFailed,
    #[display("Unable to create MariaDB 'actual' volume snapshot/backup. Snapshots (and backups) of the Nextcloud volume and of the MariaDB 'backup' volume holding the mysqldump file were created. Nothing has been deleted.")]
    ActualVolumeFailed,
    #[display("Snapshot (and backup) of the Nextcloud volume were created. Unable to create any MariaDB snapshot/backup. Nothing has been deleted.")]
    MariaDbFailed,
    #[display("Snapshots (and backups) of all volumes were created and old ones deleted, but Nextcloud maintenance mode could not be disabled. Disable it by hand (occ maintenance:mode --off).")]
    MaintenanceLeftOn,
    #[display("Critical error before the first volume was captured. No complete snapshot or backup was created and nothing has been deleted.")]
    Aborted,
    #[display("Unrecognized process status {_0}. Check the log for the snapshots and backups that were created.")]
    Unrecognized(ProcessStatus),
}

impl From<ProcessStatus> for Outcome {
    fn from(status: ProcessStatus) -> Self {
        match status.flags() {
            [true, true, true, true, true] if status.is_maintenance_left_on() => {
                Outcome::MaintenanceLeftOn
            }
            [true, true, true, true, true] => Outcome::Success,
            [true, true, true, true, false] => Outcome::PruneFailed,
            [true, true, true, false, false] => Outcome::BackupVolumeFailed,
            [true, true, false, true, false] => Outcome::ActualVolumeFailed,
            [true, true, false, false, false] => Outcome::MariaDbFailed,
            [false, false, false, false, false] | [true, false, false, false, false] => {
                Outcome::Aborted
            }
            _ => Outcome::Unrecognized(status),
        }
    }
}

impl Outcome {
    /// Process exit code, `0` only for [Outcome::Success].
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::PruneFailed => 1,
            Outcome::BackupVolumeFailed => 2,
            Outcome::ActualVolumeFailed => 3,
            Outcome::MariaDbFailed => 4,
            Outcome::Aborted => 5,
            Outcome::Unrecognized(_) => 6,
            Outcome::MaintenanceLeftOn => 7,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}
