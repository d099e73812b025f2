//! In-memory clients recording every call, for tests.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, SecondsFormat, TimeZone, Utc};

use super::{
    BackupRecord, ClusterApi, ClusterError, DatabaseError, DbSession, PodInfo, SnapshotRecord,
    StorageApi, StorageError, VolumeIdentity,
};

pub const MAINTENANCE_ON_REPLY: &str = "Maintenance mode enabled\n";
pub const MAINTENANCE_OFF_REPLY: &str = "Maintenance mode disabled\n";

/// Cluster answering every selector with a running pod.
///
/// Exec replies are matched by substring; the latest registered match wins.
/// Claims resolve to `pv-<claim>` unless registered otherwise.
pub struct FakeCluster {
    phases: RefCell<HashMap<String, String>>,
    replies: RefCell<Vec<(String, Result<String, String>)>>,
    commands: RefCell<Vec<String>>,
    claims: RefCell<HashMap<String, Option<String>>>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        let cluster = Self {
            phases: RefCell::default(),
            replies: RefCell::default(),
            commands: RefCell::default(),
            claims: RefCell::default(),
        };
        cluster.reply("maintenance:mode --on", MAINTENANCE_ON_REPLY);
        cluster.reply("maintenance:mode --off", MAINTENANCE_OFF_REPLY);
        cluster
    }
}

impl FakeCluster {
    pub fn set_phase(&self, selector: &str, phase: &str) {
        self.phases
            .borrow_mut()
            .insert(selector.to_string(), phase.to_string());
    }

    pub fn reply(&self, pattern: &str, output: &str) {
        self.replies
            .borrow_mut()
            .push((pattern.to_string(), Ok(output.to_string())));
    }

    pub fn fail(&self, pattern: &str, reason: &str) {
        self.replies
            .borrow_mut()
            .push((pattern.to_string(), Err(reason.to_string())));
    }

    pub fn unbind_claim(&self, claim: &str) {
        self.claims.borrow_mut().insert(claim.to_string(), None);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    pub fn count_commands(&self, pattern: &str) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|command| command.contains(pattern))
            .count()
    }
}

impl ClusterApi for FakeCluster {
    fn pod_by_label(&self, selector: &str) -> Result<PodInfo, ClusterError> {
        let phase = self
            .phases
            .borrow()
            .get(selector)
            .cloned()
            .unwrap_or_else(|| "Running".to_string());

        Ok(PodInfo {
            name: format!("{}-0", selector.trim_start_matches("app=")),
            phase: Some(phase),
        })
    }

    fn exec_in_pod(&self, pod: &str, command: &str) -> Result<String, ClusterError> {
        self.commands.borrow_mut().push(command.to_string());

        let reply = self
            .replies
            .borrow()
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Ok(String::new()));

        reply.map_err(|reason| ClusterError::Exec {
            pod: pod.to_string(),
            command: command.to_string(),
            reason,
        })
    }

    fn volume_for_claim(&self, claim: &str) -> Result<VolumeIdentity, ClusterError> {
        let volume = match self.claims.borrow().get(claim) {
            Some(None) => {
                return Err(ClusterError::ClaimUnbound {
                    claim: claim.to_string(),
                })
            }
            Some(Some(volume)) => volume.clone(),
            None => format!("pv-{claim}"),
        };

        Ok(VolumeIdentity {
            claim: claim.to_string(),
            volume,
        })
    }
}

/// A call received by [FakeStorage].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    HasVolume(String),
    CreateSnapshot { volume: String, name: String },
    ListSnapshots(String),
    DeleteSnapshot { volume: String, name: String },
    CreateBackup { volume: String, snapshot: String },
    HasBackupVolume(String),
    ListBackups(String),
    DeleteBackup { volume: String, name: String },
}

impl StorageCall {
    fn volume(&self) -> &str {
        match self {
            StorageCall::HasVolume(volume)
            | StorageCall::ListSnapshots(volume)
            | StorageCall::HasBackupVolume(volume)
            | StorageCall::ListBackups(volume) => volume,
            StorageCall::CreateSnapshot { volume, .. }
            | StorageCall::DeleteSnapshot { volume, .. }
            | StorageCall::CreateBackup { volume, .. }
            | StorageCall::DeleteBackup { volume, .. } => volume,
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StorageCall::CreateSnapshot { .. }
                | StorageCall::DeleteSnapshot { .. }
                | StorageCall::CreateBackup { .. }
                | StorageCall::DeleteBackup { .. }
        )
    }
}

/// Storage keeping volumes, snapshots and backups in memory.
///
/// Created snapshots get strictly increasing creation times, created backups
/// complete immediately.
#[derive(Default)]
pub struct FakeStorage {
    volumes: RefCell<BTreeMap<String, Vec<SnapshotRecord>>>,
    backup_volumes: RefCell<BTreeMap<String, Vec<BackupRecord>>>,
    calls: RefCell<Vec<StorageCall>>,
    failing: RefCell<Vec<(&'static str, String)>>,
    clock: Cell<i64>,
}

impl FakeStorage {
    pub fn with_volumes(volumes: &[&str]) -> Self {
        let storage = Self::default();
        for volume in volumes {
            storage
                .volumes
                .borrow_mut()
                .insert(volume.to_string(), Vec::new());
        }
        storage
    }

    pub fn set_snapshots(&self, volume: &str, snapshots: Vec<SnapshotRecord>) {
        self.volumes
            .borrow_mut()
            .insert(volume.to_string(), snapshots);
    }

    pub fn set_backups(&self, volume: &str, backups: Vec<BackupRecord>) {
        self.backup_volumes
            .borrow_mut()
            .insert(volume.to_string(), backups);
    }

    /// Makes every `operation` (e.g. `"create_snapshot"`) on `volume` fail.
    pub fn fail_on(&self, operation: &'static str, volume: &str) {
        self.failing
            .borrow_mut()
            .push((operation, volume.to_string()));
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.borrow().clone()
    }

    pub fn calls_on(&self, volume: &str) -> Vec<StorageCall> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.volume() == volume)
            .cloned()
            .collect()
    }

    pub fn snapshot_names(&self, volume: &str) -> Vec<String> {
        self.volumes
            .borrow()
            .get(volume)
            .map(|snapshots| {
                snapshots
                    .iter()
                    .filter(|snapshot| !snapshot.removed)
                    .map(|snapshot| snapshot.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn backup_names(&self, volume: &str) -> Vec<String> {
        self.backup_volumes
            .borrow()
            .get(volume)
            .map(|backups| backups.iter().map(|backup| backup.name.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, operation: &'static str, call: StorageCall) -> Result<(), StorageError> {
        let volume = call.volume().to_string();
        self.calls.borrow_mut().push(call);

        let failing = self
            .failing
            .borrow()
            .iter()
            .any(|(op, vol)| *op == operation && *vol == volume);
        if failing {
            return Err(StorageError::Request {
                operation: format!("{operation} on {volume}"),
                reason: "injected failure".to_string(),
            });
        }

        Ok(())
    }

    fn not_found(operation: &str, volume: &str) -> StorageError {
        StorageError::Status {
            operation: format!("{operation} on {volume}"),
            status: 404,
            body: "not found".to_string(),
        }
    }

    fn tick(&self) -> String {
        let tick = self.clock.get() + 1;
        self.clock.set(tick);

        let base = Utc
            .with_ymd_and_hms(2030, 1, 1, 0, 0, 0)
            .single()
            .expect("valid base time");
        (base + Duration::minutes(tick)).to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl StorageApi for FakeStorage {
    fn has_volume(&self, volume: &str) -> Result<bool, StorageError> {
        self.record("has_volume", StorageCall::HasVolume(volume.to_string()))?;
        Ok(self.volumes.borrow().contains_key(volume))
    }

    fn create_snapshot(&self, volume: &str, name: &str) -> Result<(), StorageError> {
        self.record(
            "create_snapshot",
            StorageCall::CreateSnapshot {
                volume: volume.to_string(),
                name: name.to_string(),
            },
        )?;

        let created = self.tick();
        let mut volumes = self.volumes.borrow_mut();
        let snapshots = volumes
            .get_mut(volume)
            .ok_or_else(|| Self::not_found("create_snapshot", volume))?;
        snapshots.push(SnapshotRecord {
            name: name.to_string(),
            created,
            removed: false,
        });
        Ok(())
    }

    fn list_snapshots(&self, volume: &str) -> Result<Vec<SnapshotRecord>, StorageError> {
        self.record(
            "list_snapshots",
            StorageCall::ListSnapshots(volume.to_string()),
        )?;

        self.volumes
            .borrow()
            .get(volume)
            .cloned()
            .ok_or_else(|| Self::not_found("list_snapshots", volume))
    }

    fn delete_snapshot(&self, volume: &str, name: &str) -> Result<(), StorageError> {
        self.record(
            "delete_snapshot",
            StorageCall::DeleteSnapshot {
                volume: volume.to_string(),
                name: name.to_string(),
            },
        )?;

        let mut volumes = self.volumes.borrow_mut();
        let snapshots = volumes
            .get_mut(volume)
            .ok_or_else(|| Self::not_found("delete_snapshot", volume))?;
        snapshots.retain(|snapshot| snapshot.name != name);
        Ok(())
    }

    fn create_backup(&self, volume: &str, snapshot: &str) -> Result<(), StorageError> {
        self.record(
            "create_backup",
            StorageCall::CreateBackup {
                volume: volume.to_string(),
                snapshot: snapshot.to_string(),
            },
        )?;

        let snapshot_created = self
            .volumes
            .borrow()
            .get(volume)
            .and_then(|snapshots| snapshots.iter().find(|s| s.name == snapshot))
            .map(|s| s.created.clone())
            .ok_or_else(|| Self::not_found("create_backup", volume))?;

        self.backup_volumes
            .borrow_mut()
            .entry(volume.to_string())
            .or_default()
            .push(BackupRecord {
                name: format!("backup-{snapshot}"),
                snapshot_created,
                progress: 100,
            });
        Ok(())
    }

    fn has_backup_volume(&self, volume: &str) -> Result<bool, StorageError> {
        self.record(
            "has_backup_volume",
            StorageCall::HasBackupVolume(volume.to_string()),
        )?;
        Ok(self.backup_volumes.borrow().contains_key(volume))
    }

    fn list_backups(&self, volume: &str) -> Result<Vec<BackupRecord>, StorageError> {
        self.record("list_backups", StorageCall::ListBackups(volume.to_string()))?;

        self.backup_volumes
            .borrow()
            .get(volume)
            .cloned()
            .ok_or_else(|| Self::not_found("list_backups", volume))
    }

    fn delete_backup(&self, volume: &str, name: &str) -> Result<(), StorageError> {
        self.record(
            "delete_backup",
            StorageCall::DeleteBackup {
                volume: volume.to_string(),
                name: name.to_string(),
            },
        )?;

        let mut backup_volumes = self.backup_volumes.borrow_mut();
        let backups = backup_volumes
            .get_mut(volume)
            .ok_or_else(|| Self::not_found("delete_backup", volume))?;
        backups.retain(|backup| backup.name != name);
        Ok(())
    }
}

/// Session recording executed statements.
#[derive(Default)]
pub struct FakeSession {
    pub statements: Vec<String>,
    failing: Vec<String>,
}

impl FakeSession {
    pub fn fail_on(&mut self, statement: &str) {
        self.failing.push(statement.to_string());
    }
}

impl DbSession for FakeSession {
    fn execute(&mut self, statement: &str) -> Result<(), DatabaseError> {
        self.statements.push(statement.to_string());

        if self.failing.iter().any(|failing| failing == statement) {
            return Err(DatabaseError::Statement {
                statement: statement.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

pub fn snapshot(name: &str, created: &str) -> SnapshotRecord {
    SnapshotRecord {
        name: name.to_string(),
        created: created.to_string(),
        removed: false,
    }
}

pub fn backup(name: &str, snapshot_created: &str, progress: u8) -> BackupRecord {
    BackupRecord {
        name: name.to_string(),
        snapshot_created: snapshot_created.to_string(),
        progress,
    }
}
