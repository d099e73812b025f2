//! Thin clients for the systems a backup run talks to.
//!
//! Every client is described by a trait so the controllers above only see
//! what they need:
//!
//! - [ClusterApi]: pod lookup, command execution inside pods and resolution
//!   of persistent volume claims. Implemented by [kubernetes::KubernetesClient].
//! - [StorageApi]: volume snapshots and backups. Implemented by
//!   [longhorn::LonghornClient].
//! - [DbSession]: administrative SQL statements. Implemented by
//!   [mariadb::MariaDbSession].
//!
//! A client value only exists once its connection is open and closes it when
//! dropped, so an unopened client can't be called at all.

pub mod kubernetes;
pub mod longhorn;
pub mod mariadb;

#[cfg(test)]
pub(crate) mod fake;

use derive_more::{Display, Error, From};

/// A pod resolved from a label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    /// Lifecycle phase as reported by the cluster, e.g. `Running`.
    pub phase: Option<String>,
}

impl PodInfo {
    pub fn is_running(&self) -> bool {
        self.phase.as_deref() == Some(POD_PHASE_RUNNING)
    }
}

const POD_PHASE_RUNNING: &str = "Running";

/// Storage identity of the volume bound to a persistent volume claim.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{volume}")]
pub struct VolumeIdentity {
    /// Namespace scoped claim name.
    pub claim: String,
    /// Cluster wide volume name, also the volume id of the storage system.
    pub volume: String,
}

/// A snapshot as listed by the storage system.
///
/// `created` is kept in the storage system's native representation; it is
/// parsed where it is used as ordering key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub name: String,
    pub created: String,
    pub removed: bool,
}

/// A backup as listed by the storage system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub name: String,
    /// Creation time of the snapshot the backup was taken from.
    pub snapshot_created: String,
    /// Completion in percent.
    pub progress: u8,
}

impl BackupRecord {
    pub fn is_complete(&self) -> bool {
        self.progress >= 100
    }
}

/// Kubernetes operations needed by the backup.
pub trait ClusterApi {
    /// Returns the single pod matching `selector`.
    fn pod_by_label(&self, selector: &str) -> Result<PodInfo, ClusterError>;

    /// Runs `command` with a shell inside `pod` and returns its captured output.
    fn exec_in_pod(&self, pod: &str, command: &str) -> Result<String, ClusterError>;

    /// Resolves the volume bound to the persistent volume claim `claim`.
    fn volume_for_claim(&self, claim: &str) -> Result<VolumeIdentity, ClusterError>;

    /// Runs `command` in the pod labeled `selector` once it is running.
    fn exec_by_label(&self, selector: &str, command: &str) -> Result<String, ClusterError> {
        let pod = self.pod_by_label(selector)?;
        if !pod.is_running() {
            return Err(ClusterError::PodNotRunning {
                pod: pod.name,
                phase: pod.phase.unwrap_or_default(),
            });
        }

        self.exec_in_pod(&pod.name, command)
    }
}

/// Snapshot and backup operations of the storage system.
///
/// Volumes and backup volumes are addressed by their id, which is the name of
/// the persistent volume.
pub trait StorageApi {
    /// Returns whether the volume exists.
    fn has_volume(&self, volume: &str) -> Result<bool, StorageError>;
    fn create_snapshot(&self, volume: &str, name: &str) -> Result<(), StorageError>;
    fn list_snapshots(&self, volume: &str) -> Result<Vec<SnapshotRecord>, StorageError>;
    fn delete_snapshot(&self, volume: &str, name: &str) -> Result<(), StorageError>;
    /// Starts an asynchronous backup of the snapshot `snapshot`.
    fn create_backup(&self, volume: &str, snapshot: &str) -> Result<(), StorageError>;

    /// Returns whether a backup volume exists, i.e. the volume was backed up before.
    fn has_backup_volume(&self, volume: &str) -> Result<bool, StorageError>;
    fn list_backups(&self, volume: &str) -> Result<Vec<BackupRecord>, StorageError>;
    fn delete_backup(&self, volume: &str, name: &str) -> Result<(), StorageError>;
}

/// A session of administrative SQL statements.
pub trait DbSession {
    fn execute(&mut self, statement: &str) -> Result<(), DatabaseError>;
}

#[derive(Debug, Display, Error)]
/// Failures of the Kubernetes API.
pub enum ClusterError {
    /// The cluster client couldn't be set up.
    #[display("Unable to connect to the Kubernetes API: {reason}")]
    Connection { reason: String },
    /// Listing pods failed.
    #[display("Unable to list pods with label {selector}: {reason}")]
    PodLookup { selector: String, reason: String },
    /// Not exactly one pod carries the label.
    #[display("Expected exactly one pod with label {selector} but found {found}")]
    NoUniquePod { selector: String, found: usize },
    /// The pod can't execute commands.
    #[display("Pod {pod} is not running (phase: {phase})")]
    PodNotRunning { pod: String, phase: String },
    /// The command couldn't be run or reported a failure.
    #[display("Executing '{command}' in pod {pod} failed: {reason}")]
    Exec {
        pod: String,
        command: String,
        reason: String,
    },
    /// Reading the persistent volume claim failed.
    #[display("Unable to read persistent volume claim {claim}: {reason}")]
    ClaimLookup { claim: String, reason: String },
    /// The claim isn't bound to a volume yet.
    #[display("Persistent volume claim {claim} is not bound to a volume")]
    ClaimUnbound { claim: String },
}

#[derive(Debug, Display, Error)]
/// Failures of the storage API.
pub enum StorageError {
    /// The storage API is unreachable.
    #[display("Unable to connect to the storage API at {url}: {reason}")]
    Connection { url: String, reason: String },
    /// A request couldn't be completed.
    #[display("Storage request '{operation}' failed: {reason}")]
    Request { operation: String, reason: String },
    /// The API answered with an error status.
    #[display("Storage request '{operation}' returned status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
}

#[derive(Debug, Display, Error)]
/// Failures of the database session.
pub enum DatabaseError {
    /// The connection couldn't be established.
    #[display("Unable to connect to MariaDB at {host}:{port}: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },
    /// A statement was rejected.
    #[display("Unable to execute the SQL statement '{statement}': {reason}")]
    Statement { statement: String, reason: String },
}

#[derive(Debug, Display, Error, From)]
/// Acquiring one of the clients failed.
pub enum ConnectionError {
    #[display("Kubernetes client: {_0}")]
    Cluster(ClusterError),
    #[display("Longhorn client: {_0}")]
    Storage(StorageError),
    #[display("MariaDB session: {_0}")]
    Database(DatabaseError),
}
