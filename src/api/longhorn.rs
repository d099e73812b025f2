use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{BackupRecord, SnapshotRecord, StorageApi, StorageError};

/// Pseudo snapshot Longhorn lists for the live state of a volume.
const VOLUME_HEAD: &str = "volume-head";

/// [StorageApi] backed by the Longhorn REST API.
pub struct LonghornClient {
    client: Client,
    /// API root, e.g. `http://longhorn-backend:9500/v1`, without trailing slash.
    url: String,
}

/// Listing envelope of the Longhorn API.
#[derive(Debug, Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    name: String,
    #[serde(default)]
    created: String,
    #[serde(default)]
    removed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Backup {
    name: String,
    #[serde(default)]
    snapshot_created: String,
    #[serde(default)]
    progress: u8,
}

impl From<Snapshot> for SnapshotRecord {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            name: snapshot.name,
            created: snapshot.created,
            removed: snapshot.removed,
        }
    }
}

impl From<Backup> for BackupRecord {
    fn from(backup: Backup) -> Self {
        Self {
            name: backup.name,
            snapshot_created: backup.snapshot_created,
            progress: backup.progress,
        }
    }
}

fn snapshot_records(listing: Collection<Snapshot>) -> Vec<SnapshotRecord> {
    listing
        .data
        .into_iter()
        .filter(|snapshot| snapshot.name != VOLUME_HEAD)
        .map(SnapshotRecord::from)
        .collect()
}

fn backup_records(listing: Collection<Backup>) -> Vec<BackupRecord> {
    listing.data.into_iter().map(BackupRecord::from).collect()
}

impl LonghornClient {
    /// Creates the client and checks the API root answers.
    pub fn connect(url: &str) -> Result<Self, StorageError> {
        let url = url.trim_end_matches('/').to_owned();
        let connection_error = |reason: String| StorageError::Connection {
            url: url.clone(),
            reason,
        };

        let client = Client::builder()
            .build()
            .map_err(|e| connection_error(e.to_string()))?;

        let response = client
            .get(&url)
            .send()
            .map_err(|e| connection_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(connection_error(format!("status {}", response.status())));
        }

        log::info!(target: "api::longhorn", "Longhorn API connection established at {url}");
        Ok(Self { client, url })
    }

    fn get(&self, operation: &str, path: &str) -> Result<Response, StorageError> {
        log::trace!(target: "api::longhorn", "GET {}/{path}", self.url);
        self.client
            .get(format!("{}/{path}", self.url))
            .send()
            .map_err(|e| request_error(operation, e))
    }

    /// Invokes a resource action, e.g. `POST volumes/pv-1?action=snapshotCreate`.
    fn action(
        &self,
        operation: &str,
        path: &str,
        action: &str,
        body: serde_json::Value,
    ) -> Result<Response, StorageError> {
        log::trace!(target: "api::longhorn", "POST {}/{path}?action={action}", self.url);
        let response = self
            .client
            .post(format!("{}/{path}", self.url))
            .query(&[("action", action)])
            .json(&body)
            .send()
            .map_err(|e| request_error(operation, e))?;
        ensure_success(operation, response)
    }

    /// Resolves to `None` if the resource doesn't exist.
    fn get_optional(&self, operation: &str, path: &str) -> Result<Option<Response>, StorageError> {
        let response = self.get(operation, path)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        ensure_success(operation, response).map(Some)
    }
}

fn request_error(operation: &str, err: reqwest::Error) -> StorageError {
    StorageError::Request {
        operation: operation.to_owned(),
        reason: err.to_string(),
    }
}

fn ensure_success(operation: &str, response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(StorageError::Status {
        operation: operation.to_owned(),
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T, StorageError> {
    response.json().map_err(|e| request_error(operation, e))
}

impl StorageApi for LonghornClient {
    fn has_volume(&self, volume: &str) -> Result<bool, StorageError> {
        let operation = format!("get volume {volume}");
        Ok(self
            .get_optional(&operation, &format!("volumes/{volume}"))?
            .is_some())
    }

    fn create_snapshot(&self, volume: &str, name: &str) -> Result<(), StorageError> {
        let operation = format!("create snapshot {name} of {volume}");
        self.action(
            &operation,
            &format!("volumes/{volume}"),
            "snapshotCreate",
            json!({ "name": name }),
        )?;
        log::debug!(target: "api::longhorn", "Created snapshot {name} of volume {volume}");
        Ok(())
    }

    fn list_snapshots(&self, volume: &str) -> Result<Vec<SnapshotRecord>, StorageError> {
        let operation = format!("list snapshots of {volume}");
        let response = self.action(
            &operation,
            &format!("volumes/{volume}"),
            "snapshotList",
            json!({}),
        )?;
        Ok(snapshot_records(decode(&operation, response)?))
    }

    fn delete_snapshot(&self, volume: &str, name: &str) -> Result<(), StorageError> {
        let operation = format!("delete snapshot {name} of {volume}");
        self.action(
            &operation,
            &format!("volumes/{volume}"),
            "snapshotDelete",
            json!({ "name": name }),
        )?;
        log::debug!(target: "api::longhorn", "Deleted snapshot {name} of volume {volume}");
        Ok(())
    }

    fn create_backup(&self, volume: &str, snapshot: &str) -> Result<(), StorageError> {
        let operation = format!("back up snapshot {snapshot} of {volume}");
        self.action(
            &operation,
            &format!("volumes/{volume}"),
            "snapshotBackup",
            json!({ "name": snapshot }),
        )?;
        log::debug!(target: "api::longhorn", "Started backup of snapshot {snapshot} of volume {volume}");
        Ok(())
    }

    fn has_backup_volume(&self, volume: &str) -> Result<bool, StorageError> {
        let operation = format!("get backup volume {volume}");
        Ok(self
            .get_optional(&operation, &format!("backupvolumes/{volume}"))?
            .is_some())
    }

    fn list_backups(&self, volume: &str) -> Result<Vec<BackupRecord>, StorageError> {
        let operation = format!("list backups of {volume}");
        let response = self.action(
            &operation,
            &format!("backupvolumes/{volume}"),
            "backupList",
            json!({}),
        )?;
        Ok(backup_records(decode(&operation, response)?))
    }

    fn delete_backup(&self, volume: &str, name: &str) -> Result<(), StorageError> {
        let operation = format!("delete backup {name} of {volume}");
        self.action(
            &operation,
            &format!("backupvolumes/{volume}"),
            "backupDelete",
            json!({ "name": name }),
        )?;
        log::debug!(target: "api::longhorn", "Deleted backup {name} of volume {volume}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_listing_skips_volume_head() {
        let listing: Collection<Snapshot> = serde_json::from_str(
            r#"{
                "type": "collection",
                "data": [
                    {"name": "volume-head", "created": "2024-05-01T12:10:00Z", "removed": false},
                    {"name": "01-05-2024__12-00-00", "created": "2024-05-01T12:00:00Z", "removed": false, "size": "4096"},
                    {"name": "30-04-2024__12-00-00", "created": "2024-04-30T12:00:00Z", "removed": true}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            snapshot_records(listing),
            [
                SnapshotRecord {
                    name: "01-05-2024__12-00-00".into(),
                    created: "2024-05-01T12:00:00Z".into(),
                    removed: false,
                },
                SnapshotRecord {
                    name: "30-04-2024__12-00-00".into(),
                    created: "2024-04-30T12:00:00Z".into(),
                    removed: true,
                },
            ]
        );
    }

    #[test]
    fn backup_listing() {
        let listing: Collection<Backup> = serde_json::from_str(
            r#"{
                "data": [
                    {"name": "backup-a", "snapshotCreated": "2024-05-01T12:00:00Z", "progress": 100, "state": "Completed"},
                    {"name": "backup-b", "snapshotCreated": "2024-05-02T12:00:00Z", "progress": 42}
                ]
            }"#,
        )
        .unwrap();

        let backups = backup_records(listing);

        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].snapshot_created, "2024-05-01T12:00:00Z");
        assert!(backups[0].is_complete());
        assert!(!backups[1].is_complete());
    }

    #[test]
    fn empty_listing() {
        let listing: Collection<Backup> = serde_json::from_str(r#"{"type": "collection"}"#).unwrap();
        assert!(backup_records(listing).is_empty());
    }
}
