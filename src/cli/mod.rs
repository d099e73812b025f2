//! Command line and environment configuration.
//!
//! Every option can be given as flag or as environment variable, the latter
//! being the usual way inside a Kubernetes `CronJob`.

use clap::builder::BoolishValueParser;
use clap::Parser;
use derive_more::{Display, Error};
use log::LevelFilter;

use crate::backends::BackupMode;
use crate::util::retention::{
    RetentionConfig, DEFAULT_BACKUPS_TO_RETAIN, DEFAULT_SNAPSHOTS_TO_RETAIN,
};

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Kind of copy to take of every volume.
    #[arg(long, env = "BACKUP_TYPE", value_enum)]
    pub backup_type: BackupMode,

    /// Namespace of the Nextcloud and MariaDB deployments.
    #[arg(long, env = "NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Value of the `app` label of the Nextcloud pod.
    #[arg(long, env = "NEXTCLOUD_APP_NAME")]
    pub nextcloud_app_name: String,

    /// Persistent volume claim of the Nextcloud data.
    #[arg(long, env = "NEXTCLOUD_VOLUME_NAME")]
    pub nextcloud_volume_name: String,

    /// Value of the `app` label of the MariaDB pod.
    #[arg(long, env = "MARIADB_APP_NAME")]
    pub mariadb_app_name: String,

    /// Password of the MariaDB `root` user.
    #[arg(long, env = "MARIADB_DB_ROOT_PASSWORD", hide_env_values = true)]
    pub mariadb_db_root_password: String,

    /// Host name of the MariaDB server.
    #[arg(long, env = "MARIADB_URL")]
    pub mariadb_url: String,

    /// Port of the MariaDB server.
    #[arg(long, env = "MARIADB_PORT")]
    pub mariadb_port: u16,

    /// Persistent volume claim of the MariaDB data directory.
    #[arg(long, env = "MARIADB_ACTUAL_VOLUME_NAME")]
    pub mariadb_actual_volume_name: String,

    /// Persistent volume claim the SQL dump is written to.
    #[arg(long, env = "MARIADB_BACKUP_VOLUME_NAME")]
    pub mariadb_backup_volume_name: String,

    /// Path of the SQL dump inside the MariaDB pod.
    #[arg(long, env = "MARIADB_BACKUP_FILE_PATH")]
    pub mariadb_backup_file_path: String,

    /// Root of the Longhorn API, e.g. `http://longhorn-backend.longhorn-system:9500/v1`.
    #[arg(long, env = "LONGHORN_URL")]
    pub longhorn_url: String,

    /// Snapshots to keep per volume.
    #[arg(long, env = "NR_SNAPSHOTS_TO_RETAIN", default_value_t = DEFAULT_SNAPSHOTS_TO_RETAIN)]
    pub nr_snapshots_to_retain: usize,

    /// Completed backups to keep per volume.
    #[arg(long, env = "NR_BACKUPS_TO_RETAIN", default_value_t = DEFAULT_BACKUPS_TO_RETAIN)]
    pub nr_backups_to_retain: usize,

    /// Use the service account of the pod instead of the local kubeconfig.
    #[arg(
        long,
        env = "IN_CLUSTER_MODE",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::Set,
    )]
    pub in_cluster_mode: bool,

    /// Log debug output including the causes of every failure.
    #[arg(
        long,
        env = "DEBUG",
        default_value = "false",
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::Set,
    )]
    pub debug: bool,

    /// Verbosity of the command output, overrides `--debug`.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,
}

impl Cli {
    /// Log level requested by `--verbose` or `--debug`.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            Some(level) => level,
            None if self.debug => LevelFilter::Debug,
            None => LevelFilter::Info,
        }
    }
}

#[derive(Debug, Display, Error)]
/// Invalid configuration.
pub enum ConfigError {
    /// A mandatory value is set but empty.
    #[display("{_0} must not be empty")]
    Empty(#[error(ignore)] &'static str),
    /// A retention count of zero would delete the fresh snapshots and backups.
    #[display("{_0} must be at least 1")]
    ZeroRetention(#[error(ignore)] &'static str),
}

/// Access to the Kubernetes API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesConfig {
    pub namespace: String,
    pub in_cluster: bool,
}

/// Connection to the MariaDB server.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub root_password: String,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Access to the Longhorn API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LonghornConfig {
    pub url: String,
    pub retention: RetentionConfig,
}

/// The Nextcloud deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextcloudConfig {
    pub app_name: String,
    pub volume_claim: String,
}

/// The MariaDB deployment.
#[derive(Clone, PartialEq, Eq)]
pub struct MariaDbConfig {
    pub app_name: String,
    pub root_password: String,
    pub actual_volume_claim: String,
    pub backup_volume_claim: String,
    pub dump_file_path: String,
}

impl std::fmt::Debug for MariaDbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MariaDbConfig")
            .field("app_name", &self.app_name)
            .field("actual_volume_claim", &self.actual_volume_claim)
            .field("backup_volume_claim", &self.backup_volume_claim)
            .field("dump_file_path", &self.dump_file_path)
            .finish_non_exhaustive()
    }
}

/// Validated configuration of a backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub mode: BackupMode,
    pub kubernetes: KubernetesConfig,
    pub database: DatabaseConfig,
    pub longhorn: LonghornConfig,
    pub nextcloud: NextcloudConfig,
    pub mariadb: MariaDbConfig,
}

fn non_empty(name: &'static str, value: String) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Empty(name))
    } else {
        Ok(value)
    }
}

fn retain_count(name: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroRetention(name))
    } else {
        Ok(value)
    }
}

impl TryFrom<Cli> for BackupConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let root_password = non_empty("MARIADB_DB_ROOT_PASSWORD", cli.mariadb_db_root_password)?;

        Ok(Self {
            mode: cli.backup_type,
            kubernetes: KubernetesConfig {
                namespace: non_empty("NAMESPACE", cli.namespace)?,
                in_cluster: cli.in_cluster_mode,
            },
            database: DatabaseConfig {
                host: non_empty("MARIADB_URL", cli.mariadb_url)?,
                port: cli.mariadb_port,
                root_password: root_password.clone(),
            },
            longhorn: LonghornConfig {
                url: non_empty("LONGHORN_URL", cli.longhorn_url)?,
                retention: RetentionConfig {
                    snapshots: retain_count("NR_SNAPSHOTS_TO_RETAIN", cli.nr_snapshots_to_retain)?,
                    backups: retain_count("NR_BACKUPS_TO_RETAIN", cli.nr_backups_to_retain)?,
                },
            },
            nextcloud: NextcloudConfig {
                app_name: non_empty("NEXTCLOUD_APP_NAME", cli.nextcloud_app_name)?,
                volume_claim: non_empty("NEXTCLOUD_VOLUME_NAME", cli.nextcloud_volume_name)?,
            },
            mariadb: MariaDbConfig {
                app_name: non_empty("MARIADB_APP_NAME", cli.mariadb_app_name)?,
                root_password,
                actual_volume_claim: non_empty(
                    "MARIADB_ACTUAL_VOLUME_NAME",
                    cli.mariadb_actual_volume_name,
                )?,
                backup_volume_claim: non_empty(
                    "MARIADB_BACKUP_VOLUME_NAME",
                    cli.mariadb_backup_volume_name,
                )?,
                dump_file_path: non_empty("MARIADB_BACKUP_FILE_PATH", cli.mariadb_backup_file_path)?,
            },
        })
    }
}
