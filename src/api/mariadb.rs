use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use tokio::runtime::Runtime;

use super::{DatabaseError, DbSession};
use crate::cli::DatabaseConfig;

const ROOT_USER: &str = "root";

/// [DbSession] on a single MariaDB connection as `root`.
///
/// The connection is closed when the session is dropped.
pub struct MariaDbSession {
    runtime: Runtime,
    connection: Option<MySqlConnection>,
}

impl MariaDbSession {
    pub fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let connection_error = |reason: String| DatabaseError::Connection {
            host: config.host.clone(),
            port: config.port,
            reason,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| connection_error(e.to_string()))?;

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(ROOT_USER)
            .password(&config.root_password);

        let connection = runtime
            .block_on(options.connect())
            .map_err(|e| connection_error(e.to_string()))?;

        log::info!(target: "api::mariadb", "MariaDB connection established to {}:{}", config.host, config.port);
        Ok(Self {
            runtime,
            connection: Some(connection),
        })
    }
}

impl DbSession for MariaDbSession {
    fn execute(&mut self, statement: &str) -> Result<(), DatabaseError> {
        let statement_error = |reason: String| DatabaseError::Statement {
            statement: statement.to_owned(),
            reason,
        };
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| statement_error("connection already closed".to_owned()))?;

        log::debug!(target: "api::mariadb", "Execute: {statement}");
        self.runtime
            .block_on(sqlx::raw_sql(statement).execute(connection))
            .map_err(|e| statement_error(e.to_string()))?;
        Ok(())
    }
}

impl Drop for MariaDbSession {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            match self.runtime.block_on(connection.close()) {
                Ok(()) => log::debug!(target: "api::mariadb", "MariaDB connection closed"),
                Err(e) => log::error!(target: "api::mariadb", "Unable to close the MariaDB connection: {e}"),
            }
        }
    }
}
