use sea_orm::{ConnectOptions, Database};
use xfer_bridge_domain::config::DatabaseConfig;
use xfer_bridge_domain::storage::StorageResult;

use crate::{errors::StorageError, prepare_connection, SeaOrmStorage};

#[derive(Default)]
pub struct StorageBuilder {
    database_url: Option<String>,
    max_connections: Option<u32>,
    sql_logging: bool,
}

impl StorageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self {
            database_url: Some(config.url.clone()),
            max_connections: config.max_connections,
            sql_logging: config.sql_logging,
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    /// Emits every statement through `tracing` at debug level.
    pub fn sql_logging(mut self, enabled: bool) -> Self {
        self.sql_logging = enabled;
        self
    }

    pub async fn build(self) -> StorageResult<SeaOrmStorage> {
        let url = self
            .database_url
            .ok_or_else(|| StorageError::Database("missing database url".into()))?;
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(self.sql_logging);
        if let Some(max) = self.max_connections {
            options.max_connections(max);
        }
        let db = Database::connect(options)
            .await
            .map_err(StorageError::from_source)?;
        prepare_connection(&db).await?;
        Ok(SeaOrmStorage::from_connection(db))
    }
}
