//! SeaORM-backed storage adapters that satisfy the domain storage traits while
//! keeping the database backend swappable (SQLite by default, PostgreSQL via
//! feature flag).

mod builder;
mod convert;
mod cursor_store;
mod entity;
mod errors;
mod event_store;
mod intent_store;
mod migration;


use std::sync::Arc;

pub use builder::StorageBuilder;
use errors::StorageError;
use migration::run_migrations;
use sea_orm::{Database, DatabaseConnection};
use xfer_bridge_domain::config::DatabaseConfig;
use xfer_bridge_domain::storage::StorageResult;

/// Shared storage handle used by the HTTP API and monitor services.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = Database::connect(database_url)
            .await
            .map_err(StorageError::from_source)?;
        prepare_connection(&db).await?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Connects with the pool settings of `config`.
    pub async fn connect_with(config: &DatabaseConfig) -> StorageResult<Self> {
        StorageBuilder::from_config(config).build().await
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_connection(db: DatabaseConnection) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

pub(crate) async fn prepare_connection(db: &DatabaseConnection) -> StorageResult<()> {
    run_migrations(db).await
}
