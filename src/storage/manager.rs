use std::path::{Path, PathBuf};

use crate::config::ExchangeConfig;
use crate::ExchangeResult;
use rusqlite::Connection;

use super::database::{self, ConnectionRole};
use super::migrations;
use super::path_utils;

/// Gestionnaire de storage centralise
pub struct StorageManager {
    role: ConnectionRole,
    db_path: PathBuf,
}

impl StorageManager {
    pub fn new(role: ConnectionRole, config: &ExchangeConfig) -> Self {
        let db_path = config
            .database_path
            .clone()
            .unwrap_or_else(path_utils::exchange_db_path);
        Self { role, db_path }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Ouvre la base marketplace (cree si necessaire + migration).
    /// Each organization session gets its own connection.
    pub fn open(&self) -> ExchangeResult<Connection> {
        let conn = database::open_connection(&self.db_path, self.role)?;
        migrations::migrate_exchange_db(&conn)?;
        Ok(conn)
    }

    /// Cree le repertoire de donnees, la base et config.json par defaut
    pub fn init(&self) -> ExchangeResult<()> {
        std::fs::create_dir_all(path_utils::data_dir())?;
        let _conn = self.open()?;

        let config_path = path_utils::config_path();
        if !config_path.exists() {
            let json = serde_json::to_string_pretty(&ExchangeConfig::default())?;
            std::fs::write(&config_path, json)?;
        }
        tracing::info!(db = %self.db_path.display(), "Exchange storage initialized");
        Ok(())
    }
}
