use anyhow::{Context, Result};
use resource_exchange::config::ExchangeConfig;
use resource_exchange::storage::database::ConnectionRole;
use resource_exchange::storage::manager::StorageManager;
use resource_exchange::storage::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};
use resource_exchange::storage::path_utils;

/// resource-exchange init: data directory, database, default config.json
pub fn run() -> Result<()> {
    let config = ExchangeConfig::load();
    let manager = StorageManager::new(ConnectionRole::Cli, &config);

    println!("Initializing resource exchange in: {}", path_utils::data_dir().display());
    manager.init().context("Failed to initialize storage")?;

    let conn = manager.open().context("Failed to open exchange database")?;
    let version = get_schema_version(&conn).context("Failed to read schema version")?;
    println!("  Database: {}", manager.db_path().display());
    println!("  Schema:   v{} (current v{})", version, CURRENT_SCHEMA_VERSION);
    println!("  Config:   {}", path_utils::config_path().display());
    println!("  Log:      {}", path_utils::log_path().display());
    println!("Done.");
    Ok(())
}
