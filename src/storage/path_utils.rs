use std::path::PathBuf;

/// Overrides the data directory (tests, multi-instance setups).
pub const HOME_ENV: &str = "RESOURCE_EXCHANGE_HOME";

/// Retourne le repertoire de donnees centralise cross-platform.
/// Linux: ~/.config/resource-exchange/
/// macOS: ~/Library/Application Support/resource-exchange/
/// Windows: %APPDATA%/resource-exchange/
pub fn data_dir() -> PathBuf {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    let base = dirs::config_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
    });
    base.join("resource-exchange")
}

/// Retourne le chemin par defaut de la base: {data_dir}/exchange.db
pub fn exchange_db_path() -> PathBuf {
    data_dir().join("exchange.db")
}

/// Retourne le chemin de config.json: {data_dir}/config.json
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Retourne le chemin du journal: {data_dir}/exchange.log
pub fn log_path() -> PathBuf {
    data_dir().join("exchange.log")
}
