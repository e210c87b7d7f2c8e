use crate::constants::{CLI_WAL_AUTOCHECKPOINT, SESSION_WAL_AUTOCHECKPOINT, SQLITE_BUSY_TIMEOUT_MS};
use crate::{ExchangeError, ExchangeResult};
use rusqlite::Connection;

/// Configuration role: differencie les pragmas selon l'appelant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Session, // wal_autocheckpoint = 1000
    Cli,     // wal_autocheckpoint = 0
}

/// Ouvre une connexion SQLite avec les pragmas appropries
pub fn open_connection(path: &std::path::Path, role: ConnectionRole) -> ExchangeResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)
        .map_err(|e| ExchangeError::storage(&format!("Failed to open {}", path.display()), e))?;

    tracing::debug!(path = %path.display(), role = ?role, "Database connection opened");

    configure_common(&conn)?;

    let autocheckpoint = match role {
        ConnectionRole::Session => SESSION_WAL_AUTOCHECKPOINT,
        ConnectionRole::Cli => CLI_WAL_AUTOCHECKPOINT,
    };
    conn.execute_batch(&format!("PRAGMA wal_autocheckpoint = {};", autocheckpoint))
        .map_err(|e| ExchangeError::storage("Failed to configure role pragmas", e))?;

    Ok(conn)
}

/// Pragmas communs a toutes les connexions:
/// - journal_mode = WAL
/// - busy_timeout = SQLITE_BUSY_TIMEOUT_MS (bounded request timeout)
/// - synchronous = NORMAL
/// - foreign_keys = ON
/// - temp_store = MEMORY
fn configure_common(conn: &Connection) -> ExchangeResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = {};
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
        SQLITE_BUSY_TIMEOUT_MS,
    ))
    .map_err(|e| ExchangeError::storage("Failed to configure pragmas", e))?;
    Ok(())
}
