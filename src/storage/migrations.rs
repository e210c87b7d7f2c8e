use crate::{ExchangeError, ExchangeResult};
use rusqlite::Connection;

/// Schema version actuelle
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Retourne la version de schema actuelle (0 si table absente)
pub fn get_schema_version(conn: &Connection) -> ExchangeResult<u32> {
    let exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |r| r.get(0),
        )
        .map_err(|e| ExchangeError::storage("Read schema_version", e))?;

    if !exists {
        return Ok(0);
    }

    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .map_err(|e| ExchangeError::storage("Read schema_version", e))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> ExchangeResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
        rusqlite::params![version],
    )
    .map_err(|e| ExchangeError::storage("Write schema_version", e))?;
    Ok(())
}

// ── V1: initial marketplace schema ──
//
// Listings still carry the legacy `is_special` flag instead of a category.

const EXCHANGE_DB_V1: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS organizations (
    id TEXT PRIMARY KEY,
    handle TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL UNIQUE,
    company_name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL,
    address TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS listings (
    id TEXT PRIMARY KEY,
    owner_org_id TEXT NOT NULL REFERENCES organizations(id),
    descriptor TEXT NOT NULL,
    window_from TEXT NOT NULL,
    window_to TEXT NOT NULL,
    location TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    contact_info TEXT NOT NULL,
    is_special INTEGER NOT NULL DEFAULT 0,
    price REAL,
    price_kind TEXT,
    state TEXT NOT NULL DEFAULT 'open',
    reserved_by TEXT REFERENCES organizations(id),
    created_at TEXT NOT NULL,
    CHECK (window_from <= window_to)
);
CREATE INDEX IF NOT EXISTS idx_listings_state ON listings(state);
CREATE INDEX IF NOT EXISTS idx_listings_owner ON listings(owner_org_id);
CREATE INDEX IF NOT EXISTS idx_listings_reserved_by ON listings(reserved_by);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    thread_id TEXT NOT NULL,
    sender_org_id TEXT NOT NULL REFERENCES organizations(id),
    recipient_org_id TEXT NOT NULL REFERENCES organizations(id),
    listing_id TEXT NOT NULL REFERENCES listings(id),
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    read_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_org_id, read_at);
CREATE INDEX IF NOT EXISTS idx_messages_listing ON messages(listing_id);

CREATE TABLE IF NOT EXISTS contact_disclosures (
    thread_id TEXT PRIMARY KEY,
    org_a TEXT NOT NULL REFERENCES organizations(id),
    org_b TEXT NOT NULL REFERENCES organizations(id),
    created_at TEXT NOT NULL,
    CHECK (org_a < org_b)
);
CREATE INDEX IF NOT EXISTS idx_disclosures_a ON contact_disclosures(org_a);
CREATE INDEX IF NOT EXISTS idx_disclosures_b ON contact_disclosures(org_b);
";

/// Verifie et applique les migrations de la base marketplace
pub fn migrate_exchange_db(conn: &Connection) -> ExchangeResult<()> {
    let version = get_schema_version(conn)?;

    if version < 1 {
        conn.execute_batch(EXCHANGE_DB_V1)
            .map_err(|e| ExchangeError::storage("Exchange DB V1 migration failed", e))?;
        set_schema_version(conn, 1)?;
    }

    // V2: closed category tag + skill tags; legacy rows backfilled from is_special
    if version < 2 {
        conn.execute_batch(
            "ALTER TABLE listings ADD COLUMN category TEXT NOT NULL DEFAULT 'offering-staff';
             ALTER TABLE listings ADD COLUMN skill_tags TEXT NOT NULL DEFAULT '[]';
             UPDATE listings SET category = 'offering-special-skill' WHERE is_special = 1;
             CREATE INDEX IF NOT EXISTS idx_listings_category ON listings(category);",
        )
        .map_err(|e| ExchangeError::storage("Exchange DB V2 migration failed", e))?;
        set_schema_version(conn, 2)?;
    }

    // V3: one thread per (listing, initiator) + organization verification
    if version < 3 {
        conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_thread_root
                 ON messages(listing_id, sender_org_id) WHERE id = thread_id;
             ALTER TABLE organizations ADD COLUMN verification_hash TEXT;
             ALTER TABLE organizations ADD COLUMN verified_at TEXT;",
        )
        .map_err(|e| ExchangeError::storage("Exchange DB V3 migration failed", e))?;
        set_schema_version(conn, 3)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_db_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_exchange_db(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_exchange_db(&conn).unwrap();
        migrate_exchange_db(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_v2_backfills_legacy_listings() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(EXCHANGE_DB_V1).unwrap();
        set_schema_version(&conn, 1).unwrap();

        conn.execute_batch(
            "INSERT INTO organizations (id, handle, user_id, company_name, email, phone, address, created_at)
             VALUES ('o1', 'member_aaaaa', 'u1', 'Acme', 'a@acme.no', '1', 'Street 1', '2024-01-01T00:00:00+00:00');
             INSERT INTO listings (id, owner_org_id, descriptor, window_from, window_to, location, contact_info, is_special, created_at)
             VALUES ('l-special', 'o1', 'Fiber', '2024-06-01', '2024-06-30', 'Oslo', 'x', 1, '2024-01-01T00:00:00+00:00'),
                    ('l-plain', 'o1', 'Electrician', '2024-06-01', '2024-06-30', 'Oslo', 'x', 0, '2024-01-01T00:00:00+00:00');",
        )
        .unwrap();

        migrate_exchange_db(&conn).unwrap();

        let cat = |id: &str| -> String {
            conn.query_row("SELECT category FROM listings WHERE id = ?1", [id], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(cat("l-special"), "offering-special-skill");
        assert_eq!(cat("l-plain"), "offering-staff");
    }

    #[test]
    fn test_inverted_window_rejected_by_schema() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_exchange_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO organizations (id, handle, user_id, company_name, email, phone, address, created_at)
             VALUES ('o1', 'member_aaaaa', 'u1', 'Acme', 'a@acme.no', '1', 'Street 1', '2024-01-01T00:00:00+00:00')",
            [],
        )
        .unwrap();
        let res = conn.execute(
            "INSERT INTO listings (id, owner_org_id, descriptor, window_from, window_to, location, contact_info, created_at)
             VALUES ('l1', 'o1', 'x', '2024-07-01', '2024-06-01', 'Oslo', 'x', '2024-01-01T00:00:00+00:00')",
            [],
        );
        assert!(res.is_err());
    }
}
