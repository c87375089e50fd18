//! Crypto migration runner — separate from the desktop app's `_migrations` table.

use crate::error::CryptoError;
use rusqlite::Connection;

const MIGRATIONS: &[(i32, &str)] = &[(1, MIGRATION_001), (2, MIGRATION_002)];

const MIGRATION_001: &str = "
CREATE TABLE IF NOT EXISTS crypto_identity_keys (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    public_key  BLOB NOT NULL,
    private_key BLOB NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS crypto_trusted_identities (
    address       TEXT NOT NULL,
    device_id     INTEGER NOT NULL DEFAULT 1,
    identity_key  BLOB NOT NULL,
    first_seen_at INTEGER NOT NULL,
    verified_at   INTEGER,
    PRIMARY KEY (address, device_id)
);

CREATE TABLE IF NOT EXISTS crypto_pre_keys (
    key_id     INTEGER PRIMARY KEY,
    record     BLOB NOT NULL,
    uploaded   INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS crypto_signed_pre_keys (
    key_id     INTEGER PRIMARY KEY,
    record     BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS crypto_sessions (
    address      TEXT NOT NULL,
    device_id    INTEGER NOT NULL DEFAULT 1,
    session_data BLOB NOT NULL,
    created_at   INTEGER NOT NULL,
    last_used_at INTEGER NOT NULL,
    PRIMARY KEY (address, device_id)
);

CREATE TABLE IF NOT EXISTS crypto_skipped_message_keys (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    session_address    TEXT NOT NULL,
    session_device_id  INTEGER NOT NULL DEFAULT 1,
    ratchet_key        BLOB NOT NULL,
    message_number     INTEGER NOT NULL,
    message_key        BLOB NOT NULL,
    created_at         INTEGER NOT NULL,
    UNIQUE (session_address, session_device_id, ratchet_key, message_number)
);

CREATE TABLE IF NOT EXISTS crypto_config (
    key   TEXT PRIMARY KEY,
    value BLOB NOT NULL
);
";

const MIGRATION_002: &str = "
CREATE TABLE IF NOT EXISTS crypto_kyber_pre_keys (
    key_id     INTEGER PRIMARY KEY,
    record     BLOB NOT NULL,
    created_at INTEGER NOT NULL
);
";

pub fn run_crypto_migrations(conn: &Connection) -> Result<(), CryptoError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _crypto_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _crypto_migrations",
        [],
        |row| row.get(0),
    )?;

    for &(version, sql) in MIGRATIONS {
        if version > current_version {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(sql)?;
            tx.execute(
                "INSERT INTO _crypto_migrations (version) VALUES (?1)",
                [version],
            )?;
            tx.commit()?;
        }
    }

    Ok(())
}
