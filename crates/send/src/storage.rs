//! Persistent state backing the send pipeline.
//!
//! Per DESIGN NOTES §9 ("Dynamic dispatch of storage handles"): the source
//! threads a mutable transaction object through many call sites. Here that
//! becomes an explicit `read`/`write` method pair on `SendStore`, each
//! taking a closure over the underlying handle — mutation is only
//! reachable through `write`, which wraps the closure in one
//! `rusqlite::Transaction` and commits on success. `openconv_send` owns
//! one new table (`send_recipients`); it reuses `openconv_crypto`'s
//! `crypto_sessions` and `crypto_trusted_identities` tables directly over
//! the same connection rather than duplicating session/identity state.

use std::collections::BTreeSet;

use openconv_crypto::storage::CryptoStore;
use rusqlite::{Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;

use crate::address::Address;
use crate::error::SendError;
use crate::recipient::{AccountId, Recipient};

const MIGRATION: &str = "
CREATE TABLE IF NOT EXISTS send_recipients (
    account_id TEXT PRIMARY KEY,
    uuid TEXT,
    phone_number TEXT,
    device_ids TEXT NOT NULL DEFAULT '[]',
    registered INTEGER NOT NULL DEFAULT 0
);
";

/// Async-safe handle around the single SQLite connection the send pipeline
/// mutates. Readers and writers both go through the same mutex; SQLite's
/// own transaction semantics provide the row-level isolation the spec asks
/// for once inside a `write` closure.
pub struct SendStore {
    conn: Mutex<Connection>,
}

impl SendStore {
    pub fn new(conn: Connection) -> Result<Self, SendError> {
        conn.execute_batch(MIGRATION)?;
        CryptoStore::new(&conn).run_migrations()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, SendError> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Run `f` under a read-only snapshot. Per spec.md §4.6, readers used
    /// to compute "which devices need sessions" operate under a separate
    /// read, whose snapshot is then acted upon by a later `write`.
    pub async fn read<F, R>(&self, f: F) -> Result<R, SendError>
    where
        F: FnOnce(&Connection) -> Result<R, SendError> + Send,
        R: Send,
    {
        let conn = self.conn.lock().await;
        f(&conn)
    }

    /// Run `f` inside one write transaction, committing on `Ok` and rolling
    /// back (rusqlite's default `Drop` behavior) on `Err`.
    pub async fn write<F, R>(&self, f: F) -> Result<R, SendError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<R, SendError> + Send,
        R: Send,
    {
        let conn = self.conn.lock().await;
        let txn = conn.unchecked_transaction()?;
        let result = f(&txn)?;
        txn.commit()?;
        Ok(result)
    }

    /// Run `f` with the connection locked but without opening an explicit
    /// transaction of our own — for collaborators like
    /// `openconv_crypto::session::create_outgoing_session_for_device` that
    /// open and commit their own transaction internally. Calling `write`
    /// around one of these would nest a second `BEGIN` inside the first and
    /// fail at the SQLite layer.
    pub async fn with_own_transaction<F, R>(&self, f: F) -> Result<R, SendError>
    where
        F: FnOnce(&Connection) -> Result<R, SendError> + Send,
        R: Send,
    {
        let conn = self.conn.lock().await;
        f(&conn)
    }

    pub fn get_recipient_sync(
        conn: &Connection,
        account_id: AccountId,
    ) -> Result<Option<Recipient>, SendError> {
        let row: Option<(Option<String>, Option<String>, String, i64)> = conn
            .query_row(
                "SELECT uuid, phone_number, device_ids, registered FROM send_recipients WHERE account_id = ?1",
                [account_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((uuid, phone_number, device_ids_json, registered)) = row else {
            return Ok(None);
        };

        let address = Address {
            uuid: uuid.map(|u| u.parse().map_err(|_| SendError::Internal("corrupt uuid in send_recipients".into()))).transpose()?,
            phone_number,
        };
        let device_ids: Vec<u32> = serde_json::from_str(&device_ids_json)
            .map_err(|e| SendError::Internal(format!("corrupt device_ids column: {e}")))?;

        let mut recipient = Recipient::new(account_id, address);
        recipient.add_devices(device_ids);
        if registered != 0 {
            recipient.mark_registered();
        }
        Ok(Some(recipient))
    }

    pub fn save_recipient(txn: &Transaction<'_>, recipient: &Recipient) -> Result<(), SendError> {
        let device_ids: Vec<u32> = recipient.device_ids.iter().copied().collect();
        let device_ids_json = serde_json::to_string(&device_ids)
            .map_err(|e| SendError::Internal(format!("failed to serialize device_ids: {e}")))?;
        txn.execute(
            "INSERT INTO send_recipients (account_id, uuid, phone_number, device_ids, registered)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(account_id) DO UPDATE SET
                uuid = excluded.uuid,
                phone_number = excluded.phone_number,
                device_ids = excluded.device_ids,
                registered = excluded.registered",
            rusqlite::params![
                recipient.account_id.to_string(),
                recipient.address.uuid.map(|u| u.to_string()),
                recipient.address.phone_number,
                device_ids_json,
                recipient.registered as i64,
            ],
        )?;
        Ok(())
    }

    /// Devices from `candidates` that currently have no session row for
    /// `account_id`, read under one snapshot per spec.md §4.2.
    pub fn devices_without_session(
        conn: &Connection,
        account_id: AccountId,
        candidates: &[u32],
    ) -> Result<Vec<u32>, SendError> {
        let mut missing = Vec::new();
        for &device_id in candidates {
            let exists = Self::session_exists(conn, account_id, device_id)?;
            if !exists {
                missing.push(device_id);
            }
        }
        Ok(missing)
    }

    pub fn session_exists(
        conn: &Connection,
        account_id: AccountId,
        device_id: u32,
    ) -> Result<bool, SendError> {
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM crypto_sessions WHERE address = ?1 AND device_id = ?2",
                rusqlite::params![account_id.to_string(), device_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn delete_session(
        txn: &Transaction<'_>,
        account_id: AccountId,
        device_id: u32,
    ) -> Result<(), SendError> {
        txn.execute(
            "DELETE FROM crypto_sessions WHERE address = ?1 AND device_id = ?2",
            rusqlite::params![account_id.to_string(), device_id],
        )?;
        Ok(())
    }

    /// The canonical identity key currently trusted for `account_id`, read
    /// off the primary-device row `openconv_crypto::storage::identity_store`
    /// maintains (accounts share one identity key across devices).
    pub fn current_identity_key(
        conn: &Connection,
        account_id: AccountId,
    ) -> Result<Option<Vec<u8>>, SendError> {
        let key: Option<Vec<u8>> = conn
            .query_row(
                "SELECT identity_key FROM crypto_trusted_identities WHERE address = ?1 AND device_id = ?2",
                rusqlite::params![account_id.to_string(), Recipient::PRIMARY_DEVICE_ID],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

}
