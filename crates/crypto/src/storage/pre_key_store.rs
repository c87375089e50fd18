//! PreKeyStore trait implementation for CryptoStore.

use async_trait::async_trait;
use libsignal_protocol::{PreKeyId, PreKeyRecord, PreKeyStore, SignalProtocolError};

use crate::storage::CryptoStore;

#[async_trait(?Send)]
impl PreKeyStore for CryptoStore<'_> {
    async fn get_pre_key(&self, prekey_id: PreKeyId) -> Result<PreKeyRecord, SignalProtocolError> {
        let id: u32 = prekey_id.into();
        let record_bytes: Vec<u8> = self
            .conn
            .query_row(
                "SELECT record FROM crypto_pre_keys WHERE key_id = ?1",
                [id],
                |row| row.get(0),
            )
            .map_err(|_| SignalProtocolError::InvalidPreKeyId)?;

        PreKeyRecord::deserialize(&record_bytes)
    }

    async fn save_pre_key(
        &mut self,
        prekey_id: PreKeyId,
        record: &PreKeyRecord,
    ) -> Result<(), SignalProtocolError> {
        let id: u32 = prekey_id.into();
        let record_bytes = record.serialize()?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| {
                SignalProtocolError::InvalidState(
                    "save_pre_key",
                    "system clock before epoch".into(),
                )
            })?
            .as_secs() as i64;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO crypto_pre_keys (key_id, record, uploaded, created_at) VALUES (?1, ?2, 0, ?3)",
                rusqlite::params![id, record_bytes, now],
            )
            .map_err(|e| SignalProtocolError::InvalidState("save_pre_key", e.to_string()))?;

        Ok(())
    }

    async fn remove_pre_key(&mut self, prekey_id: PreKeyId) -> Result<(), SignalProtocolError> {
        let id: u32 = prekey_id.into();
        self.conn
            .execute("DELETE FROM crypto_pre_keys WHERE key_id = ?1", [id])
            .map_err(|e| SignalProtocolError::InvalidState("remove_pre_key", e.to_string()))?;
        Ok(())
    }
}
