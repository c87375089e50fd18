//! KyberPreKeyStore trait implementation for CryptoStore.

use async_trait::async_trait;
use libsignal_protocol::{
    GenericSignedPreKey, KyberPreKeyId, KyberPreKeyRecord, KyberPreKeyStore, PublicKey,
    SignalProtocolError, SignedPreKeyId,
};

use crate::storage::CryptoStore;

#[async_trait(?Send)]
impl KyberPreKeyStore for CryptoStore<'_> {
    async fn get_kyber_pre_key(
        &self,
        kyber_prekey_id: KyberPreKeyId,
    ) -> Result<KyberPreKeyRecord, SignalProtocolError> {
        let id: u32 = kyber_prekey_id.into();
        let record_bytes: Vec<u8> = self
            .conn
            .query_row(
                "SELECT record FROM crypto_kyber_pre_keys WHERE key_id = ?1",
                [id],
                |row| row.get(0),
            )
            .map_err(|_| {
                SignalProtocolError::InvalidState("get_kyber_pre_key", "key not found".into())
            })?;

        KyberPreKeyRecord::deserialize(&record_bytes)
    }

    async fn save_kyber_pre_key(
        &mut self,
        kyber_prekey_id: KyberPreKeyId,
        record: &KyberPreKeyRecord,
    ) -> Result<(), SignalProtocolError> {
        let id: u32 = kyber_prekey_id.into();
        let record_bytes = record.serialize()?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| {
                SignalProtocolError::InvalidState(
                    "save_kyber_pre_key",
                    "system clock before epoch".into(),
                )
            })?
            .as_secs() as i64;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO crypto_kyber_pre_keys (key_id, record, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, record_bytes, now],
            )
            .map_err(|e| SignalProtocolError::InvalidState("save_kyber_pre_key", e.to_string()))?;

        Ok(())
    }

    async fn mark_kyber_pre_key_used(
        &mut self,
        kyber_prekey_id: KyberPreKeyId,
        _ec_prekey_id: SignedPreKeyId,
        _base_key: &PublicKey,
    ) -> Result<(), SignalProtocolError> {
        // For last-resort Kyber pre-keys, we don't delete on use.
        // For one-time Kyber pre-keys (future), delete after use.
        // For V1, all Kyber pre-keys are last-resort, so this is a no-op.
        let _id: u32 = kyber_prekey_id.into();
        Ok(())
    }
}
