//! Persisted per-account recipient records: address, known devices, trust.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::address::Address;

/// Opaque account identifier a `Recipient` is keyed by.
pub type AccountId = Uuid;

/// A persisted record for one account: its `Address` and the ordered set of
/// device ids known to belong to it. Mutated only inside a write
/// transaction; device-set updates are additive or subtractive, never a
/// wholesale replace, so that concurrent `EnsureSessions` fetches converge.
#[derive(Debug, Clone)]
pub struct Recipient {
    pub account_id: AccountId,
    pub address: Address,
    pub device_ids: BTreeSet<u32>,
    pub registered: bool,
}

impl Recipient {
    /// The well-known primary device id. Distinguished from secondary/linked
    /// devices because missing-device caching and self-healing behavior are
    /// asymmetric: the primary device is the account's anchor, while linked
    /// devices come and go as the server's device-list updates propagate.
    pub const PRIMARY_DEVICE_ID: u32 = 1;

    pub fn is_primary_device(device_id: u32) -> bool {
        device_id == Self::PRIMARY_DEVICE_ID
    }

    pub fn new(account_id: AccountId, address: Address) -> Self {
        Self {
            account_id,
            address,
            device_ids: BTreeSet::new(),
            registered: false,
        }
    }

    /// Add devices to the known set. Additive per the data model invariant.
    pub fn add_devices(&mut self, devices: impl IntoIterator<Item = u32>) {
        self.device_ids.extend(devices);
    }

    /// Remove devices from the known set. Subtractive per the data model
    /// invariant; any session referencing a removed device must be deleted
    /// by the caller in the same transaction (enforced by callers in
    /// `session_establisher` and `send_executor`, not here).
    pub fn remove_devices(&mut self, devices: impl IntoIterator<Item = u32>) {
        for d in devices {
            self.device_ids.remove(&d);
        }
    }

    pub fn has_device(&self, device_id: u32) -> bool {
        self.device_ids.contains(&device_id)
    }

    pub fn mark_registered(&mut self) {
        self.registered = true;
    }

    pub fn mark_unregistered(&mut self) {
        self.registered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Recipient {
        Recipient::new(Uuid::now_v7(), Address::from_uuid(Uuid::now_v7()))
    }

    #[test]
    fn primary_device_predicate_is_explicit() {
        assert!(Recipient::is_primary_device(1));
        assert!(!Recipient::is_primary_device(2));
        assert!(!Recipient::is_primary_device(0));
    }

    #[test]
    fn add_devices_is_additive() {
        let mut r = recipient();
        r.add_devices([1, 2]);
        r.add_devices([2, 3]);
        assert_eq!(r.device_ids, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn remove_devices_is_subtractive() {
        let mut r = recipient();
        r.add_devices([1, 2, 3]);
        r.remove_devices([2]);
        assert_eq!(r.device_ids, BTreeSet::from([1, 3]));
    }

    #[test]
    fn remove_nonexistent_device_is_a_no_op() {
        let mut r = recipient();
        r.add_devices([1]);
        r.remove_devices([99]);
        assert_eq!(r.device_ids, BTreeSet::from([1]));
    }

    #[test]
    fn has_device_reflects_current_set() {
        let mut r = recipient();
        assert!(!r.has_device(1));
        r.add_devices([1]);
        assert!(r.has_device(1));
    }

    #[test]
    fn registration_state_defaults_false() {
        let mut r = recipient();
        assert!(!r.registered);
        r.mark_registered();
        assert!(r.registered);
        r.mark_unregistered();
        assert!(!r.registered);
    }
}
