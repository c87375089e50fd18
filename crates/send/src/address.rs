//! Logical user identities addressed by the send pipeline.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A logical user identity: an optional stable UUID and an optional E.164
/// phone number. Equality and hashing favor the UUID when present, falling
/// back to the phone number for addresses that have not yet been resolved
/// through contact discovery (see `RecipientResolver::prepare_send`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub uuid: Option<Uuid>,
    pub phone_number: Option<String>,
}

impl Address {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid: Some(uuid),
            phone_number: None,
        }
    }

    pub fn from_phone_number(phone_number: impl Into<String>) -> Self {
        Self {
            uuid: None,
            phone_number: Some(phone_number.into()),
        }
    }

    pub fn with_uuid(&self, uuid: Uuid) -> Self {
        Self {
            uuid: Some(uuid),
            phone_number: self.phone_number.clone(),
        }
    }

    /// An address is "invalid" (in the directory-reconciliation sense) when
    /// it has no UUID yet and must be resolved via contact discovery.
    pub fn is_invalid(&self) -> bool {
        self.uuid.is_none()
    }

    pub fn is_local(&self, local: &Address) -> bool {
        self == local
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        match (self.uuid, other.uuid) {
            (Some(a), Some(b)) => a == b,
            (Some(_), None) | (None, Some(_)) => false,
            (None, None) => self.phone_number == other.phone_number,
        }
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.uuid {
            Some(uuid) => {
                0u8.hash(state);
                uuid.hash(state);
            }
            None => {
                1u8.hash(state);
                self.phone_number.hash(state);
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.uuid, &self.phone_number) {
            (Some(uuid), _) => write!(f, "{uuid}"),
            (None, Some(phone)) => write!(f, "{phone}"),
            (None, None) => write!(f, "<invalid address>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_uuid_when_both_present() {
        let uuid = Uuid::now_v7();
        let a = Address {
            uuid: Some(uuid),
            phone_number: Some("+10000000000".into()),
        };
        let b = Address {
            uuid: Some(uuid),
            phone_number: Some("+19999999999".into()),
        };
        assert_eq!(a, b);
    }

    #[test]
    fn equality_falls_back_to_phone_number_when_uuid_absent() {
        let a = Address::from_phone_number("+15551234567");
        let b = Address::from_phone_number("+15551234567");
        assert_eq!(a, b);
    }

    #[test]
    fn addresses_with_and_without_uuid_are_never_equal() {
        let phone = "+15551234567";
        let with_uuid = Address::from_uuid(Uuid::now_v7());
        let without_uuid = Address::from_phone_number(phone);
        assert_ne!(with_uuid, without_uuid);
    }

    #[test]
    fn is_invalid_true_without_uuid() {
        assert!(Address::from_phone_number("+15551234567").is_invalid());
        assert!(!Address::from_uuid(Uuid::now_v7()).is_invalid());
    }

    #[test]
    fn with_uuid_resolves_an_invalid_address() {
        let unresolved = Address::from_phone_number("+15551234567");
        assert!(unresolved.is_invalid());
        let resolved = unresolved.with_uuid(Uuid::now_v7());
        assert!(!resolved.is_invalid());
        assert_eq!(resolved.phone_number.as_deref(), Some("+15551234567"));
    }

    #[test]
    fn hash_matches_equality_for_uuid_addresses() {
        use std::collections::HashSet;
        let uuid = Uuid::now_v7();
        let mut set = HashSet::new();
        set.insert(Address {
            uuid: Some(uuid),
            phone_number: None,
        });
        assert!(set.contains(&Address {
            uuid: Some(uuid),
            phone_number: Some("+15551234567".into()),
        }));
    }

    #[test]
    fn display_prefers_uuid() {
        let uuid = Uuid::now_v7();
        let addr = Address {
            uuid: Some(uuid),
            phone_number: Some("+15551234567".into()),
        };
        assert_eq!(addr.to_string(), uuid.to_string());
    }

    #[test]
    fn display_falls_back_to_phone_number() {
        let addr = Address::from_phone_number("+15551234567");
        assert_eq!(addr.to_string(), "+15551234567");
    }
}
