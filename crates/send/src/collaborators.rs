//! Trait boundaries for the out-of-scope collaborators listed in spec.md
//! §6, plus the `Dependencies` aggregate that replaces the source's global
//! singletons (identity manager, session store, blocking manager, UD
//! manager, account manager, profile manager) per DESIGN NOTES §9: "treat
//! these as a Dependencies aggregate injected into the core at
//! construction; tests substitute fakes."

use async_trait::async_trait;

use crate::address::Address;
use crate::error::SendError;
use crate::message_send::UnidentifiedAccess;
use crate::recipient::Recipient;

/// A signed credential the sender presents in UD mode attesting to its own
/// identity without revealing it in plaintext to the server.
#[derive(Debug, Clone)]
pub struct SenderCertificates {
    pub certificate: Vec<u8>,
    pub uuid_only_certificate: Vec<u8>,
}

/// How near-expiry a sender certificate may be and still be accepted.
/// `PrepareSend` always uses `Permissive` per spec.md §4.1 step 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateExpirationPolicy {
    Permissive,
    Strict,
}

/// Acquires and caches sender certificates for sealed-sender (UD) sends.
#[async_trait]
pub trait SenderCertificateProvider: Send + Sync {
    async fn ensure(
        &self,
        policy: CertificateExpirationPolicy,
    ) -> Result<SenderCertificates, SendError>;

    /// Per-recipient UD access key, derived from the recipient's profile
    /// key. `None` when the profile key isn't known, in which case the
    /// send falls back to basic auth for that recipient.
    async fn unidentified_access_for(&self, recipient: &Address) -> Option<UnidentifiedAccess>;
}

/// Opaque per-device ciphertext produced by the out-of-scope message
/// encoder. The send pipeline never inspects its contents.
#[derive(Debug, Clone)]
pub struct DeviceMessage {
    pub destination_device_id: u32,
    pub destination_registration_id: u32,
    pub message_type: u32,
    pub content: Vec<u8>,
}

/// Produces one `DeviceMessage` per `(recipient, device)` pair once a
/// session exists. Encryption itself is out of scope (spec.md §1).
#[async_trait]
pub trait Encryptor: Send + Sync {
    async fn encrypt(
        &self,
        recipient: &Recipient,
        device_id: u32,
    ) -> Result<DeviceMessage, SendError>;
}

/// Result of a successful contact-discovery request: the Addresses
/// recovered for a batch of phone numbers that lacked a UUID.
#[derive(Debug, Clone, Default)]
pub struct ContactDiscoveryResult {
    pub discovered: Vec<Address>,
}

/// Discovery/directory error carrying the service's own retry suggestion.
#[derive(Debug, Clone)]
pub struct ContactDiscoveryError {
    pub message: String,
    pub retry_suggested: bool,
}

/// Resolves phone-number-only addresses to `(uuid, phone)` pairs via the
/// contact-discovery service (out of scope, spec.md §1).
#[async_trait]
pub trait ContactDiscovery: Send + Sync {
    async fn perform(
        &self,
        phone_numbers: &[String],
    ) -> Result<ContactDiscoveryResult, ContactDiscoveryError>;
}

/// Checks whether the local account is blocking an address. Out of scope
/// per spec.md §1; modeled as a trait so `RecipientResolver` can depend on
/// it without owning blocking-list persistence.
pub trait BlockingManager: Send + Sync {
    fn is_blocked(&self, address: &Address) -> bool;
    fn blocked_addresses(&self) -> std::collections::HashSet<Address>;
}

/// Side effects `SendExecutor::perform_send` triggers on success that the
/// spec attributes to the device manager and profile subsystem — both out
/// of scope per spec.md §1, modeled the same way `BlockingManager` is:
/// a narrow trait rather than an owned subsystem.
pub trait StateEffects: Send + Sync {
    /// Clears the "may have linked devices" flag after a successful
    /// empty-`deviceMessages` self-sync probe (spec.md §4.5 step 1).
    fn clear_may_have_linked_devices(&self);

    /// Sets the "may have linked devices" flag when `handleMismatchedDevices`
    /// reports non-empty `missingDevices` for the local recipient.
    fn set_may_have_linked_devices(&self);

    /// Notifies the profile subsystem that a successful send interaction
    /// occurred with `address` (spec.md §4.5 step 2).
    fn notify_interaction(&self, address: &Address);
}

/// The aggregate of out-of-scope collaborators the core is constructed
/// with. Mirrors the source's global singletons without the globals:
/// every method on `RecipientResolver`, `SessionEstablisher`, and
/// `SendExecutor` takes `&Dependencies` rather than reaching for ambient
/// state.
pub struct Dependencies {
    pub sender_certificates: std::sync::Arc<dyn SenderCertificateProvider>,
    pub encryptor: std::sync::Arc<dyn Encryptor>,
    pub contact_discovery: std::sync::Arc<dyn ContactDiscovery>,
    pub blocking: std::sync::Arc<dyn BlockingManager>,
    pub state_effects: std::sync::Arc<dyn StateEffects>,
}
