//! openconv-send -- the outgoing message delivery core for OpenConv.
//!
//! Takes an application-level outgoing message and performs the work
//! required to deliver it to every device of every intended recipient:
//! establishing cryptographic sessions on demand, recovering from
//! device-list drift, and enforcing rate-limit and trust policies.
//!
//! ## Control flow
//!
//! 1. [`recipient_resolver::RecipientResolver::prepare_send`] expands an
//!    [`outgoing_message::OutgoingMessage`] plus its
//!    [`thread::Thread`] into a [`recipient_resolver::SendInfo`] — a
//!    deduplicated, filtered, directory-reconciled recipient set.
//! 2. For each resolved [`recipient::Recipient`], the caller builds a
//!    [`message_send::MessageSend`] and calls
//!    [`session_establisher::SessionEstablisher::ensure_sessions`] to
//!    guarantee a session exists for every device about to be sent to.
//! 3. [`send_executor::SendExecutor::perform_send`] (or its retry-driving
//!    sibling [`send_executor::SendExecutor::send`]) submits the
//!    encrypted per-device ciphertexts and reconciles local state against
//!    the service's response.
//!
//! [`negative_cache::NegativeCache`] is consulted by
//! [`prekey_client::PrekeyClient`] before every prekey fetch and updated by
//! [`session_establisher::SessionEstablisher`] on an untrusted-identity
//! signal, so repeated sends to an unreachable device or an unverified
//! identity don't keep hitting the network.
//!
//! ## Architecture
//!
//! - **Async throughout**: every network request and database transaction
//!   boundary is a suspension point; the crate is built for a
//!   multi-threaded tokio runtime, not for blocking a UI thread.
//! - **Dependency injection over globals**: out-of-scope collaborators
//!   (sender certificates, encryption, contact discovery, blocking,
//!   profile/device-manager side effects) are trait objects aggregated in
//!   [`collaborators::Dependencies`], injected at construction — see
//!   DESIGN.md for the rationale.
//! - **Ownership over explicit locking**: a [`message_send::MessageSend`]
//!   is only ever touched by the task driving its own retry loop, so the
//!   source's serialized completion queue becomes a non-issue rather than
//!   a lock to manage.
//!
//! ## Modules
//!
//! - [`error`] -- `SendError` enum and its `retryable()` classification
//! - [`config`] -- `SendConfig` tunables (TTLs, attempt budget)
//! - [`address`] -- `Address`, UUID-priority identity
//! - [`recipient`] -- `Recipient`, persisted per-account device sets
//! - [`thread`] -- `Thread`, contact/group conversation context
//! - [`outgoing_message`] -- `OutgoingMessage`, per-recipient outcomes
//! - [`message_send`] -- `MessageSend`, one in-flight delivery attempt
//! - [`negative_cache`] -- missing-device and stale-identity TTL caches
//! - [`collaborators`] -- out-of-scope collaborator traits + `Dependencies`
//! - [`storage`] -- `SendStore`, the write-transaction-by-value storage layer
//! - [`prekey_client`] -- `PrekeyClient::fetch`, UD/basic + websocket/REST failover
//! - [`session_establisher`] -- `SessionEstablisher::ensure_sessions`
//! - [`recipient_resolver`] -- `RecipientResolver::prepare_send`
//! - [`send_executor`] -- `SendExecutor::perform_send` and its retry loop

pub mod address;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod message_send;
pub mod negative_cache;
pub mod outgoing_message;
pub mod prekey_client;
pub mod recipient;
pub mod recipient_resolver;
pub mod send_executor;
pub mod session_establisher;
pub mod storage;
pub mod thread;
