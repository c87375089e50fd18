//! The application-level message the send pipeline is asked to deliver.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::address::Address;

/// Per-recipient delivery outcome tracked on an `OutgoingMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientOutcome {
    /// Delivered successfully; `was_sent_by_ud` records whether the final
    /// attempt used sealed-sender auth.
    SentTo { was_sent_by_ud: bool },
    /// Excluded from delivery (blocking, directory reconciliation, or a
    /// failed unregistered-recipient submission).
    Skipped,
}

/// An application-level outgoing message, plus the bookkeeping the send
/// pipeline accumulates as it works through the resolved recipient set.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Monotonic send timestamp (milliseconds since epoch), used as the
    /// idempotence key on the wire protocol and to order sync deliveries.
    pub timestamp: DateTime<Utc>,
    pub is_sync_message: bool,
    /// Whether this message's class requires delivery to a group's
    /// pending (invited-but-not-yet-joined) members, e.g. group title or
    /// avatar updates. See `RecipientResolver::prepare_send` step 3.
    pub requires_pending_member_delivery: bool,
    /// Snapshot of the addresses the message was originally addressed to,
    /// taken before recipient resolution. Used to compute which addresses
    /// were dropped during resolution so they can be marked skipped.
    pub sending_recipient_addresses: HashSet<Address>,
    outcomes: HashMap<Address, RecipientOutcome>,
}

impl OutgoingMessage {
    pub fn new(
        timestamp: DateTime<Utc>,
        is_sync_message: bool,
        sending_recipient_addresses: HashSet<Address>,
    ) -> Self {
        Self {
            timestamp,
            is_sync_message,
            requires_pending_member_delivery: false,
            sending_recipient_addresses,
            outcomes: HashMap::new(),
        }
    }

    pub fn with_pending_member_delivery(mut self, requires: bool) -> Self {
        self.requires_pending_member_delivery = requires;
        self
    }

    pub fn mark_sent_to(&mut self, address: Address, was_sent_by_ud: bool) {
        self.outcomes
            .insert(address, RecipientOutcome::SentTo { was_sent_by_ud });
    }

    pub fn mark_skipped(&mut self, address: Address) {
        self.outcomes.insert(address, RecipientOutcome::Skipped);
    }

    pub fn outcome_for(&self, address: &Address) -> Option<&RecipientOutcome> {
        self.outcomes.get(address)
    }

    /// Addresses present in the original snapshot but absent from
    /// `resolved`; these must be marked skipped per
    /// `RecipientResolver::prepare_send` step 5.
    pub fn dropped_from(&self, resolved: &HashSet<Address>) -> Vec<Address> {
        self.sending_recipient_addresses
            .iter()
            .filter(|addr| !resolved.contains(addr))
            .cloned()
            .collect()
    }
}
