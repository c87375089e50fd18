//! One in-flight delivery attempt to one recipient.

use crate::recipient::Recipient;
use crate::thread::Thread;

/// Opaque 16-byte unidentified-delivery access key, derived by the
/// `SenderCertificateProvider` collaborator from the recipient's profile
/// key. The send pipeline treats it as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnidentifiedAccess(pub [u8; 16]);

/// One in-flight delivery attempt to one `Recipient`. Owned exclusively by
/// the task driving its retry loop for its whole lifetime — the spec's
/// "mutated only by the send's serialized handler" requirement is upheld by
/// ownership rather than an explicit queue object (see SPEC_FULL.md §5).
#[derive(Debug, Clone)]
pub struct MessageSend {
    pub thread: ThreadRef,
    pub recipient: Recipient,
    pub device_ids: Vec<u32>,
    pub ud_sending_access: Option<UnidentifiedAccess>,
    pub has_websocket_send_failed: bool,
    pub has_ud_auth_failed: bool,
    pub remaining_attempts: u32,
    pub is_local_address: bool,
}

/// A thread reference cheap enough to clone into each `MessageSend`;
/// `Thread` itself may carry a whole group membership snapshot.
#[derive(Debug, Clone)]
pub enum ThreadRef {
    Contact,
    Group,
}

impl From<&Thread> for ThreadRef {
    fn from(thread: &Thread) -> Self {
        match thread {
            Thread::Contact { .. } => ThreadRef::Contact,
            Thread::Group(_) => ThreadRef::Group,
        }
    }
}

impl MessageSend {
    pub fn new(
        thread: &Thread,
        recipient: Recipient,
        device_ids: Vec<u32>,
        ud_sending_access: Option<UnidentifiedAccess>,
        remaining_attempts: u32,
        is_local_address: bool,
    ) -> Self {
        Self {
            thread: thread.into(),
            recipient,
            device_ids,
            ud_sending_access,
            has_websocket_send_failed: false,
            has_ud_auth_failed: false,
            remaining_attempts,
            is_local_address,
        }
    }

    /// Decrement the retry budget. A no-op once already exhausted; callers
    /// check `attempts_exhausted()` before retrying.
    pub fn consume_attempt(&mut self) {
        self.remaining_attempts = self.remaining_attempts.saturating_sub(1);
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.remaining_attempts == 0
    }

    /// Forces REST transport on the next attempt because the websocket
    /// connection's cached device view may be stale after a 409/410 on a
    /// local-address send.
    pub fn force_websocket_retry_avoidance(&mut self) {
        if self.is_local_address {
            self.has_websocket_send_failed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use uuid::Uuid;

    fn send(remaining_attempts: u32) -> MessageSend {
        let thread = Thread::Contact {
            peer: Address::from_uuid(Uuid::now_v7()),
        };
        let recipient = Recipient::new(Uuid::now_v7(), Address::from_uuid(Uuid::now_v7()));
        MessageSend::new(&thread, recipient, vec![1], None, remaining_attempts, false)
    }

    #[test]
    fn consume_attempt_decrements_remaining() {
        let mut s = send(3);
        s.consume_attempt();
        assert_eq!(s.remaining_attempts, 2);
    }

    #[test]
    fn consume_attempt_on_zero_remaining_is_a_no_op_and_reports_exhausted() {
        let mut s = send(0);
        assert!(s.attempts_exhausted());
        s.consume_attempt();
        assert_eq!(s.remaining_attempts, 0);
    }

    #[test]
    fn attempts_exhausted_reflects_zero_remaining() {
        let mut s = send(1);
        assert!(!s.attempts_exhausted());
        s.consume_attempt();
        assert!(s.attempts_exhausted());
    }

    #[test]
    fn force_websocket_retry_avoidance_only_applies_to_local_address() {
        let mut local = send(3);
        local.is_local_address = true;
        local.force_websocket_retry_avoidance();
        assert!(local.has_websocket_send_failed);

        let mut remote = send(3);
        remote.force_websocket_retry_avoidance();
        assert!(!remote.has_websocket_send_failed);
    }

    #[test]
    fn new_send_starts_with_flags_clear() {
        let s = send(3);
        assert!(!s.has_websocket_send_failed);
        assert!(!s.has_ud_auth_failed);
    }
}
