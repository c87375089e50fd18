//! Conversation context a message belongs to.

use std::collections::HashSet;

use crate::address::Address;

/// Either a one-to-one conversation with a single peer, or a group
/// conversation carrying a membership snapshot.
#[derive(Debug, Clone)]
pub enum Thread {
    Contact { peer: Address },
    Group(GroupThread),
}

/// A group membership snapshot: active members and pending invitees. The
/// two sets are disjoint — an invited member graduates to a full member on
/// acceptance, never both at once.
#[derive(Debug, Clone)]
pub struct GroupThread {
    pub full_members: HashSet<Address>,
    pub invited_members: HashSet<Address>,
}

impl GroupThread {
    pub fn new() -> Self {
        Self {
            full_members: HashSet::new(),
            invited_members: HashSet::new(),
        }
    }
}

impl Default for GroupThread {
    fn default() -> Self {
        Self::new()
    }
}

impl Thread {
    pub fn is_group(&self) -> bool {
        matches!(self, Thread::Group(_))
    }
}
