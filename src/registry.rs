//! Round-robin endpoint selection and the protocol-keyed handler registry
//! built on top of it, grounded in the same "map keyed by a small identifier,
//! entries added/removed independently of traffic" shape as the teacher's
//! `Pool`/`ClientConnection` correlation tables, generalized from a
//! `DashMap<u32, _>` keyed by ITT to one keyed by `Proto`.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Mutex;

use dashmap::DashMap;

use crate::wire::Proto;

/// A cursor-ordered set with O(1) round-robin selection. Removal keeps the
/// cursor pointing at the element that would have been selected next, so a
/// handler being revoked never skips or repeats its neighbors.
pub struct RoundRobin<T> {
    items: Vec<T>,
    next: usize,
}

impl<T> RoundRobin<T> {
    pub fn new() -> Self {
        Self { items: Vec::new(), next: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    /// Returns the next item in rotation and advances the cursor.
    pub fn pick(&mut self) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let idx = self.next;
        self.next = (self.next + 1) % self.items.len();
        self.items.get(idx)
    }

    /// Removes the first item matching `pred`, keeping `next` pointing at
    /// the same logical successor it did before removal.
    pub fn remove_first(&mut self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let pos = self.items.iter().position(pred)?;
        let removed = self.items.remove(pos);
        if pos < self.next {
            self.next -= 1;
        }
        if self.next >= self.items.len() {
            self.next = 0;
        }
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T> Default for RoundRobin<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One registered endpoint for a protocol, plus the owner that registered it
/// so it can be revoked in bulk when that owner's connection drops.
#[derive(Clone)]
pub struct Entry<T, O> {
    pub value: T,
    pub owner: O,
}

/// A `Proto`-keyed table of round-robin entries, shared between the Peer
/// Stream Forwarder (values are `Endpoint`s) and the Persistent-Connection
/// Engine (values are handler connection ids).
///
/// Non-balanced registration (`balanced = false`) is the legacy behavior
/// preserved from the single-endpoint-only protocol: it is rejected if any
/// entry already exists for the protocol, balanced or not, and it itself
/// refuses to share a protocol with a later registration.
pub struct HandlerRegistry<T, O> {
    by_proto: DashMap<Proto, Mutex<ProtoEntry<T, O>>>,
}

struct ProtoEntry<T, O> {
    balanced: bool,
    entries: RoundRobin<Entry<T, O>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterError {
    AlreadySet,
}

/// Outcome of a [`HandlerRegistry::remove`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The entry existed and was removed; `emptied` is true if the protocol
    /// has no entries left (the caller should unregister from the host).
    Removed { emptied: bool },
    /// No matching entry existed for this protocol/value/owner.
    NotFound,
}

impl<T: PartialEq + Clone, O: Clone> HandlerRegistry<T, O> {
    pub fn new() -> Self {
        Self { by_proto: DashMap::new() }
    }

    /// Registers `value` for `proto` under `owner`. Returns `Ok(true)` if
    /// this is the first entry for `proto` (the caller should tell the
    /// host to start routing inbound traffic for it).
    pub fn register(
        &self,
        proto: Proto,
        value: T,
        owner: O,
        balanced: bool,
    ) -> Result<bool, RegisterError> {
        let mut slot = self
            .by_proto
            .entry(proto)
            .or_insert_with(|| Mutex::new(ProtoEntry { balanced, entries: RoundRobin::new() }));
        let mut slot = slot.lock().expect("registry mutex poisoned");

        if !slot.entries.is_empty() && (!balanced || !slot.balanced) {
            return Err(RegisterError::AlreadySet);
        }
        slot.balanced = balanced;
        let became_first = slot.entries.is_empty();
        slot.entries.push(Entry { value, owner });
        Ok(became_first)
    }

    /// Picks the next entry for `proto` in round-robin order.
    pub fn pick(&self, proto: &Proto) -> Option<T> {
        let slot = self.by_proto.get(proto)?;
        let mut slot = slot.lock().expect("registry mutex poisoned");
        slot.entries.pick().map(|e| e.value.clone())
    }

    /// Removes a single entry matching `value` under `owner`.
    pub fn remove(&self, proto: &Proto, value: &T, owner: &O) -> RemoveOutcome
    where
        O: PartialEq,
    {
        let Some(slot) = self.by_proto.get(proto) else {
            return RemoveOutcome::NotFound;
        };
        let mut slot = slot.lock().expect("registry mutex poisoned");
        match slot.entries.remove_first(|e| &e.value == value && &e.owner == owner) {
            Some(_) => RemoveOutcome::Removed { emptied: slot.entries.is_empty() },
            None => RemoveOutcome::NotFound,
        }
    }

    /// Removes every entry owned by `owner` across all protocols. Returns
    /// the protocols that became empty as a result, in the order the
    /// caller should unregister them from the host.
    pub fn revoke_owner(&self, owner: &O) -> Vec<Proto>
    where
        O: PartialEq,
    {
        let mut drained = Vec::new();
        for entry in self.by_proto.iter() {
            let proto = entry.key().clone();
            let mut slot = entry.value().lock().expect("registry mutex poisoned");
            while slot.entries.remove_first(|e| &e.owner == owner).is_some() {}
            if slot.entries.is_empty() {
                drained.push(proto);
            }
        }
        drained
    }

    /// Drops the table entry for `proto` entirely. Call only after
    /// `remove`/`revoke_owner` reports the protocol became empty and the
    /// host has been told to stop routing it, to avoid a race where a new
    /// registration recreates the slot between the two.
    pub fn forget(&self, proto: &Proto) {
        self.by_proto.remove(proto);
    }
}

impl<T: PartialEq + Clone, O: Clone> Default for HandlerRegistry<T, O> {
    fn default() -> Self {
        Self::new()
    }
}
