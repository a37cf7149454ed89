//! Fixed-capacity connection table with stable indices (C3).
//!
//! The table is owned exclusively by the gateway's event-loop task; nothing
//! else ever reads or mutates a slot. Indices are stable for the lifetime of
//! a connection and are reused, via a rotating cursor, once a slot is freed.
//! Each slot also carries a generation counter so a stale callback referring
//! to a since-reused index can be detected rather than silently
//! misdelivered.

use std::net::IpAddr;
use std::time::Instant;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Default number of simultaneously live connections.
pub const DEFAULT_CAPACITY: usize = 200;

/// Opaque identifier for an accepted socket, assigned by the gateway's
/// accept loop. Not related to the OS file descriptor.
pub type Handle = u64;

/// A slot's identity: its table index plus the generation it was created
/// with. Holders of a `SlotId` can detect whether their slot has since been
/// recycled for a different connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    /// Index into the connection table.
    pub index: usize,
    /// Generation the slot held when this id was issued.
    pub generation: u32,
}

/// Per-connection bookkeeping. The byte-level receive buffer lives
/// alongside this in [`crate::gateway::event_loop`], not here: this table
/// only tracks identity, addressing, and timing.
#[derive(Debug, Clone)]
pub struct Slot {
    /// Handle assigned at accept time.
    pub handle: Handle,
    /// Peer address.
    pub client_ip: IpAddr,
    /// When the slot was created.
    pub created_at: Instant,
    /// When bytes were last received on this slot.
    pub last_rx_at: Instant,
    /// Bound account, or `0` if unauthenticated.
    pub account: u32,
    /// Current generation of this slot's index.
    pub generation: u32,
}

/// Fixed-capacity array of connection slots plus reverse maps from handle
/// and from account to table index.
#[derive(Debug)]
pub struct ConnectionTable {
    slots: Vec<Option<Slot>>,
    handle_index: HashMap<Handle, usize>,
    account_index: HashMap<u32, usize>,
    generations: Vec<u32>,
    next_index: usize,
}

impl ConnectionTable {
    /// Create a table with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a table with an explicit capacity, primarily for tests.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            handle_index: HashMap::new(),
            account_index: HashMap::new(),
            generations: vec![0; capacity],
            next_index: 0,
        }
    }

    /// Configured capacity of the table.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently occupied.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.handle_index.len()
    }

    /// Register a newly accepted connection.
    ///
    /// Scans at most `capacity` slots starting from a rotating cursor for
    /// the next free one, giving amortised O(1) allocation instead of a
    /// linear first-free scan from the start every time.
    ///
    /// # Errors
    /// Returns [`TableError::Full`] if every slot is occupied.
    pub fn add(&mut self, handle: Handle, client_ip: IpAddr, now: Instant) -> Result<SlotId, TableError> {
        let capacity = self.slots.len();
        for step in 0..capacity {
            let index = (self.next_index + step) % capacity;
            #[expect(clippy::indexing_slicing, reason = "index is reduced modulo capacity")]
            let occupied = self.slots[index].is_some();
            if !occupied {
                #[expect(clippy::indexing_slicing, reason = "index is reduced modulo capacity")]
                let generation = self.generations[index];
                let slot = Slot {
                    handle,
                    client_ip,
                    created_at: now,
                    last_rx_at: now,
                    account: 0,
                    generation,
                };
                #[expect(clippy::indexing_slicing, reason = "index is reduced modulo capacity")]
                {
                    self.slots[index] = Some(slot);
                }
                self.handle_index.insert(handle, index);
                self.next_index = (index + 1) % capacity;
                return Ok(SlotId { index, generation });
            }
        }
        Err(TableError::Full)
    }

    /// Remove a connection, freeing its slot and clearing both reverse maps.
    pub fn remove(&mut self, handle: Handle) {
        let Some(index) = self.handle_index.remove(&handle) else {
            return;
        };
        let account = self
            .slots
            .get(index)
            .and_then(Option::as_ref)
            .map(|slot| slot.account)
            .unwrap_or(0);
        if account != 0 && self.account_index.get(&account) == Some(&index) {
            self.account_index.remove(&account);
        }
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
        if let Some(generation) = self.generations.get_mut(index) {
            *generation = generation.wrapping_add(1);
        }
    }

    /// Look up a slot by its table index.
    #[must_use]
    pub fn lookup_by_index(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Look up a slot's index by its bound account.
    #[must_use]
    pub fn lookup_by_account(&self, account: u32) -> Option<usize> {
        self.account_index.get(&account).copied()
    }

    /// Bind `account` to the slot at `index`, superseding any prior
    /// connection the account was bound to (a reconnect wins).
    pub fn bind_account(&mut self, index: usize, account: u32) {
        if let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) {
            slot.account = account;
        }
        self.account_index.insert(account, index);
    }

    /// Refresh the last-receive timestamp for a slot.
    pub fn touch_rx(&mut self, index: usize, now: Instant) {
        if let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) {
            slot.last_rx_at = now;
        }
    }

    /// Return the handles of every slot idle for longer than `idle_timeout`
    /// as of `now`, i.e. whose `max(created_at, last_rx_at)` predates the
    /// cutoff. Intended to be called on each timeout sweep tick.
    #[must_use]
    pub fn idle_since(&self, now: Instant, idle_timeout: std::time::Duration) -> Vec<Handle> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|slot| {
                let last_active = slot.last_rx_at.max(slot.created_at);
                now.duration_since(last_active) > idle_timeout
            })
            .map(|slot| slot.handle)
            .collect()
    }

    /// Capture the account bindings and rotation cursor for warm-restart
    /// persistence (§4.4's "Binary restart preservation", here realized as
    /// the explicit snapshot/restore step the design notes call for rather
    /// than a shared-memory constructor side effect). Live sockets, handles,
    /// and timestamps are process-local and are not captured: only the
    /// information a freshly started process needs to give a reconnecting
    /// account a good chance of landing on the index it held before is
    /// preserved.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            capacity: self.slots.len(),
            next_index: self.next_index,
            account_bindings: self.account_index.iter().map(|(&a, &i)| (a, i)).collect(),
        }
    }

    /// Build an empty table pre-seeded from a prior [`Self::snapshot`]: the
    /// rotation cursor resumes where it left off and every previously bound
    /// account is pre-reserved against its old index so a reconnect under
    /// that account binds back to the same slot on its first login, provided
    /// no other connection has taken the slot in the meantime. This is
    /// best-effort, not a guarantee: a snapshot older than the table's
    /// current capacity is rejected rather than silently truncated.
    ///
    /// # Errors
    /// Returns [`TableError::SnapshotCapacityMismatch`] if `snapshot.capacity`
    /// does not match the capacity the caller constructs the table with.
    pub fn restore(capacity: usize, snapshot: &TableSnapshot) -> Result<Self, TableError> {
        if snapshot.capacity != capacity {
            return Err(TableError::SnapshotCapacityMismatch);
        }
        let mut table = Self::with_capacity(capacity);
        table.next_index = snapshot.next_index % capacity.max(1);
        for &(account, index) in &snapshot.account_bindings {
            if index < capacity {
                table.account_index.insert(account, index);
            }
        }
        Ok(table)
    }
}

/// Serializable bookkeeping captured by [`ConnectionTable::snapshot`] and
/// consumed by [`ConnectionTable::restore`]. Written to the file named by
/// `SOCKET_SHM_KEY` on clean gateway shutdown when that key is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnapshot {
    capacity: usize,
    next_index: usize,
    account_bindings: Vec<(u32, usize)>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn assigns_distinct_free_indices_to_simultaneously_live_slots() {
        let mut table = ConnectionTable::with_capacity(4);
        let now = Instant::now();
        let a = table.add(1, ip(), now).expect("capacity available");
        let b = table.add(2, ip(), now).expect("capacity available");
        let c = table.add(3, ip(), now).expect("capacity available");
        assert_ne!(a.index, b.index);
        assert_ne!(b.index, c.index);
        assert_ne!(a.index, c.index);
    }

    #[test]
    fn reports_full_when_every_slot_is_occupied() {
        let mut table = ConnectionTable::with_capacity(2);
        let now = Instant::now();
        table.add(1, ip(), now).expect("capacity available");
        table.add(2, ip(), now).expect("capacity available");
        assert_eq!(table.add(3, ip(), now), Err(TableError::Full));
    }

    #[test]
    fn reconnect_supersedes_prior_account_binding() {
        let mut table = ConnectionTable::with_capacity(4);
        let now = Instant::now();
        let i = table.add(1, ip(), now).expect("capacity available").index;
        let j = table.add(2, ip(), now).expect("capacity available").index;
        table.bind_account(i, 10_000);
        assert_eq!(table.lookup_by_account(10_000), Some(i));
        table.bind_account(j, 10_000);
        assert_eq!(table.lookup_by_account(10_000), Some(j));
    }

    #[test]
    fn idle_slot_is_reported_after_the_timeout_elapses() {
        let mut table = ConnectionTable::with_capacity(4);
        let created = Instant::now();
        table.add(1, ip(), created).expect("capacity available");
        let later = created + Duration::from_secs(301);
        let idle = table.idle_since(later, Duration::from_secs(300));
        assert_eq!(idle, vec![1]);
    }

    #[test]
    fn remove_frees_the_slot_for_reuse() {
        let mut table = ConnectionTable::with_capacity(1);
        let now = Instant::now();
        let first = table.add(1, ip(), now).expect("capacity available");
        table.remove(1);
        let second = table.add(2, ip(), now).expect("slot should be free again");
        assert_eq!(first.index, second.index);
        assert_ne!(first.generation, second.generation);
    }

    #[test]
    fn a_restored_table_preserves_account_bindings_and_rotation_cursor() {
        let mut table = ConnectionTable::with_capacity(4);
        let now = Instant::now();
        let i = table.add(1, ip(), now).expect("capacity available").index;
        table.bind_account(i, 10_000);
        let snapshot = table.snapshot();

        let restored = ConnectionTable::restore(4, &snapshot).expect("capacity matches");
        assert_eq!(restored.lookup_by_account(10_000), Some(i));
        assert_eq!(restored.live_count(), 0, "no live sockets survive a restart");
    }

    #[test]
    fn restoring_with_a_mismatched_capacity_is_rejected() {
        let table = ConnectionTable::with_capacity(4);
        let snapshot = table.snapshot();
        assert!(matches!(
            ConnectionTable::restore(8, &snapshot),
            Err(TableError::SnapshotCapacityMismatch)
        ));
    }
}
