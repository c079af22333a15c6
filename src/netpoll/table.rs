/*!
 * Wait Table
 *
 * Dense pollfd array plus a parallel entry array, indexed by slot. Slot 0 is
 * the wakeup channel's read end and is never removed. Removal swaps the last
 * slot into the hole so the array passed to poll(2) stays contiguous.
 */

use super::interest::{Direction, Interest, Readiness, ReadyEvent};
use crate::core::errors::PollError;
use crate::core::limits::WAKEUP_SLOT;
use ahash::AHashMap;
use std::os::fd::RawFd;

#[derive(Debug, Clone)]
pub(crate) struct Entry<T> {
    pub(crate) fd: RawFd,
    pub(crate) interest: Interest,
    pub(crate) token: T,
}

pub(crate) struct WaitTable<T> {
    pollfds: Vec<libc::pollfd>,
    entries: Vec<Option<Entry<T>>>,
    slots: AHashMap<RawFd, usize>,
    /// Set by every mutation; cleared when a waiter snapshots the table
    pending_changes: bool,
}

impl<T: Clone> WaitTable<T> {
    pub(crate) fn with_capacity(wakeup_fd: RawFd, capacity: usize) -> Self {
        let mut pollfds = Vec::with_capacity(capacity + 1);
        pollfds.push(libc::pollfd {
            fd: wakeup_fd,
            events: libc::POLLIN,
            revents: 0,
        });
        let mut entries = Vec::with_capacity(capacity + 1);
        entries.push(None);
        Self {
            pollfds,
            entries,
            slots: AHashMap::with_capacity(capacity),
            pending_changes: false,
        }
    }

    /// Number of watched descriptors, excluding the wakeup slot
    pub(crate) fn len(&self) -> usize {
        self.entries.len() - 1
    }

    pub(crate) fn slot_of(&self, fd: RawFd) -> Option<usize> {
        self.slots.get(&fd).copied()
    }

    pub(crate) fn interest_of(&self, fd: RawFd) -> Option<Interest> {
        let slot = self.slot_of(fd)?;
        self.entries[slot].as_ref().map(|e| e.interest)
    }

    pub(crate) fn pending_changes(&self) -> bool {
        self.pending_changes
    }

    /// Insert `fd`, or replace its token and interest if already watched
    pub(crate) fn upsert(&mut self, fd: RawFd, token: T, interest: Interest) -> usize {
        self.pending_changes = true;
        if let Some(slot) = self.slot_of(fd) {
            self.pollfds[slot].events = interest.poll_events();
            self.pollfds[slot].revents = 0;
            self.entries[slot] = Some(Entry {
                fd,
                interest,
                token,
            });
            return slot;
        }

        let slot = self.entries.len();
        self.pollfds.push(libc::pollfd {
            fd,
            events: interest.poll_events(),
            revents: 0,
        });
        self.entries.push(Some(Entry {
            fd,
            interest,
            token,
        }));
        self.slots.insert(fd, slot);
        slot
    }

    /// Stop watching `fd`, moving the last slot into its place
    pub(crate) fn remove(&mut self, fd: RawFd) -> Option<Entry<T>> {
        let slot = self.slots.remove(&fd)?;
        debug_assert_ne!(slot, WAKEUP_SLOT);
        self.pending_changes = true;

        self.pollfds.swap_remove(slot);
        let removed = self.entries.swap_remove(slot);
        if let Some(moved) = self.entries.get(slot).and_then(Option::as_ref) {
            self.slots.insert(moved.fd, slot);
        }
        removed
    }

    /// Add `direction` to the interest of a watched descriptor
    pub(crate) fn arm(&mut self, fd: RawFd, direction: Direction) -> Result<Interest, PollError> {
        let slot = self.slot_of(fd).ok_or(PollError::NotRegistered(fd))?;
        let entry = self.entries[slot]
            .as_mut()
            .ok_or(PollError::NotRegistered(fd))?;
        entry.interest = entry.interest.add(Interest::from(direction));
        self.pollfds[slot].events = entry.interest.poll_events();
        self.pending_changes = true;
        Ok(entry.interest)
    }

    /// Copy the table into `out` for one poll(2) call
    ///
    /// Descriptors with no armed direction are passed as -1 so the kernel
    /// skips them, which also keeps POLLHUP/POLLERR from spinning the loop.
    pub(crate) fn snapshot(&mut self, out: &mut Vec<libc::pollfd>) {
        self.pending_changes = false;
        out.clear();
        out.extend(self.pollfds.iter().enumerate().map(|(slot, pfd)| {
            let fd = if slot != WAKEUP_SLOT && pfd.events == 0 {
                -1
            } else {
                pfd.fd
            };
            libc::pollfd {
                fd,
                events: pfd.events,
                revents: 0,
            }
        }));
    }

    /// Apply one reported `revents` to `fd`, pushing an event per fired direction
    ///
    /// Fired directions are disarmed. POLLNVAL counts as an error condition and
    /// wakes both directions, as does POLLHUP. Returns the number of events pushed.
    pub(crate) fn fire(
        &mut self,
        fd: RawFd,
        revents: libc::c_short,
        out: &mut Vec<ReadyEvent<T>>,
    ) -> usize {
        // The descriptor may have been deregistered while the waiter was in poll(2).
        let Some(slot) = self.slot_of(fd) else {
            return 0;
        };
        let Some(entry) = self.entries[slot].as_mut() else {
            return 0;
        };

        let failure = libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;
        let mut fired = Interest::NONE;
        if revents & (libc::POLLIN | failure) != 0 && entry.interest.is_readable() {
            fired = fired.add(Interest::READ);
        }
        if revents & (libc::POLLOUT | failure) != 0 && entry.interest.is_writable() {
            fired = fired.add(Interest::WRITE);
        }
        if fired.is_empty() {
            return 0;
        }

        entry.interest = entry.interest.remove(fired);
        self.pollfds[slot].events = entry.interest.poll_events();

        let mut pushed = 0;
        for direction in [Direction::Read, Direction::Write] {
            if fired.contains(direction) {
                out.push(ReadyEvent {
                    token: entry.token.clone(),
                    direction,
                    readiness: Readiness::for_direction(direction, revents),
                });
                pushed += 1;
            }
        }
        pushed
    }

    /// Structural consistency of the three parallel views
    pub(crate) fn check_invariants(&self) -> bool {
        if self.pollfds.len() != self.entries.len() || self.entries[WAKEUP_SLOT].is_some() {
            return false;
        }
        if self.slots.len() != self.len() {
            return false;
        }
        self.slots.iter().all(|(&fd, &slot)| {
            slot != WAKEUP_SLOT
                && self.pollfds.get(slot).map(|p| p.fd) == Some(fd)
                && self.entries[slot]
                    .as_ref()
                    .map_or(false, |e| e.fd == fd && e.interest.poll_events() == self.pollfds[slot].events)
        })
    }
}
