/*!
 * Interest and Readiness
 *
 * Interest is what a descriptor is armed for; readiness is what poll(2)
 * reported. Both are one byte of flags. Interest is one-shot per direction:
 * a direction that fires is disarmed until `Poller::arm` is called again.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Directions a descriptor is armed for
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Interest(u8);

impl Interest {
    /// Armed for nothing
    pub const NONE: Interest = Interest(0);
    /// Armed for read readiness
    pub const READ: Interest = Interest(0b01);
    /// Armed for write readiness
    pub const WRITE: Interest = Interest(0b10);
    /// Armed for both directions
    pub const BOTH: Interest = Interest(0b11);

    /// Returns true if read interest is set
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    /// Returns true if write interest is set
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    /// Returns true if no direction is armed
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if `direction` is armed
    pub const fn contains(self, direction: Direction) -> bool {
        self.0 & direction.bit() != 0
    }

    /// Combines interests
    #[must_use]
    pub const fn add(self, other: Interest) -> Self {
        Interest(self.0 | other.0)
    }

    /// Removes interest
    #[must_use]
    pub const fn remove(self, other: Interest) -> Self {
        Interest(self.0 & !other.0)
    }

    /// poll(2) `events` mask for this interest
    pub(crate) fn poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.is_readable() {
            events |= libc::POLLIN;
        }
        if self.is_writable() {
            events |= libc::POLLOUT;
        }
        events
    }
}

impl From<Direction> for Interest {
    fn from(direction: Direction) -> Self {
        Interest(direction.bit())
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (false, false) => write!(f, "Interest(NONE)"),
            (true, false) => write!(f, "Interest(READ)"),
            (false, true) => write!(f, "Interest(WRITE)"),
            (true, true) => write!(f, "Interest(READ | WRITE)"),
        }
    }
}

/// One I/O direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    const fn bit(self) -> u8 {
        match self {
            Direction::Read => 0b01,
            Direction::Write => 0b10,
        }
    }
}

/// What poll(2) reported for one direction of a descriptor
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Readiness(u8);

impl Readiness {
    pub const READABLE: Readiness = Readiness(0b0001);
    pub const WRITABLE: Readiness = Readiness(0b0010);
    pub const ERROR: Readiness = Readiness(0b0100);
    pub const HANGUP: Readiness = Readiness(0b1000);

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub const fn is_error(self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    pub const fn is_hangup(self) -> bool {
        self.0 & Self::HANGUP.0 != 0
    }

    #[must_use]
    pub const fn add(self, other: Readiness) -> Self {
        Readiness(self.0 | other.0)
    }

    /// Readiness for `direction` plus the error/hangup conditions in `revents`
    pub(crate) fn for_direction(direction: Direction, revents: libc::c_short) -> Self {
        let mut readiness = match direction {
            Direction::Read => Self::READABLE,
            Direction::Write => Self::WRITABLE,
        };
        if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            readiness = readiness.add(Self::ERROR);
        }
        if revents & libc::POLLHUP != 0 {
            readiness = readiness.add(Self::HANGUP);
        }
        readiness
    }
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_readable() {
            parts.push("READABLE");
        }
        if self.is_writable() {
            parts.push("WRITABLE");
        }
        if self.is_error() {
            parts.push("ERROR");
        }
        if self.is_hangup() {
            parts.push("HANGUP");
        }
        write!(f, "Readiness({})", parts.join(" | "))
    }
}

/// One task made runnable by `Poller::wait`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEvent<T> {
    /// The caller's handle for the blocked task
    pub token: T,
    /// Direction that fired
    pub direction: Direction,
    /// Direction bit plus any error/hangup condition
    pub readiness: Readiness,
}

/// Outcome of one `Poller::wait`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult<T> {
    /// Tasks that became runnable
    pub ready: Vec<ReadyEvent<T>>,
    /// How many I/O waiters stopped waiting; never positive with `ready` empty
    pub waiter_delta: i32,
}

impl<T> PollResult<T> {
    /// Result carrying nothing
    pub fn empty() -> Self {
        Self {
            ready: Vec::new(),
            waiter_delta: 0,
        }
    }

    pub(crate) fn from_ready(ready: Vec<ReadyEvent<T>>) -> Self {
        let waiter_delta = i32::try_from(ready.len()).unwrap_or(i32::MAX);
        Self { ready, waiter_delta }
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    /// Tokens of the ready tasks, in report order
    pub fn tokens(&self) -> impl Iterator<Item = &T> {
        self.ready.iter().map(|event| &event.token)
    }
}

impl<T> Default for PollResult<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interest_ops() {
        let both = Interest::READ.add(Interest::WRITE);
        assert_eq!(both, Interest::BOTH);
        assert!(both.contains(Direction::Read));
        assert_eq!(both.remove(Interest::READ), Interest::WRITE);
        assert!(Interest::NONE.is_empty());
        assert_eq!(Interest::from(Direction::Write), Interest::WRITE);
    }

    #[test]
    fn test_poll_events() {
        assert_eq!(Interest::NONE.poll_events(), 0);
        assert_eq!(Interest::BOTH.poll_events(), libc::POLLIN | libc::POLLOUT);
    }

    #[test]
    fn test_readiness_for_direction() {
        let r = Readiness::for_direction(Direction::Read, libc::POLLIN | libc::POLLERR);
        assert!(r.is_readable() && r.is_error());
        assert!(!r.is_writable() && !r.is_hangup());

        let w = Readiness::for_direction(Direction::Write, libc::POLLHUP);
        assert!(w.is_writable() && w.is_hangup());
        assert_eq!(format!("{:?}", w), "Readiness(WRITABLE | HANGUP)");
    }

    #[test]
    fn test_delta_matches_ready() {
        let result = PollResult::from_ready(vec![ReadyEvent {
            token: 9u32,
            direction: Direction::Read,
            readiness: Readiness::READABLE,
        }]);
        assert_eq!(result.waiter_delta, 1);
        assert_eq!(result.tokens().copied().collect::<Vec<_>>(), vec![9]);
        assert_eq!(PollResult::<u32>::empty().waiter_delta, 0);
    }
}
