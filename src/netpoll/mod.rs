/*!
 * Network Poller
 *
 * poll(2)-based readiness notification for platforms with no epoll or
 * kqueue. Descriptors are watched one-shot per direction; a wakeup pipe
 * lets any thread interrupt a blocked wait.
 */

mod config;
mod interest;
mod poller;
mod table;
mod timeout;
mod wakeup;

pub use config::PollConfig;
pub use interest::{Direction, Interest, PollResult, Readiness, ReadyEvent};
pub use poller::{Poller, PollerCell};
pub use timeout::poll_timeout_ms;
