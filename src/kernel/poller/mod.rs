/*!
 * Multiplexer
 *
 * epoll-backed readiness loops that perform the I/O for each registration
 * and report one completion record per finished operation.
 */

mod mpoller;
mod shard;
mod types;

pub use mpoller::MPoller;
pub use shard::Poller;
pub(crate) use types::deadline_after;
pub use types::{
    Operation, PollerData, PollerHandler, PollerResult, PollerState, ReadProgress, TimerHandle,
};
