/*!
 * Communicator
 * Sessions, targets, services, and the reactor that drives them
 */

mod communicator;
mod conn;
mod service;
mod session;
mod socket;
mod target;

pub use communicator::Communicator;
pub use conn::Connection;
pub use service::{CommService, ServiceHandler};
pub use session::{
    BoxCommSession, BoxSleepSession, CommSession, SessionCore, SessionState, SleepSession, SleepState,
};
pub use target::{CommTarget, SchedGroup, SchedObject};
