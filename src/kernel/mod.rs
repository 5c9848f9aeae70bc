/*!
 * Kernel
 * Work queue, thread pool, multiplexer, communicator, and executor
 */

pub mod comm;
pub mod executor;
pub mod poller;
pub mod pool;
pub mod queue;

pub use comm::{
    CommService, CommSession, CommTarget, Communicator, Connection, SchedGroup, SchedObject, ServiceHandler,
    SessionCore, SessionState, SleepSession, SleepState,
};
pub use executor::{BoxExecSession, ExecQueue, ExecSession, ExecState, Executor};
pub use poller::{MPoller, Operation, PollerData, PollerHandler, PollerResult, PollerState, TimerHandle};
pub use pool::{PoolTask, ThreadPool};
pub use queue::WorkQueue;
