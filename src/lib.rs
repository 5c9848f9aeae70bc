/*!
 * Flowkernel Library
 *
 * Asynchronous task engine: network, timer, compute, and file work wrapped
 * as tasks and composed into series and parallel graphs. Completion is
 * delivered through callbacks on engine threads.
 */

pub mod config;
pub mod core;
pub mod facilities;
pub mod kernel;
pub mod monitoring;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod task;
pub mod workflow;

// Re-exports
pub use config::{EndpointParams, GlobalSettings, ServerParams, TransportType};
pub use core::{KernelError, Result, TaskState, TimeoutReason};
pub use facilities::{series_completion, WaitGroup};
pub use monitoring::init_tracing;
pub use protocol::{MessageIn, MessageOut, RawMessage};
pub use runtime::Runtime;
pub use server::Server;
pub use task::{Callback, Task, TaskExt, TaskStatus};
pub use workflow::{BoxTask, ParallelWork, Series, SeriesWork, SubTask, Workflow};
