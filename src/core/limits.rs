/*!
 * System Limits and Constants
 *
 * Centralized location for engine-wide limits, defaults, and thresholds.
 * Grouped by subsystem.
 */

use std::time::Duration;

// =============================================================================
// WORK QUEUE / THREAD POOL
// =============================================================================

/// Message limit meaning "no limit" for a work queue
pub const UNBOUNDED_QUEUE: usize = 0;

/// Default stack size for pool threads (0 keeps the platform default)
pub const DEFAULT_POOL_STACK_SIZE: usize = 0;

// =============================================================================
// MULTIPLEXER
// =============================================================================

/// Default size of the shared fd node table
pub const DEFAULT_MAX_OPEN_FILES: usize = 65536;

/// Events fetched per epoll_wait call
pub const POLLER_EVENTS_MAX: usize = 256;

/// Read buffer size for each readiness event
pub const POLLER_BUFSIZE: usize = 64 * 1024;

/// Upper bound on a single epoll_wait sleep when no timers are pending
pub const POLLER_IDLE_WAIT: Duration = Duration::from_millis(1000);

// =============================================================================
// COMMUNICATOR
// =============================================================================

/// Maximum iovecs a message may encode into per send
pub const ENCODE_VECTORS_MAX: usize = 8192;

/// Listen backlog for services
pub const LISTEN_BACKLOG: i32 = 65535;

// =============================================================================
// ENDPOINT / SERVER DEFAULTS (milliseconds)
// =============================================================================

pub const DEFAULT_MAX_CONNECTIONS: usize = 200;
pub const DEFAULT_CONNECT_TIMEOUT_MS: i32 = 10 * 1000;
pub const DEFAULT_RESPONSE_TIMEOUT_MS: i32 = 10 * 1000;

pub const DEFAULT_SERVER_MAX_CONNECTIONS: usize = 2000;
pub const DEFAULT_PEER_RESPONSE_TIMEOUT_MS: i32 = 10 * 1000;
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_MS: i32 = 60 * 1000;

/// Wait timeout for target admission, -1 waits forever
pub const DEFAULT_WAIT_TIMEOUT_MS: i32 = -1;

// =============================================================================
// TASK GRAPH
// =============================================================================

/// Inline capacity of a series queue before it grows
pub const SERIES_INLINE_CAPACITY: usize = 4;

/// Initial branch capacity of a parallel work
pub const PARALLEL_INLINE_CAPACITY: usize = 4;

/// Synchronous completions allowed to nest before they are trampolined
pub const MAX_DISPATCH_DEPTH: usize = 32;
