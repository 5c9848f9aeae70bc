/*!
 * Monitoring
 * Tracing subscriber setup and operation timing
 */

mod tracer;

pub use tracer::{init_tracing, span_operation, OperationSpan};
