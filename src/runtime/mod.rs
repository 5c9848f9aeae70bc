/*!
 * Runtime
 * Engine context and task factory
 */

mod factory;
#[allow(clippy::module_inception)]
mod runtime;

pub use runtime::Runtime;
