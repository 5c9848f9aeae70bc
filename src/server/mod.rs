/*!
 * Server
 * Listening services that answer requests with server tasks
 */

#[allow(clippy::module_inception)]
mod server;

pub use server::Server;
