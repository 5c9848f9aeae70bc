/*!
 * Protocol
 * Message capability consumed by sessions, plus a length-prefixed frame
 */

mod message;
mod raw;

pub use message::{too_large, Append, MessageIn, MessageOut, ProtocolMessage};
pub use raw::RawMessage;
