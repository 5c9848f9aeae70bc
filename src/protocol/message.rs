/*!
 * Message Capability
 *
 * What the engine needs from any payload that travels over a session:
 * outbound messages encode into byte vectors, inbound messages consume a
 * stream of bytes until they are complete.
 */

use bytes::Bytes;
use std::io;

/// Result of feeding bytes to an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// Every byte was consumed and more are needed
    NeedMore,
    /// The message is whole; bytes past `consumed` belong to the next one
    Complete { consumed: usize },
}

/// Serializable side of a message
pub trait MessageOut: Send {
    /// Push at most `max` vectors onto `out` and return how many were added
    fn encode(&mut self, out: &mut Vec<Bytes>, max: usize) -> io::Result<usize>;
}

/// Streaming parse side of a message
pub trait MessageIn: Send {
    fn append(&mut self, buf: &[u8]) -> io::Result<Append>;

    fn set_size_limit(&mut self, _limit: usize) {}

    fn size_limit(&self) -> usize {
        usize::MAX
    }
}

/// A message usable both as request and response
pub trait ProtocolMessage: MessageOut + MessageIn + Default + 'static {}

impl<T> ProtocolMessage for T where T: MessageOut + MessageIn + Default + 'static {}

/// Error for a message that outgrew its size limit
pub fn too_large() -> io::Error {
    io::Error::from_raw_os_error(libc::EMSGSIZE)
}
