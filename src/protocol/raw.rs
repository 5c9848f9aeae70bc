/*!
 * Raw Frames
 *
 * Length-prefixed byte frames: a big-endian u32 body length followed by
 * the body.
 */

use super::message::{too_large, Append, MessageIn, MessageOut};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone)]
pub struct RawMessage {
    body: Bytes,
    header: [u8; HEADER_LEN],
    header_len: usize,
    expected: Option<usize>,
    partial: BytesMut,
    size_limit: usize,
}

impl Default for RawMessage {
    fn default() -> Self {
        Self {
            body: Bytes::new(),
            header: [0; HEADER_LEN],
            header_len: 0,
            expected: None,
            partial: BytesMut::new(),
            size_limit: usize::MAX,
        }
    }
}

impl RawMessage {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Whole frame as one buffer
    pub fn to_frame(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(HEADER_LEN + self.body.len());
        frame.put_u32(self.body.len() as u32);
        frame.extend_from_slice(&self.body);
        frame.freeze()
    }
}

impl MessageOut for RawMessage {
    fn encode(&mut self, out: &mut Vec<Bytes>, max: usize) -> io::Result<usize> {
        if self.body.len() > u32::MAX as usize {
            return Err(too_large());
        }
        if max < 2 {
            return Err(io::Error::from_raw_os_error(libc::EOVERFLOW));
        }

        out.push(Bytes::copy_from_slice(&(self.body.len() as u32).to_be_bytes()));
        out.push(self.body.clone());
        Ok(2)
    }
}

impl MessageIn for RawMessage {
    fn append(&mut self, buf: &[u8]) -> io::Result<Append> {
        let mut consumed = 0;

        if self.expected.is_none() {
            let take = (HEADER_LEN - self.header_len).min(buf.len());
            self.header[self.header_len..self.header_len + take].copy_from_slice(&buf[..take]);
            self.header_len += take;
            consumed += take;
            if self.header_len < HEADER_LEN {
                return Ok(Append::NeedMore);
            }

            let len = u32::from_be_bytes(self.header) as usize;
            if len > self.size_limit {
                return Err(too_large());
            }
            self.expected = Some(len);
            self.partial.reserve(len);
        }

        let expected = self.expected.unwrap_or(0);
        let take = (expected - self.partial.len()).min(buf.len() - consumed);
        self.partial.extend_from_slice(&buf[consumed..consumed + take]);
        consumed += take;

        if self.partial.len() < expected {
            return Ok(Append::NeedMore);
        }

        self.body = self.partial.split().freeze();
        self.expected = None;
        self.header_len = 0;
        Ok(Append::Complete { consumed })
    }

    fn set_size_limit(&mut self, limit: usize) {
        self.size_limit = limit;
    }

    fn size_limit(&self) -> usize {
        self.size_limit
    }
}
