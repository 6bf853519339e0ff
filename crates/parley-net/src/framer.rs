//! Recovers complete JSON messages from a raw byte stream.
//!
//! TCP gives no message boundaries: one read may carry half a message,
//! several concatenated messages, or a message split mid-character. The
//! [`JsonFramer`] accumulates bytes and yields one complete top-level JSON
//! value at a time, consuming exactly the bytes each value occupies and
//! keeping any incomplete tail for the next feed.
//!
//! Peers are expected to write newline-delimited JSON, but the framer does
//! not rely on the delimiter; objects packed back-to-back in a single read
//! decode just as well.

use bytes::{Buf, BytesMut};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    /// A buffered segment could not be parsed as JSON. The remainder of
    /// the buffered read has been discarded; the caller must log this as
    /// data loss.
    #[error("malformed JSON segment, {discarded} buffered byte(s) discarded: {source}")]
    Malformed {
        #[source]
        source: serde_json::Error,
        discarded: usize,
    },
}

/// Incremental JSON message extractor over an append-only byte buffer.
#[derive(Debug, Default)]
pub struct JsonFramer {
    buf: BytesMut,
}

impl JsonFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append freshly read bytes to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes currently buffered and not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Try to extract the next complete JSON value.
    ///
    /// Returns `Ok(None)` when the buffer is empty or holds only an
    /// incomplete trailing value; feed more bytes and call again. On a
    /// malformed segment the rest of the buffer is dropped and
    /// [`FrameError::Malformed`] is returned — subsequent calls start
    /// clean.
    pub fn next_value(&mut self) -> Result<Option<Value>, FrameError> {
        self.skip_whitespace();
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
        match stream.next() {
            None => Ok(None),
            Some(Ok(value)) => {
                let consumed = stream.byte_offset();
                self.buf.advance(consumed);
                Ok(Some(value))
            }
            // An incomplete trailing value, including a multi-byte
            // character split across reads inside a string: wait for more
            // bytes.
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => {
                let discarded = self.buf.len();
                self.buf.clear();
                Err(FrameError::Malformed {
                    source: e,
                    discarded,
                })
            }
        }
    }

    /// Drain every complete value currently buffered.
    ///
    /// Stops at the first malformed segment (which empties the buffer),
    /// returning the values decoded before it alongside the error.
    pub fn drain(&mut self) -> (Vec<Value>, Option<FrameError>) {
        let mut values = Vec::new();
        loop {
            match self.next_value() {
                Ok(Some(value)) => values.push(value),
                Ok(None) => return (values, None),
                Err(e) => return (values, Some(e)),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        let skip = self
            .buf
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .count();
        if skip > 0 {
            self.buf.advance(skip);
        }
    }
}
