//! Server connection with bounded-time receives.
//!
//! The server owes no reply within any deadline; the client imposes its
//! own (short for ordinary replies, longer for bulk sync) and treats a
//! stall as a recoverable connection failure. Unsolicited pushes that
//! arrive while waiting for a reply are stashed and handed to the caller
//! separately instead of being mistaken for the reply.

use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info};

use parley_net::{write_message, JsonFramer};
use parley_shared::{Incoming, PushEvent, Request, Response};

use crate::error::{ClientError, Result};

const READ_CHUNK: usize = 4096;

/// One live connection to the server.
pub struct Connection {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    framer: JsonFramer,
    pushes: Vec<PushEvent>,
}

impl Connection {
    /// Connect within `timeout`.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout)??;
        info!(addr, "connected to server");
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer,
            framer: JsonFramer::new(),
            pushes: Vec::new(),
        })
    }

    /// Write one request frame.
    pub async fn send<T: Serialize>(&mut self, request: &T) -> Result<()> {
        write_message(&mut self.writer, request).await?;
        Ok(())
    }

    /// Read the next frame off the socket, waiting at most `timeout`.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Incoming> {
        let deadline = Instant::now() + timeout;
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(value) = self.framer.next_value()? {
                return Ok(serde_json::from_value(value)?);
            }

            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ClientError::Timeout)?;
            let n = tokio::time::timeout(remaining, self.reader.read(&mut chunk))
                .await
                .map_err(|_| ClientError::Timeout)??;
            if n == 0 {
                return Err(ClientError::Closed);
            }
            self.framer.feed(&chunk[..n]);
        }
    }

    /// Send a request and wait for its reply.
    ///
    /// Pushes that arrive first are stashed (see [`Self::drain_pushes`]),
    /// never treated as the reply or as a failure.
    pub async fn request(&mut self, request: &Request, timeout: Duration) -> Result<Response> {
        self.send(request).await?;
        loop {
            match self.recv(timeout).await? {
                Incoming::Reply(response) => return Ok(response),
                Incoming::Push(push) => {
                    debug!(action = %push.action, "push received while awaiting reply");
                    self.pushes.push(push);
                }
            }
        }
    }

    /// Pushes accumulated since the last drain, oldest first.
    pub fn drain_pushes(&mut self) -> Vec<PushEvent> {
        std::mem::take(&mut self.pushes)
    }
}
