//! Writing side of the wire contract: one JSON object per line.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Serialize `value` as a single JSON object followed by the newline
/// delimiter.
pub fn encode_line<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut payload = serde_json::to_vec(value)?;
    payload.push(b'\n');
    Ok(payload)
}

/// Write one newline-delimited JSON message and flush it.
pub async fn write_message<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let payload = encode_line(value)?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::Response;

    #[test]
    fn encoded_line_ends_with_newline() {
        let bytes = encode_line(&Response::success_message("ok")).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let parsed: Response = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert!(parsed.is_success());
    }

    #[tokio::test]
    async fn write_message_round_trips_through_framer() {
        let mut sink = Vec::new();
        write_message(&mut sink, &Response::success()).await.unwrap();
        write_message(&mut sink, &Response::error("bad")).await.unwrap();

        let mut framer = crate::JsonFramer::new();
        framer.feed(&sink);
        let (values, err) = framer.drain();
        assert!(err.is_none());
        assert_eq!(values.len(), 2);
        assert_eq!(values[1]["status"], "error");
    }
}
