use serde::Serialize;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::Mutex,
};

use crate::error::Error;

/// Duplex framing transport: one JSON message per LF-terminated line.
///
/// The transport is agnostic to what carries the bytes; production wires it
/// to a child process's stdio, tests wire it to an in-memory duplex pipe.
pub struct Transport {
    reader: TransportReader,
    writer: TransportWriter,
}

impl Transport {
    /// Builds a transport over an arbitrary reader/writer pair.
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: TransportReader {
                lines: BufReader::new(Box::new(reader)),
            },
            writer: TransportWriter {
                inner: Mutex::new(Some(Box::new(writer))),
            },
        }
    }

    /// Splits the transport into its reader and writer halves.
    pub(crate) fn into_split(self) -> (TransportReader, TransportWriter) {
        (self.reader, self.writer)
    }

    /// Reads and decodes the next message.
    pub async fn receive(&mut self) -> Result<Value, Error> {
        self.reader.receive().await
    }

    /// Serializes one message plus a terminating newline.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), Error> {
        self.writer.send(message).await
    }

    /// Closes the write half. Idempotent.
    pub async fn close(&self) {
        self.writer.close().await;
    }
}

pub(crate) struct TransportReader {
    lines: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
}

impl TransportReader {
    /// Reads one line, or `Ok(None)` at end of stream.
    ///
    /// A trailing CR is stripped so CRLF-framed peers are tolerated.
    pub(crate) async fn next_line(&mut self) -> Result<Option<String>, std::io::Error> {
        let mut line = String::new();
        let read = self.lines.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Reads the next non-empty line and decodes it as a JSON envelope.
    pub(crate) async fn receive(&mut self) -> Result<Value, Error> {
        loop {
            let line = match self.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(Error::transport("connection closed (eof)")),
                Err(source) => return Err(Error::transport_io("read failed", source)),
            };
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).map_err(|source| Error::Transport {
                message: "failed to decode message".to_string(),
                source: Some(Box::new(source)),
            });
        }
    }
}

pub(crate) struct TransportWriter {
    inner: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl TransportWriter {
    /// Writes one serialized message plus `\n`, holding the write lock for
    /// the whole frame so concurrent senders never interleave bytes.
    pub(crate) async fn send<T: Serialize>(&self, message: &T) -> Result<(), Error> {
        let mut frame = serde_json::to_vec(message)?;
        frame.push(b'\n');

        let mut guard = self.inner.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::transport("transport closed"))?;
        writer
            .write_all(&frame)
            .await
            .map_err(|source| Error::transport_io("write failed", source))?;
        writer
            .flush()
            .await
            .map_err(|source| Error::transport_io("flush failed", source))
    }

    /// Shuts the write half down. Safe to call more than once.
    pub(crate) async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_one_message_per_line() {
        let (client_end, mut server_end) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_end);
        let transport = Transport::new(read_half, write_half);

        transport
            .send(&json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize" }))
            .await
            .expect("send");

        let mut buffer = vec![0u8; 256];
        let read = tokio::io::AsyncReadExt::read(&mut server_end, &mut buffer)
            .await
            .expect("read");
        let raw = String::from_utf8_lossy(&buffer[..read]).to_string();
        assert!(raw.ends_with('\n'));
        assert_eq!(raw.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn tolerates_crlf_and_blank_lines() {
        let (client_end, mut server_end) = tokio::io::duplex(1024);
        let (read_half, write_half) = tokio::io::split(client_end);
        let mut transport = Transport::new(read_half, write_half);

        server_end
            .write_all(b"\r\n{\"method\":\"turn/started\",\"params\":{}}\r\n")
            .await
            .expect("write");

        let message = transport.receive().await.expect("receive");
        assert_eq!(message.get("method"), Some(&json!("turn/started")));
    }

    #[tokio::test]
    async fn eof_is_a_transport_error() {
        let (client_end, server_end) = tokio::io::duplex(64);
        let (read_half, write_half) = tokio::io::split(client_end);
        let mut transport = Transport::new(read_half, write_half);
        drop(server_end);

        let err = transport.receive().await.expect_err("eof");
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_later_sends() {
        let (client_end, _server_end) = tokio::io::duplex(64);
        let (read_half, write_half) = tokio::io::split(client_end);
        let transport = Transport::new(read_half, write_half);

        transport.close().await;
        transport.close().await;

        let err = transport
            .send(&json!({ "method": "noop" }))
            .await
            .expect_err("send after close");
        assert!(err.is_transport());
    }
}
