//! Newline-delimited JSON framing for envelope streams.
//!
//! The transport boundary is any bidirectional byte stream; both halves of
//! the control plane frame [`Envelope`]s as one JSON document per line.

use crate::message::Envelope;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Reads envelopes off the inbound half of a stream.
pub struct EnvelopeReader<R> {
    reader: BufReader<R>,
    line: String,
}

/// Writes envelopes onto the outbound half of a stream.
pub struct EnvelopeWriter<W> {
    io: W,
}

// === impl EnvelopeReader ===

impl<R: AsyncRead + Unpin> EnvelopeReader<R> {
    pub fn new(io: R) -> Self {
        Self {
            reader: BufReader::new(io),
            line: String::new(),
        }
    }

    /// The next well-formed envelope. Malformed lines are logged and skipped;
    /// `Ok(None)` means the stream closed.
    pub async fn next(&mut self) -> io::Result<Option<Envelope>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line).await? == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(error) => {
                    tracing::warn!(%error, "Skipping malformed frame");
                }
            }
        }
    }
}

// === impl EnvelopeWriter ===

impl<W: AsyncWrite + Unpin> EnvelopeWriter<W> {
    pub fn new(io: W) -> Self {
        Self { io }
    }

    pub async fn send(&mut self, envelope: &Envelope) -> io::Result<()> {
        let mut frame = serde_json::to_vec(envelope)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        frame.push(b'\n');
        self.io.write_all(&frame).await?;
        self.io.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HEARTBEAT;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn round_trip_skips_malformed_frames() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = EnvelopeWriter::new(client);
        let mut reader = EnvelopeReader::new(server);

        writer
            .send(&Envelope::new(HEARTBEAT, "c1", String::new()))
            .await
            .unwrap();
        // A malformed frame between two good ones is skipped.
        writer.io.write_all(b"{broken\n").await.unwrap();
        writer
            .send(&Envelope::new(HEARTBEAT, "c2", String::new()))
            .await
            .unwrap();

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.cluster_name, "c1");
        let second = reader.next().await.unwrap().unwrap();
        assert_eq!(second.cluster_name, "c2");
    }

    #[tokio::test]
    async fn closed_stream_yields_none() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = EnvelopeReader::new(server);
        assert!(reader.next().await.unwrap().is_none());
    }
}
