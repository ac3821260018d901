use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tracing::warn;

use super::{SendError, SignalingChannel};

/// Relays signaling codes through a human: outbound messages are printed,
/// inbound messages are pasted back one per line.
pub struct StdioChannel<R, W> {
    reader: R,
    writer: W,
    closed: bool,
}

impl StdioChannel<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> StdioChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            closed: false,
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    async fn print_code(&mut self, code: &str) -> Result<(), io::Error> {
        let text = format!(
            "\nYour signaling code:\n\n{}\n\nShare your signaling code with the remote peer, then paste its answer:\n",
            code
        );
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.flush().await
    }
}

#[async_trait]
impl<R, W> SignalingChannel for StdioChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: Bytes) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::TransportClosed);
        }
        let code = String::from_utf8_lossy(&msg).into_owned();
        self.print_code(&code).await.map_err(|err| {
            warn!("failed to write signaling code: {}", err);
            SendError::TransportClosed
        })
    }

    async fn recv(&mut self) -> Option<Bytes> {
        while !self.closed {
            let mut line = String::new();
            match self.reader.read_line(&mut line).await {
                Ok(0) => self.closed = true,
                Ok(_) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        return Some(Bytes::from(line.to_owned()));
                    }
                }
                Err(err) => {
                    warn!("failed to read signaling code: {}", err);
                    self.closed = true;
                }
            }
        }
        None
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_prints_code_on_its_own_line() {
        let mut channel = StdioChannel::new(&b""[..], Vec::new());
        channel.send(Bytes::from_static(b"b2ZmZXI=")).await.unwrap();
        let (_, written) = channel.into_inner();
        let written = String::from_utf8(written).unwrap();
        assert!(written.lines().any(|line| line == "b2ZmZXI="), "{}", written);
    }

    #[tokio::test]
    async fn test_recv_skips_blank_lines_and_ends_at_eof() {
        let input = b"\n   \n  YW5zd2Vy  \r\nc2Vjb25k\n";
        let mut channel = StdioChannel::new(&input[..], Vec::new());
        assert_eq!(channel.recv().await, Some(Bytes::from_static(b"YW5zd2Vy")));
        assert_eq!(channel.recv().await, Some(Bytes::from_static(b"c2Vjb25k")));
        assert_eq!(channel.recv().await, None);
        assert_eq!(
            channel.send(Bytes::from_static(b"x")).await,
            Err(SendError::TransportClosed)
        );
    }
}
