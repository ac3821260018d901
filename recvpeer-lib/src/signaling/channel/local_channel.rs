use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{SendError, SignalingChannel};

/// One end of an in-process signaling channel.
pub struct LocalChannel {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl LocalChannel {
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(a_tx),
                rx: a_rx,
            },
            Self {
                tx: Some(b_tx),
                rx: b_rx,
            },
        )
    }
}

#[async_trait]
impl SignalingChannel for LocalChannel {
    async fn send(&mut self, msg: Bytes) -> Result<(), SendError> {
        let tx = self.tx.as_ref().ok_or(SendError::TransportClosed)?;
        tx.send(msg).map_err(|_| SendError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}
