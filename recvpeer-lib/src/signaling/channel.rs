mod local_channel;
mod stdio_channel;
mod web_socket_channel;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use self::{
    local_channel::LocalChannel,
    stdio_channel::StdioChannel,
    web_socket_channel::{signaling_url, WebSocketChannel},
};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("signaling server is unreachable: {0}")]
    Unreachable(String),
    #[error("signaling server refused the connection: {0}")]
    Refused(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("signaling channel is not connected")]
    NotConnected,
    #[error("signaling channel is closed")]
    TransportClosed,
}

/// An ordered, bidirectional message transport to the signaling peer.
#[async_trait]
pub trait SignalingChannel: Send {
    async fn send(&mut self, msg: Bytes) -> Result<(), SendError>;

    /// Returns `None` once the channel is closed by either side.
    /// Messages are yielded in the order the peer sent them.
    async fn recv(&mut self) -> Option<Bytes>;

    async fn close(&mut self);
}
