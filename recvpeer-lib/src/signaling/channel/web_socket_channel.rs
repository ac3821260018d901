use std::io::ErrorKind;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{net::TcpStream, spawn, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, trace, warn};

use super::{ConnectError, SendError, SignalingChannel};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Accepts either a bare `host:port` or a full `ws://`/`wss://` URL.
pub fn signaling_url(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_owned()
    } else {
        format!("ws://{}", address)
    }
}

fn to_connect_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Io(err) if err.kind() == ErrorKind::ConnectionRefused => {
            ConnectError::Refused(err.to_string())
        }
        tungstenite::Error::Http(response) => {
            ConnectError::Refused(format!("handshake rejected with {}", response.status()))
        }
        err => ConnectError::Unreachable(err.to_string()),
    }
}

fn to_send_error(err: tungstenite::Error) -> SendError {
    match err {
        tungstenite::Error::Io(err) if err.kind() == ErrorKind::NotConnected => {
            SendError::NotConnected
        }
        tungstenite::Error::AlreadyClosed | tungstenite::Error::ConnectionClosed => {
            SendError::TransportClosed
        }
        err => {
            warn!("websocket send failed: {}", err);
            SendError::TransportClosed
        }
    }
}

async fn forward_incoming(
    mut stream: SplitStream<Stream>,
    incoming_tx: mpsc::UnboundedSender<Bytes>,
) {
    while let Some(result) = stream.next().await {
        let data = match result {
            Ok(Message::Text(text)) => Bytes::from(text),
            Ok(Message::Binary(data)) => Bytes::from(data),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Ok(Message::Close(frame)) => {
                debug!("websocket closed by peer: {:?}", frame);
                return;
            }
            Err(err) => {
                debug!("websocket read failed: {}", err);
                return;
            }
        };
        trace!("websocket received {} bytes", data.len());
        if incoming_tx.send(data).is_err() {
            return;
        }
    }
}

pub struct WebSocketChannel {
    sink: Option<SplitSink<Stream, Message>>,
    incoming_rx: mpsc::UnboundedReceiver<Bytes>,
    reader: JoinHandle<()>,
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl WebSocketChannel {
    pub async fn connect(address: &str) -> Result<Self, ConnectError> {
        let url = signaling_url(address);
        debug!("connecting to signaling server {}", url);
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(to_connect_error)?;
        debug!("connected to signaling server {}", url);

        // NOTE: Reading runs on its own task so that inbound messages are
        //       queued even while nobody is awaiting `recv`.
        let (sink, stream) = stream.split();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let reader = spawn(forward_incoming(stream, incoming_tx));

        Ok(Self {
            sink: Some(sink),
            incoming_rx,
            reader,
        })
    }
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn send(&mut self, msg: Bytes) -> Result<(), SendError> {
        let sink = self.sink.as_mut().ok_or(SendError::TransportClosed)?;
        let msg = match String::from_utf8(msg.to_vec()) {
            Ok(text) => Message::Text(text),
            Err(err) => Message::Binary(err.into_bytes()),
        };
        sink.send(msg).await.map_err(to_send_error)
    }

    async fn recv(&mut self) -> Option<Bytes> {
        self.incoming_rx.recv().await
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            if let Err(err) = sink.close().await {
                trace!("websocket close failed: {}", err);
            }
        }
        self.incoming_rx.close();
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    #[test]
    fn test_signaling_url() {
        assert_eq!(signaling_url("example.com:8765"), "ws://example.com:8765");
        assert_eq!(signaling_url(" 10.0.0.2:8765\n"), "ws://10.0.0.2:8765");
        assert_eq!(signaling_url("wss://example.com/sig"), "wss://example.com/sig");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let Err(err) = WebSocketChannel::connect(&address.to_string()).await else {
            panic!("connected to a closed port");
        };
        assert!(matches!(err, ConnectError::Refused(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_exchange_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            let offer = ws.next().await.unwrap().unwrap();
            assert_eq!(offer, Message::Text("offer".to_owned()));
            ws.send(Message::Text("first".to_owned())).await.unwrap();
            ws.send(Message::Binary(b"second".to_vec())).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut channel = WebSocketChannel::connect(&address.to_string())
            .await
            .unwrap();
        channel.send(Bytes::from_static(b"offer")).await.unwrap();
        assert_eq!(channel.recv().await, Some(Bytes::from_static(b"first")));
        assert_eq!(channel.recv().await, Some(Bytes::from_static(b"second")));
        assert_eq!(channel.recv().await, None);
        server.await.unwrap();

        channel.close().await;
        assert_eq!(
            channel.send(Bytes::from_static(b"late")).await,
            Err(SendError::TransportClosed)
        );
    }
}
