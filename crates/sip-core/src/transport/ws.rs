//! WebSocket implementation of the transport [`Factory`] (RFC 7118)

use super::{Factory, Socket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::io;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Dials `ws://` and `wss://` URIs with the `sip` subprotocol
#[derive(Debug, Default)]
pub struct WsFactory;

#[async_trait::async_trait]
impl Factory for WsFactory {
    async fn connect(&self, ws_uri: &str) -> io::Result<Box<dyn Socket>> {
        let mut request = ws_uri
            .into_client_request()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("sip"));

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;

        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Socket for WsSocket {
    async fn send(&mut self, frame: Bytes) -> io::Result<()> {
        let text = String::from_utf8(frame.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e))
    }

    async fn recv(&mut self) -> Option<io::Result<Bytes>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Bytes::from(text.into_bytes()))),
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(_)) => return None,
                // pings are answered by the stream itself on next flush
                Ok(_) => continue,
                Err(e) => return Some(Err(io::Error::new(io::ErrorKind::ConnectionAborted, e))),
            }
        }
    }
}
