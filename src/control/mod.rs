//! Control channel - a WebSocket carrying one signal or event frame per
//! binary message.
//!
//! The client connects to the session's `run` URL, which carries the token
//! as its query string. Message boundaries are frame boundaries, so a frame
//! whose declared length differs from the message it arrived in is caught
//! by [`Multiplexer::on_signal`](crate::Multiplexer::on_signal).
//!
//! # Workflow
//!
//! 1. Client generates a session token and derives the session URLs
//! 2. Client opens the WebSocket at `ws[s]://…/run?<token>`
//! 3. Binary messages flow in both directions; the pending-send queue is flushed
//!
//! # Example
//!
//! ```no_run
//! use guestwire::control;
//! use guestwire::transport::{SessionToken, SessionUrls};
//!
//! # async fn example() -> guestwire::Result<()> {
//! let token = SessionToken::generate();
//! let urls = SessionUrls::new("http://localhost:8080/io/", &token)?;
//! let socket = control::connect(&urls.run).await?;
//! # drop(socket);
//! # Ok(())
//! # }
//! ```

use futures_util::{Sink, Stream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Result;

/// WebSocket returned by [`connect`].
pub type ControlSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A message-oriented duplex the session can run its control channel over.
///
/// Implemented for every `tokio-tungstenite` WebSocket stream, whatever the
/// underlying I/O.
pub trait ControlTransport:
    Stream<Item = std::result::Result<Message, tungstenite::Error>>
    + Sink<Message, Error = tungstenite::Error>
    + Unpin
    + Send
    + 'static
{
}

impl<T> ControlTransport for T where
    T: Stream<Item = std::result::Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send
        + 'static
{
}

/// Open the control channel at `url` (`ws` or `wss`).
pub async fn connect(url: &Url) -> Result<ControlSocket> {
    let (socket, response) = connect_async_with_config(url.as_str(), None, true).await?;
    tracing::debug!(%url, status = %response.status(), "control channel connected");
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SessionToken, SessionUrls};
    use bytes::Bytes;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

    #[tokio::test]
    async fn test_connect_carries_token_and_exchanges_binary() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (uri_tx, uri_rx) = oneshot::channel();

        let host = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                let _ = uri_tx.send(req.uri().to_string());
                Ok(resp)
            })
            .await
            .unwrap();
            ws.send(Message::Binary(Bytes::from_static(&[8, 0, 0, 0, 0, 0, 0, 0])))
                .await
                .unwrap();
            ws.next().await.unwrap().unwrap()
        });

        let token = SessionToken::from_string("tok-1");
        let urls = SessionUrls::new(&format!("http://{}/io/", addr), &token).unwrap();
        let mut socket = connect(&urls.run).await.unwrap();

        assert_eq!(uri_rx.await.unwrap(), "/io/run?tok-1");
        assert_eq!(
            socket.next().await.unwrap().unwrap(),
            Message::Binary(Bytes::from_static(&[8, 0, 0, 0, 0, 0, 0, 0]))
        );

        socket
            .send(Message::Binary(Bytes::from_static(&[8, 0, 0, 0, 1, 0, 0, 0])))
            .await
            .unwrap();
        assert_eq!(
            host.await.unwrap(),
            Message::Binary(Bytes::from_static(&[8, 0, 0, 0, 1, 0, 0, 0]))
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("ws://{}/io/run?t", addr)).unwrap();
        assert!(connect(&url).await.is_err());
    }
}
