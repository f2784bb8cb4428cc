use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::channel::{ChannelEvent, ConnectAuth, FrameChannel, FrameTransport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Abnormal closure, used when the stream dies without a close frame.
const CLOSE_CODE_ABNORMAL: u16 = 1006;

type WsStream =
	tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Production transport: WebSocket with bearer auth in the upgrade
/// headers. Redirects are followed by the underlying client.
pub struct WebSocketTransport;

#[async_trait]
impl FrameTransport for WebSocketTransport {
	async fn connect(&self, endpoint: &Url, auth: &ConnectAuth) -> Result<Box<dyn FrameChannel>> {
		let mut request = endpoint
			.as_str()
			.into_client_request()
			.context("failed to build WebSocket request")?;

		request.headers_mut().insert(
			"Authorization",
			format!("Bearer {}", auth.api_key)
				.parse()
				.context("api key is not a valid header value")?,
		);
		request.headers_mut().insert(
			"x-host-session-id",
			auth.session_id
				.parse()
				.context("session id is not a valid header value")?,
		);

		let (ws_stream, _response) =
			tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
				.await
				.context("timed out connecting to orchestrator")?
				.context("failed to connect to orchestrator")?;

		Ok(Box::new(WebSocketChannel {
			ws_stream,
			closed: false,
		}))
	}
}

pub struct WebSocketChannel {
	ws_stream: WsStream,
	closed: bool,
}

#[async_trait]
impl FrameChannel for WebSocketChannel {
	async fn send(&mut self, frame: String) -> Result<()> {
		self.ws_stream
			.send(Message::Text(frame.into()))
			.await
			.context("failed to send frame")
	}

	async fn recv(&mut self) -> Option<ChannelEvent> {
		if self.closed {
			return None;
		}

		loop {
			match self.ws_stream.next().await {
				Some(Ok(Message::Text(raw))) => {
					return Some(ChannelEvent::Message(raw.to_string()));
				}
				Some(Ok(Message::Close(frame))) => {
					self.closed = true;
					let (code, reason) = match frame {
						Some(frame) => (frame.code.into(), frame.reason.to_string()),
						None => (CloseCode::Status.into(), String::new()),
					};
					return Some(ChannelEvent::Close { code, reason });
				}
				Some(Ok(msg)) => {
					// Ping/pong are handled by tungstenite itself.
					tracing::trace!(?msg, "ignoring non-text message");
				}
				Some(Err(err)) => {
					tracing::debug!(?err, "websocket error");
					self.closed = true;
					return Some(ChannelEvent::Close {
						code: CLOSE_CODE_ABNORMAL,
						reason: err.to_string(),
					});
				}
				None => {
					self.closed = true;
					return Some(ChannelEvent::Close {
						code: CLOSE_CODE_ABNORMAL,
						reason: "stream ended".into(),
					});
				}
			}
		}
	}

	async fn ping(&mut self) -> Result<()> {
		self.ws_stream
			.send(Message::Ping(Vec::new().into()))
			.await
			.context("failed to send ping")
	}

	async fn close(&mut self) {
		let _ = self.ws_stream.close(None).await;
		self.closed = true;
	}
}
