//! Framed duplex channel abstraction.
//!
//! The connection layer only needs ordered opaque text frames plus a
//! close signal in each direction. The production transport is a
//! WebSocket ([`crate::websocket::WebSocketTransport`]); tests substitute
//! an in-memory pair. Transport failures of any kind surface as
//! [`ChannelEvent::Close`].

use anyhow::Result;
use async_trait::async_trait;
use url::Url;

/// Credentials presented when dialing the orchestrator.
#[derive(Debug, Clone)]
pub struct ConnectAuth {
	/// Sent as `Authorization: Bearer <api_key>`.
	pub api_key: String,
	/// Stable across reconnects so the server can resume session state.
	pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
	Message(String),
	Close { code: u16, reason: String },
}

#[async_trait]
pub trait FrameChannel: Send {
	async fn send(&mut self, frame: String) -> Result<()>;

	/// Next inbound event. `None` means the stream ended without a close
	/// frame (treated like an abnormal close).
	async fn recv(&mut self) -> Option<ChannelEvent>;

	/// Transport-level heartbeat. No-op for transports without one.
	async fn ping(&mut self) -> Result<()>;

	async fn close(&mut self);
}

#[async_trait]
pub trait FrameTransport: Send + Sync {
	async fn connect(&self, endpoint: &Url, auth: &ConnectAuth) -> Result<Box<dyn FrameChannel>>;
}
