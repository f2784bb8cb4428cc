//! Scripted in-memory orchestrator.
//!
//! [`MemoryTransport`] satisfies the host's transport seam; every dial
//! yields a [`ServerSession`] the test drives frame by frame.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use trigger_host::protocol::{Frame, WireError};
use trigger_host::{ChannelEvent, ConnectAuth, FrameChannel, FrameTransport};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub fn memory() -> (Arc<MemoryTransport>, Orchestrator) {
	let (conns_tx, conns_rx) = mpsc::unbounded_channel();
	(
		Arc::new(MemoryTransport {
			conns_tx,
			auths: Mutex::new(Vec::new()),
		}),
		Orchestrator { conns_rx },
	)
}

pub struct MemoryTransport {
	conns_tx: mpsc::UnboundedSender<ServerSession>,
	auths: Mutex<Vec<ConnectAuth>>,
}

impl MemoryTransport {
	/// Credentials presented on each dial, in order.
	pub fn auths(&self) -> Vec<ConnectAuth> {
		self.auths.lock().unwrap().clone()
	}
}

#[async_trait]
impl FrameTransport for MemoryTransport {
	async fn connect(&self, _endpoint: &url::Url, auth: &ConnectAuth) -> Result<Box<dyn FrameChannel>> {
		let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
		let (from_client_tx, from_client_rx) = mpsc::unbounded_channel();

		self.auths.lock().unwrap().push(auth.clone());
		self.conns_tx
			.send(ServerSession {
				to_client: to_client_tx,
				from_client: from_client_rx,
				next_id: 1000,
			})
			.map_err(|_| anyhow::anyhow!("orchestrator gone"))?;

		Ok(Box::new(MemoryChannel {
			to_server: from_client_tx,
			from_server: to_client_rx,
		}))
	}
}

struct MemoryChannel {
	to_server: mpsc::UnboundedSender<String>,
	from_server: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
impl FrameChannel for MemoryChannel {
	async fn send(&mut self, frame: String) -> Result<()> {
		self.to_server
			.send(frame)
			.map_err(|_| anyhow::anyhow!("server session dropped"))
	}

	async fn recv(&mut self) -> Option<ChannelEvent> {
		let r = self.from_server.recv().await;
		eprintln!("DEBUG MemoryChannel::recv -> {:?}", r);
		r
	}

	async fn ping(&mut self) -> Result<()> {
		Ok(())
	}

	async fn close(&mut self) {}
}

pub struct Orchestrator {
	conns_rx: mpsc::UnboundedReceiver<ServerSession>,
}

impl Orchestrator {
	pub async fn accept(&mut self) -> ServerSession {
		tokio::time::timeout(FRAME_TIMEOUT, self.conns_rx.recv())
			.await
			.expect("timed out waiting for connection")
			.expect("transport dropped")
	}

	pub fn try_accept(&mut self) -> Option<ServerSession> {
		self.conns_rx.try_recv().ok()
	}
}

pub struct ServerSession {
	to_client: mpsc::UnboundedSender<ChannelEvent>,
	from_client: mpsc::UnboundedReceiver<String>,
	next_id: u64,
}

impl Drop for ServerSession {
	fn drop(&mut self) {
		eprintln!("DEBUG ServerSession dropped");
	}
}

impl ServerSession {
	async fn next_frame(&mut self) -> Frame {
		let raw = tokio::time::timeout(FRAME_TIMEOUT, self.from_client.recv())
			.await
			.expect("timed out waiting for frame")
			.expect("client disconnected");
		Frame::decode(&raw).expect("invalid frame from client")
	}

	/// Next request frame, asserting its method. Response frames arriving
	/// in between (handler acks finishing out of order) are skipped.
	pub async fn expect_call(&mut self, method: &str) -> (u64, serde_json::Value) {
		loop {
			match self.next_frame().await {
				Frame::Request {
					id,
					method: actual,
					payload,
				} => {
					assert_eq!(actual, method, "unexpected method, payload: {payload}");
					return (id, payload);
				}
				Frame::Response { .. } => continue,
			}
		}
	}

	/// Next response frame, asserting its correlation id. Request frames
	/// are not tolerated here.
	pub async fn expect_response(&mut self, id: u64) -> (bool, Option<serde_json::Value>) {
		loop {
			match self.next_frame().await {
				Frame::Response {
					id: actual,
					ok,
					value,
					..
				} => {
					if actual != id {
						// Ack for an earlier fire-and-forget request.
						continue;
					}
					return (ok, value);
				}
				frame => panic!("expected response frame, got {frame:?}"),
			}
		}
	}

	pub fn respond_ok(&mut self, id: u64, value: serde_json::Value) {
		self.send_frame(Frame::ok_response(id, value));
	}

	pub fn respond_err(&mut self, id: u64, error: WireError) {
		self.send_frame(Frame::err_response(id, error));
	}

	/// Boolean acknowledgement for an intent RPC.
	pub fn ack(&mut self, id: u64) {
		self.respond_ok(id, serde_json::Value::Bool(true));
	}

	/// Server originated call; returns the correlation id to await the
	/// client's acknowledgement with.
	pub fn call(&mut self, method: &str, payload: serde_json::Value) -> u64 {
		self.next_id += 1;
		let id = self.next_id;
		self.send_frame(Frame::request(id, method, payload));
		id
	}

	pub fn close(&mut self, code: u16, reason: &str) {
		let _ = self.to_client.send(ChannelEvent::Close {
			code,
			reason: reason.to_string(),
		});
	}

	/// Answers the registration handshake with a default record and
	/// returns the request payload for assertions.
	pub async fn register(&mut self) -> serde_json::Value {
		let (id, payload) = self.expect_call("INITIALIZE_HOST_V2").await;
		self.respond_ok(
			id,
			serde_json::json!({
				"type": "success",
				"data": default_record(),
			}),
		);
		payload
	}

	/// Asserts the client sends nothing for the given window.
	pub async fn assert_idle(&mut self, window: Duration) {
		match tokio::time::timeout(window, self.from_client.recv()).await {
			Err(_) => {}
			Ok(None) => {}
			Ok(Some(raw)) => panic!("unexpected frame while idle: {raw}"),
		}
	}

	fn send_frame(&mut self, frame: Frame) {
		let raw = frame.encode().expect("failed to encode frame");
		let _ = self.to_client.send(ChannelEvent::Message(raw));
	}
}

pub fn default_record() -> serde_json::Value {
	serde_json::json!({
		"workflow": {"id": "w1", "slug": "w1"},
		"environment": {"id": "e", "slug": "e"},
		"organization": {"id": "o", "slug": "o"},
		"isNew": true,
		"url": "https://app.trigger.test"
	})
}
