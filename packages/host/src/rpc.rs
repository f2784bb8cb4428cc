//! Bidirectional request/response multiplexing over the frame channel.
//!
//! Outbound calls are validated against their method's typed payloads,
//! correlated by a process-unique id, and time out if no response frame
//! arrives. Inbound calls are parsed against the server catalogue and
//! dispatched to the router as independent tasks, so handlers complete
//! out of order while frames are still read in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use trigger_host_protocol::{ClientMethod, Frame, ServerCall, WireError};

use crate::error::RpcError;

/// Handles calls pushed by the orchestrator, returning the boolean
/// acknowledgement carried on the response frame.
#[async_trait]
pub(crate) trait InboundRouter: Send + Sync {
	async fn route(&self, call: ServerCall) -> anyhow::Result<bool>;
}

/// Which outbound lane a frame travels on. The workflow lane is held
/// until registration completes after every (re)connect; the system lane
/// carries the registration call itself and response frames.
#[derive(Debug, Clone, Copy)]
enum Lane {
	Workflow,
	System,
}

#[derive(Clone)]
pub(crate) struct RpcClient {
	inner: Arc<RpcInner>,
}

struct RpcInner {
	outbound_tx: mpsc::UnboundedSender<Frame>,
	system_tx: Mutex<mpsc::UnboundedSender<Frame>>,
	ready_rx: watch::Receiver<bool>,
	next_id: AtomicU64,
	pending: Mutex<HashMap<u64, oneshot::Sender<Result<Option<serde_json::Value>, WireError>>>>,
	router: OnceLock<Arc<dyn InboundRouter>>,
	request_timeout: Duration,
	retry_interval: Duration,
}

impl RpcClient {
	pub fn new(
		outbound_tx: mpsc::UnboundedSender<Frame>,
		ready_rx: watch::Receiver<bool>,
		request_timeout: Duration,
		retry_interval: Duration,
	) -> Self {
		// Starts detached; the connection binds a live sender per dial.
		let (system_tx, _) = mpsc::unbounded_channel();

		Self {
			inner: Arc::new(RpcInner {
				outbound_tx,
				system_tx: Mutex::new(system_tx),
				ready_rx,
				next_id: AtomicU64::new(0),
				pending: Mutex::new(HashMap::new()),
				router: OnceLock::new(),
				request_timeout,
				retry_interval,
			}),
		}
	}

	pub fn bind_router(&self, router: Arc<dyn InboundRouter>) {
		if self.inner.router.set(router).is_err() {
			tracing::warn!("inbound router already bound");
		}
	}

	/// Swaps the system lane sender for a freshly dialed connection.
	pub fn bind_system_sender(&self, tx: mpsc::UnboundedSender<Frame>) {
		*self.inner.system_tx.lock().expect("system lane lock poisoned") = tx;
	}

	/// One correlated request/response exchange on the workflow lane.
	pub async fn call<M: ClientMethod>(&self, req: &M::Request) -> Result<M::Response, RpcError> {
		self.await_ready().await?;
		self.exchange::<M>(req, Lane::Workflow).await
	}

	/// Like [`Self::call`] but bypasses the registration gate. Used for
	/// the handshake itself.
	pub async fn call_ungated<M: ClientMethod>(
		&self,
		req: &M::Request,
	) -> Result<M::Response, RpcError> {
		self.exchange::<M>(req, Lane::System).await
	}

	/// Retries [`Self::call`] forever on timeout with a fixed backoff.
	/// Other failures propagate.
	pub async fn send<M: ClientMethod>(&self, req: &M::Request) -> Result<M::Response, RpcError> {
		loop {
			match self.call::<M>(req).await {
				Err(RpcError::Timeout) => {
					tracing::debug!(method = M::NAME, "request timed out, retrying");
					tokio::time::sleep(self.inner.retry_interval).await;
				}
				other => return other,
			}
		}
	}

	/// Enqueues a request without registering a resolver. A response that
	/// arrives later matches no pending id and is dropped at debug.
	pub fn send_and_forget<M: ClientMethod>(&self, req: &M::Request) -> Result<(), RpcError> {
		let payload = serde_json::to_value(req).map_err(RpcError::Encode)?;
		let id = self.next_id();
		self.enqueue(Lane::Workflow, Frame::request(id, M::NAME, payload))
	}

	/// Routes one raw inbound frame. Called from the connection read loop.
	pub fn handle_frame(&self, raw: &str) {
		match Frame::decode(raw) {
			Ok(Frame::Response {
				id,
				ok,
				value,
				error,
			}) => self.fulfill(id, ok, value, error),
			Ok(Frame::Request {
				id,
				method,
				payload,
			}) => {
				let rpc = self.clone();
				tokio::spawn(async move {
					rpc.handle_inbound(id, method, payload).await;
				});
			}
			Err(err) => {
				tracing::debug!(?err, "failed to decode inbound frame");
			}
		}
	}

	async fn handle_inbound(&self, id: u64, method: String, payload: serde_json::Value) {
		let result = match ServerCall::parse(&method, payload) {
			Ok(call) => match self.inner.router.get() {
				Some(router) => router.route(call).await,
				None => Err(anyhow::anyhow!("no inbound router bound")),
			},
			Err(err) => Err(err.into()),
		};

		let frame = match result {
			Ok(ack) => Frame::ok_response(id, serde_json::Value::Bool(ack)),
			Err(err) => {
				tracing::debug!(%method, ?err, "inbound handler failed");
				Frame::err_response(id, WireError::new("HandlerError", err.to_string()))
			}
		};
		if let Err(err) = self.enqueue(Lane::System, frame) {
			tracing::debug!(?err, %method, "failed to enqueue response frame");
		}
	}

	fn fulfill(
		&self,
		id: u64,
		ok: bool,
		value: Option<serde_json::Value>,
		error: Option<WireError>,
	) {
		let resolver = self
			.inner
			.pending
			.lock()
			.expect("pending responses lock poisoned")
			.remove(&id);

		match resolver {
			Some(tx) => {
				let result = if ok {
					Ok(value)
				} else {
					Err(error.unwrap_or_else(WireError::unknown))
				};
				let _ = tx.send(result);
			}
			None => {
				// Timed-out or fire-and-forget request.
				tracing::debug!(id, "response for unknown request id");
			}
		}
	}

	async fn exchange<M: ClientMethod>(
		&self,
		req: &M::Request,
		lane: Lane,
	) -> Result<M::Response, RpcError> {
		let payload = serde_json::to_value(req).map_err(RpcError::Encode)?;
		let id = self.next_id();

		let (tx, rx) = oneshot::channel();
		self.inner
			.pending
			.lock()
			.expect("pending responses lock poisoned")
			.insert(id, tx);

		if let Err(err) = self.enqueue(lane, Frame::request(id, M::NAME, payload)) {
			self.remove_pending(id);
			return Err(err);
		}

		match tokio::time::timeout(self.inner.request_timeout, rx).await {
			Ok(Ok(Ok(value))) => {
				serde_json::from_value(value.unwrap_or(serde_json::Value::Null))
					.map_err(RpcError::Schema)
			}
			Ok(Ok(Err(wire))) => Err(RpcError::Remote(wire)),
			Ok(Err(_)) => Err(RpcError::Closed),
			Err(_) => {
				self.remove_pending(id);
				Err(RpcError::Timeout)
			}
		}
	}

	async fn await_ready(&self) -> Result<(), RpcError> {
		let mut ready_rx = self.inner.ready_rx.clone();
		ready_rx
			.wait_for(|ready| *ready)
			.await
			.map_err(|_| RpcError::Closed)?;
		Ok(())
	}

	fn enqueue(&self, lane: Lane, frame: Frame) -> Result<(), RpcError> {
		let sent = match lane {
			Lane::Workflow => self.inner.outbound_tx.send(frame).is_ok(),
			Lane::System => self
				.inner
				.system_tx
				.lock()
				.expect("system lane lock poisoned")
				.send(frame)
				.is_ok(),
		};
		if sent {
			Ok(())
		} else {
			Err(RpcError::Closed)
		}
	}

	fn next_id(&self) -> u64 {
		self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
	}

	fn remove_pending(&self, id: u64) {
		self.inner
			.pending
			.lock()
			.expect("pending responses lock poisoned")
			.remove(&id);
	}
}
