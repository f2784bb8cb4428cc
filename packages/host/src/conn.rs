//! Reconnecting host connection.
//!
//! Owns the dial/reconnect loop and the per-connection frame pump. The
//! same session id is presented on every dial so the orchestrator can
//! resume session state. User-initiated closure suppresses reconnection;
//! involuntary closure retries forever with a fixed backoff.
//!
//! Invariant: after every (re)connect the registration handshake runs on
//! the system lane before the workflow lane is released.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use trigger_host_protocol::Frame;

use crate::channel::{ChannelEvent, ConnectAuth, FrameChannel, FrameTransport};
use crate::error::HostError;
use crate::registration::Registrar;
use crate::rpc::RpcClient;

const CLOSE_CODE_ABNORMAL: u16 = 1006;

// `watch::Receiver::wait_for` yields a `Ref` guard that is not `Send`; even
// though callers immediately discard it, its presence in the branch output
// type makes the enclosing `tokio::select!` future non-`Send`. This waits
// for the same condition without ever holding the guard across an `.await`.
async fn wait_until_true(rx: &mut watch::Receiver<bool>) -> Result<(), watch::error::RecvError> {
	loop {
		if *rx.borrow() {
			return Ok(());
		}
		rx.changed().await?;
	}
}

#[derive(Debug)]
enum PumpExit {
	UserClosed,
	Lost { code: u16, reason: String },
}

pub(crate) struct Connection {
	pub endpoint: url::Url,
	pub auth: ConnectAuth,
	pub transport: Arc<dyn FrameTransport>,
	pub rpc: RpcClient,
	pub registrar: Arc<Registrar>,
	pub ready_tx: watch::Sender<bool>,
	pub shutdown_tx: watch::Sender<bool>,
	pub reconnect_interval: std::time::Duration,
	pub heartbeat_interval: std::time::Duration,
}

impl Connection {
	pub fn shutdown(&self) {
		// send_replace updates the value even with no live receivers, so
		// a close() issued before listen() still sticks.
		self.shutdown_tx.send_replace(true);
	}

	pub async fn run(self: Arc<Self>, mut outbound_rx: mpsc::UnboundedReceiver<Frame>) {
		let mut shutdown_rx = self.shutdown_tx.subscribe();

		loop {
			if *shutdown_rx.borrow() {
				break;
			}

			let channel = match self.transport.connect(&self.endpoint, &self.auth).await {
				Ok(channel) => channel,
				Err(err) => {
					tracing::warn!(?err, "failed to connect to orchestrator, retrying");
					if self.sleep_or_shutdown(&mut shutdown_rx).await {
						break;
					}
					continue;
				}
			};
			tracing::info!(session_id = %self.auth.session_id, "connected to orchestrator");

			// Fresh system lane per connection; stale frames from a dead
			// dial must not leak onto the new channel.
			let (system_tx, system_rx) = mpsc::unbounded_channel();
			self.rpc.bind_system_sender(system_tx);

			// Lets the registration task tear this connection down when
			// the handshake fails at the transport level.
			let (abort_tx, abort_rx) = watch::channel(false);

			let registration = tokio::spawn({
				let conn = self.clone();
				async move {
					match conn.registrar.register().await {
						Ok(_) => {
							let _ = conn.ready_tx.send(true);
						}
						// An explicit rejection is final: close instead
						// of reconnecting.
						Err(HostError::RegistrationRejected(message)) => {
							tracing::error!(%message, "registration rejected, closing host");
							conn.shutdown();
						}
						// Anything else leaves this connection unusable
						// (the workflow lane never opens). Drop it and
						// redial so the handshake can be retried.
						Err(err) => {
							tracing::warn!(?err, "registration failed, redialing");
							abort_tx.send_replace(true);
						}
					}
				}
			});

			let exit = self
				.pump(channel, &mut outbound_rx, system_rx, &mut shutdown_rx, abort_rx)
				.await;
			registration.abort();
			let _ = self.ready_tx.send(false);

			match exit {
				PumpExit::UserClosed => break,
				PumpExit::Lost { code, reason } => {
					tracing::warn!(code, %reason, "connection lost, reconnecting");
					if self.sleep_or_shutdown(&mut shutdown_rx).await {
						break;
					}
				}
			}
		}

		self.registrar.notify_closed();
		tracing::debug!("connection loop exited");
	}

	async fn pump(
		&self,
		mut channel: Box<dyn FrameChannel>,
		outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
		mut system_rx: mpsc::UnboundedReceiver<Frame>,
		shutdown_rx: &mut watch::Receiver<bool>,
		mut abort_rx: watch::Receiver<bool>,
	) -> PumpExit {
		let mut ready_rx = self.ready_tx.subscribe();
		let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
		heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			let ready = *ready_rx.borrow_and_update();

			tokio::select! {
				biased;

				_ = wait_until_true(shutdown_rx) => {
					tracing::info!("closing connection");
					channel.close().await;
					return PumpExit::UserClosed;
				}

				_ = wait_until_true(&mut abort_rx) => {
					channel.close().await;
					return PumpExit::Lost {
						code: CLOSE_CODE_ABNORMAL,
						reason: "handshake failed".into(),
					};
				}

				Some(frame) = system_rx.recv() => {
					if let Err(exit) = self.write(channel.as_mut(), frame).await {
						return exit;
					}
				}

				// Held back until registration completes on this channel.
				Some(frame) = outbound_rx.recv(), if ready => {
					if let Err(exit) = self.write(channel.as_mut(), frame).await {
						return exit;
					}
				}

				_ = ready_rx.changed() => {}

				_ = heartbeat.tick() => {
					if let Err(err) = channel.ping().await {
						tracing::debug!(?err, "heartbeat failed");
						return PumpExit::Lost {
							code: CLOSE_CODE_ABNORMAL,
							reason: "heartbeat failed".into(),
						};
					}
				}

				event = channel.recv() => match event {
					Some(ChannelEvent::Message(raw)) => self.rpc.handle_frame(&raw),
					Some(ChannelEvent::Close { code, reason }) => {
						return PumpExit::Lost { code, reason };
					}
					None => {
						return PumpExit::Lost {
							code: CLOSE_CODE_ABNORMAL,
							reason: "stream ended".into(),
						};
					}
				}
			}
		}
	}

	async fn write(&self, channel: &mut dyn FrameChannel, frame: Frame) -> Result<(), PumpExit> {
		let raw = match frame.encode() {
			Ok(raw) => raw,
			Err(err) => {
				tracing::error!(?err, "failed to encode outbound frame, dropping");
				return Ok(());
			}
		};

		channel.send(raw).await.map_err(|err| {
			tracing::debug!(?err, "failed to send frame");
			PumpExit::Lost {
				code: CLOSE_CODE_ABNORMAL,
				reason: "send failed".into(),
			}
		})
	}

	/// Fixed-backoff sleep, interruptible by shutdown. Returns true when
	/// the host was closed while waiting.
	async fn sleep_or_shutdown(&self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
		tokio::select! {
			_ = tokio::time::sleep(self.reconnect_interval) => false,
			_ = wait_until_true(shutdown_rx) => true,
		}
	}
}
