//! Client-side workflow host.
//!
//! Embeds a user workflow function in an ordinary process while the
//! orchestrator owns all durable state: event queues, run history, delay
//! timers, idempotency records, key/value data and fetch caches. Context
//! operations (`fetch`, `wait_for`, `run_once`, `kv`, ...) are not
//! executed locally; each is journaled to the orchestrator over a
//! persistent bidirectional connection and the calling task suspends
//! until the matching resolution arrives.
//!
//! ```ignore
//! use trigger_host::{HostOptions, Workflow, WorkflowHost};
//!
//! let workflow = Workflow::builder("order-sync", "Order sync")
//! 	.trigger(serde_json::json!({"type": "event", "name": "order.created"}))
//! 	.run(|event: OrderCreated, ctx| async move {
//! 		ctx.wait_for("cooldown", WaitDuration::seconds(5)).await?;
//! 		let charge = ctx
//! 			.run_once("charge", |idempotency_key| charge(event, idempotency_key))
//! 			.await?;
//! 		Ok(charge)
//! 	});
//!
//! let host = WorkflowHost::new(workflow, HostOptions::new().api_key("tr_..."))?;
//! host.listen().await?;
//! ```

pub mod ambient;
mod channel;
mod config;
mod conn;
mod context;
mod error;
mod executor;
mod host;
mod pending;
mod registration;
mod rpc;
mod util;
mod websocket;

pub use channel::{ChannelEvent, ConnectAuth, FrameChannel, FrameTransport};
pub use config::{HostOptions, DEFAULT_ENDPOINT};
pub use context::{
	FetchOptions, FetchOutput, KvStore, NewEvent, RequestOptions, RunContext, RunLogger,
	WaitDuration,
};
pub use error::{ContextError, HostError, RpcError, WorkflowError};
pub use host::{Workflow, WorkflowBuilder, WorkflowHost};
pub use websocket::WebSocketTransport;

pub use trigger_host_protocol as protocol;
