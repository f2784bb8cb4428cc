//! Correlation tables for suspended journaled calls.
//!
//! One logical table per operation kind, collapsed into a single map
//! tagged by [`OpKind`]. Keys are `(kind, runId, userKey)`; the user key
//! is chosen by workflow code and must be stable across replays.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use trigger_host_protocol::WireError;

use crate::error::ContextError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum OpKind {
	Wait,
	RunOnce,
	Request,
	Fetch,
	KvGet,
	KvSet,
	KvDelete,
}

/// Operation output delivered by a matching `RESOLVE_*` call.
#[derive(Debug, Clone)]
pub(crate) enum OpOutput {
	Unit,
	RunOnce {
		idempotency_key: String,
		has_run: bool,
		output: Option<serde_json::Value>,
	},
	Fetch {
		status: u16,
		ok: bool,
		headers: HashMap<String, String>,
		body: Option<serde_json::Value>,
	},
	Value(Option<serde_json::Value>),
}

type Resolver = oneshot::Sender<Result<OpOutput, WireError>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PendingKey {
	kind: OpKind,
	run_id: String,
	user_key: String,
}

#[derive(Default)]
pub(crate) struct PendingCalls {
	inner: Mutex<HashMap<PendingKey, Resolver>>,
}

impl PendingCalls {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts the resolver backing a suspended call. At most one entry
	/// may exist per `(kind, runId, userKey)` at any moment.
	pub fn register(
		&self,
		kind: OpKind,
		run_id: &str,
		user_key: &str,
	) -> Result<oneshot::Receiver<Result<OpOutput, WireError>>, ContextError> {
		let key = PendingKey {
			kind,
			run_id: run_id.to_string(),
			user_key: user_key.to_string(),
		};

		let mut inner = self.inner.lock().expect("pending calls lock poisoned");
		if inner.contains_key(&key) {
			return Err(ContextError::DuplicateKey(user_key.to_string()));
		}

		let (tx, rx) = oneshot::channel();
		inner.insert(key, tx);
		Ok(rx)
	}

	/// Removes an entry without fulfilling it (the intent RPC failed and
	/// the call will not suspend).
	pub fn discard(&self, kind: OpKind, run_id: &str, user_key: &str) {
		let key = PendingKey {
			kind,
			run_id: run_id.to_string(),
			user_key: user_key.to_string(),
		};
		self.inner
			.lock()
			.expect("pending calls lock poisoned")
			.remove(&key);
	}

	pub fn resolve(&self, kind: OpKind, run_id: &str, user_key: &str, output: OpOutput) {
		self.fulfill(kind, run_id, user_key, Ok(output));
	}

	pub fn reject(&self, kind: OpKind, run_id: &str, user_key: &str, error: WireError) {
		self.fulfill(kind, run_id, user_key, Err(error));
	}

	/// Rejects any still-pending entries for a finished run.
	pub fn clear(&self, run_id: &str) {
		let mut inner = self.inner.lock().expect("pending calls lock poisoned");
		let before = inner.len();
		inner.retain(|key, _| key.run_id != run_id);

		let cleared = before - inner.len();
		if cleared > 0 {
			tracing::debug!(%run_id, cleared, "cleared pending calls for finished run");
		}
	}

	fn fulfill(
		&self,
		kind: OpKind,
		run_id: &str,
		user_key: &str,
		result: Result<OpOutput, WireError>,
	) {
		let key = PendingKey {
			kind,
			run_id: run_id.to_string(),
			user_key: user_key.to_string(),
		};

		let resolver = self
			.inner
			.lock()
			.expect("pending calls lock poisoned")
			.remove(&key);

		match resolver {
			Some(tx) => {
				let _ = tx.send(result);
			}
			None => {
				// Resumption tolerance: the server may re-deliver
				// resolutions the restarted host has not journaled yet.
				tracing::debug!(
					?kind,
					%run_id,
					%user_key,
					"resolution for unknown pending call, ignoring"
				);
			}
		}
	}
}
