//! Per-run execution context handed to workflow code.
//!
//! Every operation follows the journaled-intent pattern: allocate an
//! entry in the pending-call registry under `(runId, userKey)`, send the
//! intent RPC, then suspend until the orchestrator's matching
//! `RESOLVE_*`/`REJECT_*` call fulfills it. User keys must be stable
//! across replays; they are how a resumed run reattaches to its journal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use trigger_host_protocol::{
	ClientMethod, CompleteRunOnce, CompleteRunOnceRequest, EventEnvelope, FetchRetryOptions,
	InitializeDelay, InitializeDelayRequest, InitializeRunOnce, InitializeRunOnceRequest,
	KvDeleteRequest, KvGetRequest, KvSetRequest, LogLevel, RunMeta, RunOnceType, SendEvent,
	SendEventRequest, SendFetch, SendKvDelete, SendKvGet, SendKvSet, SendLog, SendLogRequest,
	SendRequest, WaitSpec,
};

use crate::error::ContextError;
use crate::pending::{OpKind, OpOutput, PendingCalls};
use crate::rpc::RpcClient;
use crate::util::monotonic_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
	Ready,
	Validating,
	Running,
	Completed,
	Errored,
}

/// Shared per-run state behind both the user-facing context and the
/// ambient bundle. Owned by the run executor; invalid for journaling once
/// the run completes.
pub(crate) struct RunHandle {
	run_id: String,
	meta: RunMeta,
	rpc: RpcClient,
	pending: Arc<PendingCalls>,
	state: Mutex<RunState>,
	log_level: LogLevel,
}

impl RunHandle {
	pub fn new(
		run_id: String,
		meta: RunMeta,
		rpc: RpcClient,
		pending: Arc<PendingCalls>,
		log_level: LogLevel,
	) -> Self {
		Self {
			run_id,
			meta,
			rpc,
			pending,
			state: Mutex::new(RunState::Ready),
			log_level,
		}
	}

	pub fn run_id(&self) -> &str {
		&self.run_id
	}

	pub fn workflow_id(&self) -> &str {
		&self.meta.workflow_id
	}

	pub fn app_origin(&self) -> Option<&str> {
		self.meta.app_origin.as_deref()
	}

	pub fn api_key(&self) -> Option<&str> {
		self.meta.api_key.as_deref()
	}

	pub fn meta(&self) -> &RunMeta {
		&self.meta
	}

	pub fn set_state(&self, next: RunState) {
		let mut state = self.state.lock().expect("run state lock poisoned");
		tracing::debug!(run_id = %self.run_id, from = ?*state, to = ?next, "run state transition");
		*state = next;
	}

	fn ensure_active(&self) -> Result<(), ContextError> {
		match *self.state.lock().expect("run state lock poisoned") {
			RunState::Completed | RunState::Errored => Err(ContextError::RunCompleted),
			_ => Ok(()),
		}
	}

	/// Journaled-intent core: register, send, suspend.
	async fn journal<M: ClientMethod>(
		&self,
		kind: OpKind,
		key: &str,
		req: &M::Request,
	) -> Result<OpOutput, ContextError> {
		self.ensure_active()?;

		let rx = self.pending.register(kind, &self.run_id, key)?;

		if let Err(err) = self.rpc.send::<M>(req).await {
			self.pending.discard(kind, &self.run_id, key);
			return Err(err.into());
		}

		match rx.await {
			Ok(Ok(output)) => Ok(output),
			Ok(Err(wire)) => Err(ContextError::Rejected(wire)),
			Err(_) => Err(ContextError::TornDown),
		}
	}

	pub async fn wait(&self, key: &str, wait: WaitSpec) -> Result<(), ContextError> {
		let req = InitializeDelayRequest {
			run_id: self.run_id.clone(),
			key: key.to_string(),
			wait,
			timestamp: monotonic_timestamp(),
		};
		self.journal::<InitializeDelay>(OpKind::Wait, key, &req)
			.await?;
		Ok(())
	}

	pub async fn fetch(
		&self,
		key: &str,
		url: &str,
		options: FetchOptions,
	) -> Result<FetchOutput, ContextError> {
		let req = trigger_host_protocol::FetchRequest {
			run_id: self.run_id.clone(),
			key: key.to_string(),
			url: url.to_string(),
			method: options.method.unwrap_or_else(|| "GET".to_string()),
			headers: options.headers,
			body: options.body,
			retry: options.retry,
			timestamp: monotonic_timestamp(),
		};

		match self.journal::<SendFetch>(OpKind::Fetch, key, &req).await? {
			OpOutput::Fetch {
				status,
				ok,
				headers,
				body,
			} => Ok(FetchOutput {
				status,
				ok,
				headers,
				body,
			}),
			output => {
				tracing::error!(?output, "unexpected output kind for fetch");
				Err(ContextError::TornDown)
			}
		}
	}

	pub async fn run_once_init(
		&self,
		key: &str,
		run_once_type: RunOnceType,
	) -> Result<(String, bool, Option<serde_json::Value>), ContextError> {
		let req = InitializeRunOnceRequest {
			run_id: self.run_id.clone(),
			key: key.to_string(),
			run_once_type,
			timestamp: monotonic_timestamp(),
		};

		match self
			.journal::<InitializeRunOnce>(OpKind::RunOnce, key, &req)
			.await?
		{
			OpOutput::RunOnce {
				idempotency_key,
				has_run,
				output,
			} => Ok((idempotency_key, has_run, output)),
			output => {
				tracing::error!(?output, "unexpected output kind for run once");
				Err(ContextError::TornDown)
			}
		}
	}

	pub async fn run_once_complete(
		&self,
		key: &str,
		idempotency_key: &str,
		output: Option<String>,
	) -> Result<(), ContextError> {
		let req = CompleteRunOnceRequest {
			run_id: self.run_id.clone(),
			key: key.to_string(),
			idempotency_key: idempotency_key.to_string(),
			output,
			timestamp: monotonic_timestamp(),
		};
		self.rpc.send::<CompleteRunOnce>(&req).await?;
		Ok(())
	}

	pub async fn perform_request(
		&self,
		key: &str,
		options: RequestOptions,
	) -> Result<Option<serde_json::Value>, ContextError> {
		let req = trigger_host_protocol::PerformRequestRequest {
			run_id: self.run_id.clone(),
			key: key.to_string(),
			service: options.service,
			endpoint: options.endpoint,
			params: options.params,
			version: options.version,
			timestamp: monotonic_timestamp(),
		};

		match self
			.journal::<SendRequest>(OpKind::Request, key, &req)
			.await?
		{
			OpOutput::Value(value) => Ok(value),
			output => {
				tracing::error!(?output, "unexpected output kind for request");
				Err(ContextError::TornDown)
			}
		}
	}

	pub fn send_event(&self, event: NewEvent) -> Result<(), ContextError> {
		self.ensure_active()?;

		let req = SendEventRequest {
			run_id: Some(self.run_id.clone()),
			event: EventEnvelope {
				id: event.id,
				name: event.name,
				payload: event.payload,
				timestamp: None,
			},
			timestamp: monotonic_timestamp(),
		};
		self.rpc.send_and_forget::<SendEvent>(&req)?;
		Ok(())
	}

	pub fn log(&self, level: LogLevel, message: &str, properties: Option<serde_json::Value>) {
		match level {
			LogLevel::Debug => tracing::debug!(run_id = %self.run_id, "{message}"),
			LogLevel::Info => tracing::info!(run_id = %self.run_id, "{message}"),
			LogLevel::Warn => tracing::warn!(run_id = %self.run_id, "{message}"),
			LogLevel::Error => tracing::error!(run_id = %self.run_id, "{message}"),
		}

		if level < self.log_level {
			return;
		}

		let req = SendLogRequest {
			run_id: self.run_id.clone(),
			level,
			message: message.to_string(),
			properties,
			timestamp: monotonic_timestamp(),
		};
		if let Err(err) = self.rpc.send_and_forget::<SendLog>(&req) {
			tracing::debug!(?err, "failed to enqueue log");
		}
	}

	pub async fn kv_get(
		&self,
		namespace: &str,
		idempotency_key: &str,
		kv_key: &str,
	) -> Result<Option<serde_json::Value>, ContextError> {
		let req = KvGetRequest {
			run_id: self.run_id.clone(),
			key: idempotency_key.to_string(),
			namespace: namespace.to_string(),
			kv_key: kv_key.to_string(),
			timestamp: monotonic_timestamp(),
		};

		match self
			.journal::<SendKvGet>(OpKind::KvGet, idempotency_key, &req)
			.await?
		{
			OpOutput::Value(value) => Ok(value),
			output => {
				tracing::error!(?output, "unexpected output kind for kv get");
				Err(ContextError::TornDown)
			}
		}
	}

	pub async fn kv_set(
		&self,
		namespace: &str,
		idempotency_key: &str,
		kv_key: &str,
		value: serde_json::Value,
	) -> Result<(), ContextError> {
		let req = KvSetRequest {
			run_id: self.run_id.clone(),
			key: idempotency_key.to_string(),
			namespace: namespace.to_string(),
			kv_key: kv_key.to_string(),
			value,
			timestamp: monotonic_timestamp(),
		};
		self.journal::<SendKvSet>(OpKind::KvSet, idempotency_key, &req)
			.await?;
		Ok(())
	}

	pub async fn kv_delete(
		&self,
		namespace: &str,
		idempotency_key: &str,
		kv_key: &str,
	) -> Result<(), ContextError> {
		let req = KvDeleteRequest {
			run_id: self.run_id.clone(),
			key: idempotency_key.to_string(),
			namespace: namespace.to_string(),
			kv_key: kv_key.to_string(),
			timestamp: monotonic_timestamp(),
		};
		self.journal::<SendKvDelete>(OpKind::KvDelete, idempotency_key, &req)
			.await?;
		Ok(())
	}
}

/// Relative delay for `wait_for`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitDuration {
	pub seconds: Option<u64>,
	pub minutes: Option<u64>,
	pub hours: Option<u64>,
	pub days: Option<u64>,
}

impl WaitDuration {
	pub fn seconds(seconds: u64) -> Self {
		Self {
			seconds: Some(seconds),
			..Default::default()
		}
	}

	pub fn minutes(minutes: u64) -> Self {
		Self {
			minutes: Some(minutes),
			..Default::default()
		}
	}

	pub fn hours(hours: u64) -> Self {
		Self {
			hours: Some(hours),
			..Default::default()
		}
	}

	pub fn days(days: u64) -> Self {
		Self {
			days: Some(days),
			..Default::default()
		}
	}
}

impl From<WaitDuration> for WaitSpec {
	fn from(duration: WaitDuration) -> Self {
		WaitSpec::Delay {
			seconds: duration.seconds,
			minutes: duration.minutes,
			hours: duration.hours,
			days: duration.days,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
	pub method: Option<String>,
	pub headers: Option<HashMap<String, String>>,
	pub body: Option<serde_json::Value>,
	pub retry: Option<FetchRetryOptions>,
}

#[derive(Debug, Clone)]
pub struct FetchOutput<B = serde_json::Value> {
	pub status: u16,
	pub ok: bool,
	pub headers: HashMap<String, String>,
	pub body: Option<B>,
}

impl FetchOutput {
	/// Applies a response schema: the body must conform or the call is
	/// treated as failed.
	pub fn parse_body<T: DeserializeOwned>(self) -> Result<FetchOutput<T>, ContextError> {
		let body = match self.body {
			Some(value) => Some(serde_json::from_value(value).map_err(ContextError::Schema)?),
			None => None,
		};
		Ok(FetchOutput {
			status: self.status,
			ok: self.ok,
			headers: self.headers,
			body,
		})
	}
}

#[derive(Debug, Clone)]
pub struct RequestOptions {
	pub service: String,
	pub endpoint: String,
	pub params: serde_json::Value,
	pub version: Option<String>,
}

/// Custom event for `send_event`. Payloads are round-tripped through
/// JSON, so only serializable content survives.
#[derive(Debug, Clone)]
pub struct NewEvent {
	pub id: Option<String>,
	pub name: String,
	pub payload: serde_json::Value,
}

impl NewEvent {
	pub fn new<P: Serialize>(name: impl Into<String>, payload: &P) -> Result<Self, ContextError> {
		Ok(Self {
			id: None,
			name: name.into(),
			payload: serde_json::to_value(payload).map_err(ContextError::Schema)?,
		})
	}
}

/// The context handed to the workflow function for one run.
pub struct RunContext {
	handle: Arc<RunHandle>,
	kv: KvStore,
	global_kv: KvStore,
	run_kv: KvStore,
	logger: RunLogger,
}

impl RunContext {
	pub(crate) fn new(handle: Arc<RunHandle>) -> Self {
		let kv = KvStore {
			handle: handle.clone(),
			namespace: format!("workflow:{}", handle.workflow_id()),
		};
		let global_kv = KvStore {
			handle: handle.clone(),
			namespace: format!(
				"org:{}",
				handle.meta().organization_id.as_deref().unwrap_or_default()
			),
		};
		let run_kv = KvStore {
			handle: handle.clone(),
			namespace: format!("run:{}", handle.run_id()),
		};
		let logger = RunLogger {
			handle: handle.clone(),
		};

		Self {
			handle,
			kv,
			global_kv,
			run_kv,
			logger,
		}
	}

	pub fn id(&self) -> &str {
		self.handle.run_id()
	}

	pub fn workflow_id(&self) -> &str {
		self.handle.workflow_id()
	}

	pub fn environment(&self) -> Option<&str> {
		self.handle.meta().environment.as_deref()
	}

	/// Run-scoped api key delivered with the trigger.
	pub fn api_key(&self) -> Option<&str> {
		self.handle.api_key()
	}

	pub fn organization_id(&self) -> Option<&str> {
		self.handle.meta().organization_id.as_deref()
	}

	pub fn app_origin(&self) -> Option<&str> {
		self.handle.app_origin()
	}

	pub fn is_test(&self) -> bool {
		self.handle.meta().is_test
	}

	pub fn attempt(&self) -> u32 {
		self.handle.meta().attempt
	}

	/// Key/value store scoped to the workflow.
	pub fn kv(&self) -> &KvStore {
		&self.kv
	}

	/// Key/value store scoped to the organization.
	pub fn global_kv(&self) -> &KvStore {
		&self.global_kv
	}

	/// Key/value store scoped to this run.
	pub fn run_kv(&self) -> &KvStore {
		&self.run_kv
	}

	pub fn logger(&self) -> &RunLogger {
		&self.logger
	}

	/// Journaled HTTP fetch executed by the orchestrator.
	pub async fn fetch(
		&self,
		key: &str,
		url: &str,
		options: FetchOptions,
	) -> Result<FetchOutput, ContextError> {
		self.handle.fetch(key, url, options).await
	}

	/// Journaled fetch with a response schema applied to the body.
	pub async fn fetch_json<T: DeserializeOwned>(
		&self,
		key: &str,
		url: &str,
		options: FetchOptions,
	) -> Result<FetchOutput<T>, ContextError> {
		self.handle.fetch(key, url, options).await?.parse_body()
	}

	/// Suspends the run for a relative duration.
	pub async fn wait_for(&self, key: &str, duration: WaitDuration) -> Result<(), ContextError> {
		self.handle.wait(key, duration.into()).await
	}

	/// Suspends the run until an absolute point in time.
	pub async fn wait_until(
		&self,
		key: &str,
		date: DateTime<Utc>,
	) -> Result<(), ContextError> {
		self.handle
			.wait(
				key,
				WaitSpec::ScheduleFor {
					scheduled_for: date.to_rfc3339_opts(SecondsFormat::Millis, true),
				},
			)
			.await
	}

	/// Runs `callback` at most once across run attempts. When the server
	/// has the output cached the callback is skipped and the cached value
	/// returned.
	pub async fn run_once<T, F, Fut>(&self, key: &str, callback: F) -> anyhow::Result<T>
	where
		T: Serialize + DeserializeOwned,
		F: FnOnce(String) -> Fut,
		Fut: std::future::Future<Output = anyhow::Result<T>>,
	{
		let (idempotency_key, has_run, output) =
			self.handle.run_once_init(key, RunOnceType::Remote).await?;

		if has_run {
			let value = output.unwrap_or(serde_json::Value::Null);
			return serde_json::from_value(value).map_err(|err| ContextError::Schema(err).into());
		}

		let result = callback(idempotency_key.clone()).await?;

		let output = match serde_json::to_value(&result).map_err(ContextError::Schema)? {
			serde_json::Value::Null => None,
			value => Some(value.to_string()),
		};
		self.handle
			.run_once_complete(key, &idempotency_key, output)
			.await?;

		Ok(result)
	}

	/// Like [`Self::run_once`] but the server only hands out the
	/// idempotency key; the callback always runs and its output is not
	/// cached.
	pub async fn run_once_local_only<T, F, Fut>(&self, key: &str, callback: F) -> anyhow::Result<T>
	where
		F: FnOnce(String) -> Fut,
		Fut: std::future::Future<Output = anyhow::Result<T>>,
	{
		let (idempotency_key, _has_run, _output) = self
			.handle
			.run_once_init(key, RunOnceType::LocalOnly)
			.await?;

		let result = callback(idempotency_key.clone()).await?;

		self.handle
			.run_once_complete(key, &idempotency_key, None)
			.await?;

		Ok(result)
	}

	/// Emits a custom event. Fire-and-forget.
	pub fn send_event(&self, event: NewEvent) -> Result<(), ContextError> {
		self.handle.send_event(event)
	}

	/// Journaled request against a named integration service.
	pub async fn perform_request(
		&self,
		key: &str,
		options: RequestOptions,
	) -> Result<Option<serde_json::Value>, ContextError> {
		self.handle.perform_request(key, options).await
	}

	/// Like [`Self::perform_request`] with a response schema applied.
	pub async fn perform_request_as<T: DeserializeOwned>(
		&self,
		key: &str,
		options: RequestOptions,
	) -> Result<Option<T>, ContextError> {
		match self.handle.perform_request(key, options).await? {
			Some(value) => Ok(Some(
				serde_json::from_value(value).map_err(ContextError::Schema)?,
			)),
			None => Ok(None),
		}
	}

	pub(crate) fn handle(&self) -> &Arc<RunHandle> {
		&self.handle
	}
}

/// Namespaced journaled key/value access.
pub struct KvStore {
	handle: Arc<RunHandle>,
	namespace: String,
}

impl KvStore {
	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	pub async fn get<T: DeserializeOwned>(
		&self,
		idempotency_key: &str,
		key: &str,
	) -> Result<Option<T>, ContextError> {
		match self
			.handle
			.kv_get(&self.namespace, idempotency_key, key)
			.await?
		{
			Some(value) => Ok(Some(
				serde_json::from_value(value).map_err(ContextError::Schema)?,
			)),
			None => Ok(None),
		}
	}

	pub async fn set<T: Serialize>(
		&self,
		idempotency_key: &str,
		key: &str,
		value: &T,
	) -> Result<(), ContextError> {
		let value = serde_json::to_value(value).map_err(ContextError::Schema)?;
		self.handle
			.kv_set(&self.namespace, idempotency_key, key, value)
			.await
	}

	pub async fn delete(&self, idempotency_key: &str, key: &str) -> Result<(), ContextError> {
		self.handle
			.kv_delete(&self.namespace, idempotency_key, key)
			.await
	}
}

/// Forwards log lines to the orchestrator and mirrors them locally.
pub struct RunLogger {
	handle: Arc<RunHandle>,
}

impl RunLogger {
	pub fn debug(&self, message: &str, properties: Option<serde_json::Value>) {
		self.handle.log(LogLevel::Debug, message, properties);
	}

	pub fn info(&self, message: &str, properties: Option<serde_json::Value>) {
		self.handle.log(LogLevel::Info, message, properties);
	}

	pub fn warn(&self, message: &str, properties: Option<serde_json::Value>) {
		self.handle.log(LogLevel::Warn, message, properties);
	}

	pub fn error(&self, message: &str, properties: Option<serde_json::Value>) {
		self.handle.log(LogLevel::Error, message, properties);
	}
}
