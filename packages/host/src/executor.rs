//! Run executor: turns `TRIGGER_WORKFLOW` into a run of the user's
//! workflow function and routes every other server originated call into
//! the pending-call registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use trigger_host_protocol::{
	CompleteRunRequest, CompleteWorkflowRun, RegistrationRecord, SendWorkflowError, ServerCall,
	StartRunRequest, StartWorkflowRun, TriggerWorkflowRequest, WireError, WorkflowErrorRequest,
};

use crate::ambient;
use crate::context::{RunContext, RunHandle, RunState};
use crate::error::WorkflowError;
use crate::pending::{OpKind, OpOutput, PendingCalls};
use crate::rpc::{InboundRouter, RpcClient};
use crate::util::monotonic_timestamp;

pub(crate) type RunFuture = Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send>>;
pub(crate) type PreparedRun = Box<dyn FnOnce(RunContext) -> RunFuture + Send>;

/// Type-erased workflow definition. The factory validates the raw event
/// input against the workflow's event type and yields the run closure;
/// a factory error is an event validation failure.
pub(crate) struct WorkflowDef {
	pub id: String,
	pub name: String,
	pub trigger: serde_json::Value,
	pub run_factory:
		Box<dyn Fn(serde_json::Value) -> Result<PreparedRun, serde_json::Error> + Send + Sync>,
}

impl WorkflowDef {
	pub fn new<E, O, F, Fut>(
		id: impl Into<String>,
		name: impl Into<String>,
		trigger: serde_json::Value,
		run: F,
	) -> Self
	where
		E: DeserializeOwned + Send + 'static,
		O: Serialize + Send + 'static,
		F: Fn(E, RunContext) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
	{
		let run = Arc::new(run);
		let run_factory = Box::new(move |input: serde_json::Value| {
			let event: E = serde_json::from_value(input)?;
			let run = run.clone();
			let prepared: PreparedRun = Box::new(move |ctx: RunContext| {
				Box::pin(async move {
					let output = run(event, ctx).await?;
					let value = serde_json::to_value(&output)?;
					Ok(match value {
						serde_json::Value::Null => None,
						value => Some(value.to_string()),
					})
				}) as RunFuture
			});
			Ok(prepared)
		});

		Self {
			id: id.into(),
			name: name.into(),
			trigger,
			run_factory,
		}
	}
}

pub(crate) struct Executor {
	rpc: RpcClient,
	pending: Arc<PendingCalls>,
	workflow: Arc<WorkflowDef>,
	registration: Arc<Mutex<Option<RegistrationRecord>>>,
	log_level: trigger_host_protocol::LogLevel,
}

impl Executor {
	pub fn new(
		rpc: RpcClient,
		pending: Arc<PendingCalls>,
		workflow: Arc<WorkflowDef>,
		registration: Arc<Mutex<Option<RegistrationRecord>>>,
		log_level: trigger_host_protocol::LogLevel,
	) -> Self {
		Self {
			rpc,
			pending,
			workflow,
			registration,
			log_level,
		}
	}

	async fn handle_trigger(&self, req: TriggerWorkflowRequest) -> anyhow::Result<bool> {
		let run_id = req.id.clone();
		tracing::debug!(
			%run_id,
			workflow_id = %req.meta.workflow_id,
			attempt = req.meta.attempt,
			"workflow run triggered"
		);

		let handle = Arc::new(RunHandle::new(
			run_id.clone(),
			req.meta.clone(),
			self.rpc.clone(),
			self.pending.clone(),
			self.log_level,
		));

		handle.set_state(RunState::Validating);
		let prepared = match (self.workflow.run_factory)(req.trigger.input) {
			Ok(prepared) => prepared,
			Err(err) => {
				handle.set_state(RunState::Errored);
				self.report_error(
					&run_id,
					WireError::new("Event validation error", err.to_string()),
				)
				.await;
				return Ok(true);
			}
		};

		let start = StartRunRequest {
			run_id: run_id.clone(),
			timestamp: monotonic_timestamp(),
		};
		if let Err(err) = self.rpc.send::<StartWorkflowRun>(&start).await {
			handle.set_state(RunState::Errored);
			self.report_error(&run_id, WireError::new("Error", err.to_string()))
				.await;
			self.pending.clear(&run_id);
			return Ok(true);
		}

		if req.meta.attempt == 0 {
			if let Some(record) = self.registration.lock().expect("registration lock").clone() {
				tracing::info!(
					url = %format!("{}/runs/{}", record.url.trim_end_matches('/'), run_id),
					"workflow run started"
				);
			}
		}

		handle.set_state(RunState::Running);
		let ctx = RunContext::new(handle.clone());
		let result = ambient::scope(handle.clone(), (prepared)(ctx)).await;

		match result {
			Ok(output) => {
				handle.set_state(RunState::Completed);
				let complete = CompleteRunRequest {
					run_id: run_id.clone(),
					output,
					timestamp: monotonic_timestamp(),
				};
				if let Err(err) = self.rpc.send::<CompleteWorkflowRun>(&complete).await {
					tracing::error!(%run_id, ?err, "failed to report run completion");
				}
			}
			Err(err) => {
				handle.set_state(RunState::Errored);
				self.report_error(&run_id, normalize_error(&err)).await;
			}
		}

		self.pending.clear(&run_id);
		Ok(true)
	}

	async fn report_error(&self, run_id: &str, error: WireError) {
		let req = WorkflowErrorRequest {
			run_id: run_id.to_string(),
			error,
			timestamp: monotonic_timestamp(),
		};
		if let Err(err) = self.rpc.send::<SendWorkflowError>(&req).await {
			tracing::error!(%run_id, ?err, "failed to report workflow error");
		}
	}
}

#[async_trait]
impl InboundRouter for Executor {
	async fn route(&self, call: ServerCall) -> anyhow::Result<bool> {
		match call {
			ServerCall::TriggerWorkflow(req) => self.handle_trigger(req).await,
			ServerCall::ResolveDelay(res) => {
				self.pending
					.resolve(OpKind::Wait, &res.meta.run_id, &res.key, OpOutput::Unit);
				Ok(true)
			}
			ServerCall::ResolveRunOnce(res) => {
				self.pending.resolve(
					OpKind::RunOnce,
					&res.meta.run_id,
					&res.key,
					OpOutput::RunOnce {
						idempotency_key: res.idempotency_key,
						has_run: res.has_run,
						output: res.output,
					},
				);
				Ok(true)
			}
			ServerCall::ResolveRequest(res) => {
				self.pending.resolve(
					OpKind::Request,
					&res.meta.run_id,
					&res.key,
					OpOutput::Value(res.output),
				);
				Ok(true)
			}
			ServerCall::RejectRequest(rej) => {
				self.pending
					.reject(OpKind::Request, &rej.meta.run_id, &rej.key, rej.error);
				Ok(true)
			}
			ServerCall::ResolveFetchRequest(res) => {
				self.pending.resolve(
					OpKind::Fetch,
					&res.meta.run_id,
					&res.key,
					OpOutput::Fetch {
						status: res.status,
						ok: res.ok,
						headers: res.headers,
						body: res.body,
					},
				);
				Ok(true)
			}
			ServerCall::RejectFetchRequest(rej) => {
				self.pending
					.reject(OpKind::Fetch, &rej.meta.run_id, &rej.key, rej.error);
				Ok(true)
			}
			ServerCall::ResolveKvGet(res) => {
				self.pending.resolve(
					OpKind::KvGet,
					&res.meta.run_id,
					&res.key,
					OpOutput::Value(res.value),
				);
				Ok(true)
			}
			ServerCall::ResolveKvSet(res) => {
				self.pending
					.resolve(OpKind::KvSet, &res.meta.run_id, &res.key, OpOutput::Unit);
				Ok(true)
			}
			ServerCall::ResolveKvDelete(res) => {
				self.pending
					.resolve(OpKind::KvDelete, &res.meta.run_id, &res.key, OpOutput::Unit);
				Ok(true)
			}
		}
	}
}

/// Normalizes whatever the workflow function returned into the wire
/// error shape. A typed [`WorkflowError`] passes through unchanged.
pub(crate) fn normalize_error(err: &anyhow::Error) -> WireError {
	if let Some(workflow_err) = err.downcast_ref::<WorkflowError>() {
		return workflow_err.clone().into();
	}

	// A journaled rejection keeps the orchestrator-supplied error shape.
	if let Some(crate::error::ContextError::Rejected(wire)) =
		err.downcast_ref::<crate::error::ContextError>()
	{
		return wire.clone();
	}

	let message = err.to_string();
	if message.is_empty() {
		return WireError::unknown();
	}

	WireError {
		name: "Error".to_string(),
		message,
		stack_trace: Some(format!("{err:?}")),
	}
}
