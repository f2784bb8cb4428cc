//! Top-level host wiring: workflow definition, construction, listen and
//! close.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use trigger_host_protocol::{Frame, RegistrationRecord};

use crate::channel::{ConnectAuth, FrameTransport};
use crate::config::HostOptions;
use crate::conn::Connection;
use crate::context::RunContext;
use crate::error::HostError;
use crate::executor::{Executor, WorkflowDef};
use crate::pending::PendingCalls;
use crate::registration::{self, Registrar};
use crate::rpc::RpcClient;
use crate::websocket::WebSocketTransport;

/// A workflow definition: identity, trigger metadata and the run
/// function.
pub struct Workflow {
	pub(crate) def: Arc<WorkflowDef>,
}

impl Workflow {
	pub fn builder(id: impl Into<String>, name: impl Into<String>) -> WorkflowBuilder {
		WorkflowBuilder {
			id: id.into(),
			name: name.into(),
			trigger: serde_json::json!({}),
		}
	}
}

pub struct WorkflowBuilder {
	id: String,
	name: String,
	trigger: serde_json::Value,
}

impl WorkflowBuilder {
	/// Trigger descriptor advertised at registration. Opaque to the
	/// host; interpreted by the orchestrator.
	pub fn trigger(mut self, descriptor: serde_json::Value) -> Self {
		self.trigger = descriptor;
		self
	}

	/// Finalizes the workflow with its run function. The event type `E`
	/// doubles as the trigger schema: inputs that fail to deserialize
	/// into it are reported as event validation errors without starting
	/// the run.
	pub fn run<E, O, F, Fut>(self, run: F) -> Workflow
	where
		E: serde::de::DeserializeOwned + Send + 'static,
		O: serde::Serialize + Send + 'static,
		F: Fn(E, RunContext) -> Fut + Send + Sync + 'static,
		Fut: std::future::Future<Output = anyhow::Result<O>> + Send + 'static,
	{
		Workflow {
			def: Arc::new(WorkflowDef::new(self.id, self.name, self.trigger, run)),
		}
	}
}

/// Embeds a workflow in the current process and journals its context
/// operations to the orchestrator.
pub struct WorkflowHost {
	connection: Arc<Connection>,
	record: Arc<Mutex<Option<RegistrationRecord>>>,
	session_id: String,
	outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
	first_result_rx: Mutex<Option<oneshot::Receiver<Result<RegistrationRecord, HostError>>>>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkflowHost {
	pub fn new(workflow: Workflow, options: HostOptions) -> Result<Self, HostError> {
		Self::with_transport(workflow, options, Arc::new(WebSocketTransport))
	}

	/// Like [`Self::new`] with a custom frame transport.
	pub fn with_transport(
		workflow: Workflow,
		options: HostOptions,
		transport: Arc<dyn FrameTransport>,
	) -> Result<Self, HostError> {
		let config = options.resolve()?;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (ready_tx, ready_rx) = watch::channel(false);
		let (shutdown_tx, _) = watch::channel(false);
		let (first_result_tx, first_result_rx) = oneshot::channel();

		let rpc = RpcClient::new(
			outbound_tx,
			ready_rx,
			config.request_timeout,
			config.retry_interval,
		);
		let pending = Arc::new(PendingCalls::new());
		let record = Arc::new(Mutex::new(None));

		let registrar = Arc::new(Registrar::new(
			rpc.clone(),
			registration::build_payload(&config, &workflow.def),
			record.clone(),
			first_result_tx,
			config.retry_interval,
		));

		let executor = Arc::new(Executor::new(
			rpc.clone(),
			pending,
			workflow.def.clone(),
			record.clone(),
			config.log_level,
		));
		rpc.bind_router(executor);

		let connection = Arc::new(Connection {
			endpoint: config.endpoint.clone(),
			auth: ConnectAuth {
				api_key: config.api_key.clone(),
				session_id: config.session_id.clone(),
			},
			transport,
			rpc,
			registrar,
			ready_tx,
			shutdown_tx,
			reconnect_interval: config.reconnect_interval,
			heartbeat_interval: config.heartbeat_interval,
		});

		Ok(Self {
			connection,
			record,
			session_id: config.session_id,
			outbound_rx: Mutex::new(Some(outbound_rx)),
			first_result_rx: Mutex::new(Some(first_result_rx)),
			task: Mutex::new(None),
		})
	}

	/// Connects, registers the workflow and resolves once registration
	/// completes. The connection keeps running in the background until
	/// [`Self::close`].
	pub async fn listen(&self) -> Result<RegistrationRecord, HostError> {
		let outbound_rx = self
			.outbound_rx
			.lock()
			.expect("host lock poisoned")
			.take();
		if let Some(outbound_rx) = outbound_rx {
			let task = tokio::spawn(self.connection.clone().run(outbound_rx));
			*self.task.lock().expect("host lock poisoned") = Some(task);
		}

		let first_result_rx = self
			.first_result_rx
			.lock()
			.expect("host lock poisoned")
			.take();
		match first_result_rx {
			Some(rx) => rx.await.map_err(|_| HostError::Closed)?,
			// Subsequent listen calls report the current registration.
			None => self.registration().ok_or(HostError::Closed),
		}
	}

	/// Tears the connection down and suppresses reconnection.
	pub async fn close(&self) {
		self.connection.shutdown();
		let task = self.task.lock().expect("host lock poisoned").take();
		if let Some(task) = task {
			let _ = task.await;
		}
	}

	pub fn registration(&self) -> Option<RegistrationRecord> {
		self.record.lock().expect("host lock poisoned").clone()
	}

	pub fn session_id(&self) -> &str {
		&self.session_id
	}
}
