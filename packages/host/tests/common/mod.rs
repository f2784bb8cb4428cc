#![allow(dead_code)]

pub mod orchestrator;

use std::time::Duration;

use orchestrator::ServerSession;
use trigger_host::{HostOptions, Workflow, WorkflowHost};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_env_filter("debug")
		.with_ansi(false)
		.with_test_writer()
		.try_init();
}

/// Options tuned for in-memory tests: short timeouts so retry paths are
/// observable without slowing the suite down.
pub fn test_options() -> HostOptions {
	let mut options = HostOptions::new().api_key("test-api-key");
	options.request_timeout = Some(Duration::from_secs(2));
	options.retry_interval = Some(Duration::from_millis(50));
	options.reconnect_interval = Some(Duration::from_millis(50));
	options.heartbeat_interval = Some(Duration::from_secs(30));
	options
}

/// Boots a host against a fresh in-memory orchestrator and completes the
/// registration handshake. For tests that do not exercise reconnects.
pub async fn launch(workflow: Workflow) -> (WorkflowHost, ServerSession) {
	init_tracing();

	let (transport, mut orch) = orchestrator::memory();
	let host = WorkflowHost::with_transport(workflow, test_options(), transport).unwrap();

	let (registration, session) = tokio::join!(host.listen(), async {
		let mut session = orch.accept().await;
		session.register().await;
		session
	});
	registration.unwrap();

	(host, session)
}

/// Triggers a run and acknowledges its `START_WORKFLOW_RUN`, returning
/// the trigger call's correlation id.
pub async fn start_run(
	session: &mut ServerSession,
	run_id: &str,
	input: serde_json::Value,
) -> u64 {
	let trigger_id = session.call(
		"TRIGGER_WORKFLOW",
		serde_json::json!({
			"id": run_id,
			"trigger": {"input": input},
			"meta": {"attempt": 0, "workflowId": "w1"}
		}),
	);

	let (start_id, start) = session.expect_call("START_WORKFLOW_RUN").await;
	assert_eq!(start["runId"], run_id);
	session.ack(start_id);

	trigger_id
}
