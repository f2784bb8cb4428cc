mod common;

use std::time::Duration;

use common::orchestrator;
use trigger_host::protocol::WireError;
use trigger_host::{HostError, Workflow, WorkflowHost};

fn idle_workflow() -> Workflow {
	Workflow::builder("w1", "Order sync")
		.trigger(serde_json::json!({"type": "event", "name": "order.created"}))
		.run(|_event: serde_json::Value, _ctx| async move { Ok(()) })
}

#[tokio::test]
async fn handshake_advertises_workflow_identity_and_package() {
	common::init_tracing();

	let (transport, mut orch) = orchestrator::memory();
	let host =
		WorkflowHost::with_transport(idle_workflow(), common::test_options(), transport).unwrap();

	let (registration, payload) = tokio::join!(host.listen(), async {
		let mut session = orch.accept().await;
		session.register().await
	});
	eprintln!("DEBUG join done");
	registration.unwrap();
	eprintln!("DEBUG registration unwrapped");

	assert_eq!(payload["apiKey"], "test-api-key");
	assert_eq!(payload["workflowId"], "w1");
	assert_eq!(payload["workflowName"], "Order sync");
	assert_eq!(
		payload["trigger"],
		serde_json::json!({"type": "event", "name": "order.created"})
	);
	assert_eq!(payload["packageName"], "trigger-host");
	assert_ne!(payload["packageVersion"], "");
	assert!(payload["metadata"]["env"].is_object());

	host.close().await;
}

#[tokio::test]
async fn registration_rejection_aborts_listen() {
	common::init_tracing();

	let (transport, mut orch) = orchestrator::memory();
	let host =
		WorkflowHost::with_transport(idle_workflow(), common::test_options(), transport).unwrap();

	let (result, _) = tokio::join!(host.listen(), async {
		let mut session = orch.accept().await;
		let (id, _) = session.expect_call("INITIALIZE_HOST_V2").await;
		session.respond_ok(
			id,
			serde_json::json!({"type": "error", "message": "invalid api key"}),
		);
		session
	});

	match result {
		Err(HostError::RegistrationRejected(message)) => {
			assert_eq!(message, "invalid api key");
		}
		result => panic!("expected rejection, got {result:?}"),
	}

	// A rejected handshake closes the host instead of reconnecting.
	tokio::time::sleep(Duration::from_millis(150)).await;
	assert!(orch.try_accept().is_none());
}

#[tokio::test]
async fn transport_level_handshake_failure_forces_a_redial() {
	common::init_tracing();

	let (transport, mut orch) = orchestrator::memory();
	let host = WorkflowHost::with_transport(
		idle_workflow(),
		common::test_options(),
		transport.clone(),
	)
	.unwrap();

	let (registration, _) = tokio::join!(host.listen(), async {
		let mut session = orch.accept().await;

		// Answer the handshake with a transport-level error instead of
		// the registration union. The host must drop this connection and
		// retry the handshake on a fresh dial.
		let (id, _) = session.expect_call("INITIALIZE_HOST_V2").await;
		session.respond_err(id, WireError::new("InternalError", "handshake exploded"));

		let mut session2 = orch.accept().await;
		session2.register().await;
		session2
	});
	registration.unwrap();

	assert_eq!(transport.auths().len(), 2);

	host.close().await;
}

#[tokio::test]
async fn handshake_retries_on_timeout() {
	common::init_tracing();

	let mut options = common::test_options();
	options.request_timeout = Some(Duration::from_millis(100));

	let (transport, mut orch) = orchestrator::memory();
	let host = WorkflowHost::with_transport(idle_workflow(), options, transport).unwrap();

	let (registration, _) = tokio::join!(host.listen(), async {
		let mut session = orch.accept().await;

		// Ignore the first attempt; the host must try again.
		let (_first, _) = session.expect_call("INITIALIZE_HOST_V2").await;

		let (second, _) = session.expect_call("INITIALIZE_HOST_V2").await;
		session.respond_ok(
			second,
			serde_json::json!({"type": "success", "data": orchestrator::default_record()}),
		);
		session
	});

	registration.unwrap();

	host.close().await;
}
