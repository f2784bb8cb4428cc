mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use trigger_host::{FetchOptions, WaitDuration, Workflow};

#[tokio::test]
async fn wait_for_journals_delay_and_suspends() {
	let workflow = Workflow::builder("w1", "Delay").run(
		|_event: serde_json::Value, ctx| async move {
			ctx.wait_for("d1", WaitDuration::seconds(5)).await?;
			Ok(serde_json::json!({"done": true}))
		},
	);
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (delay_id, delay) = session.expect_call("INITIALIZE_DELAY").await;
	assert_eq!(delay["runId"], "r1");
	assert_eq!(delay["key"], "d1");
	assert_eq!(delay["wait"], serde_json::json!({"type": "DELAY", "seconds": 5}));
	session.ack(delay_id);

	session.call(
		"RESOLVE_DELAY",
		serde_json::json!({"meta": {"runId": "r1"}, "key": "d1"}),
	);

	let (complete_id, complete) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	assert_eq!(complete["output"], "{\"done\":true}");
	session.ack(complete_id);

	host.close().await;
}

#[derive(Deserialize, serde::Serialize)]
struct Greeting {
	message: String,
}

#[tokio::test]
async fn fetch_applies_response_schema() {
	let workflow = Workflow::builder("w1", "Fetch").run(
		|_event: serde_json::Value, ctx| async move {
			let response = ctx
				.fetch_json::<Greeting>("f1", "https://api.example.test/greet", FetchOptions::default())
				.await?;
			assert_eq!(response.status, 200);
			Ok(response.body.expect("body"))
		},
	);
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (fetch_id, fetch) = session.expect_call("SEND_FETCH").await;
	assert_eq!(fetch["runId"], "r1");
	assert_eq!(fetch["key"], "f1");
	assert_eq!(fetch["url"], "https://api.example.test/greet");
	assert_eq!(fetch["method"], "GET");
	session.ack(fetch_id);

	session.call(
		"RESOLVE_FETCH_REQUEST",
		serde_json::json!({
			"meta": {"runId": "r1"},
			"key": "f1",
			"status": 200,
			"ok": true,
			"headers": {"content-type": "application/json"},
			"body": {"message": "hello"}
		}),
	);

	let (complete_id, complete) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	assert_eq!(complete["output"], "{\"message\":\"hello\"}");
	session.ack(complete_id);

	host.close().await;
}

#[tokio::test]
async fn fetch_body_schema_mismatch_fails_the_run() {
	let workflow = Workflow::builder("w1", "Fetch mismatch").run(
		|_event: serde_json::Value, ctx| async move {
			let response = ctx
				.fetch_json::<Greeting>("f1", "https://api.example.test/greet", FetchOptions::default())
				.await?;
			Ok(response.body)
		},
	);
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (fetch_id, _) = session.expect_call("SEND_FETCH").await;
	session.ack(fetch_id);

	session.call(
		"RESOLVE_FETCH_REQUEST",
		serde_json::json!({
			"meta": {"runId": "r1"},
			"key": "f1",
			"status": 200,
			"ok": true,
			"body": {"message": 42}
		}),
	);

	let (error_id, error) = session.expect_call("SEND_WORKFLOW_ERROR").await;
	assert_eq!(error["error"]["name"], "Error");
	session.ack(error_id);

	host.close().await;
}

#[tokio::test]
async fn fetch_rejection_keeps_server_error_shape() {
	let workflow = Workflow::builder("w1", "Fetch reject").run(
		|_event: serde_json::Value, ctx| async move {
			let response = ctx
				.fetch("f1", "https://api.example.test/greet", FetchOptions::default())
				.await?;
			Ok(response.body)
		},
	);
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (fetch_id, _) = session.expect_call("SEND_FETCH").await;
	session.ack(fetch_id);

	session.call(
		"REJECT_FETCH_REQUEST",
		serde_json::json!({
			"meta": {"runId": "r1"},
			"key": "f1",
			"error": {"name": "FetchError", "message": "upstream returned 502"}
		}),
	);

	let (error_id, error) = session.expect_call("SEND_WORKFLOW_ERROR").await;
	assert_eq!(error["error"]["name"], "FetchError");
	assert_eq!(error["error"]["message"], "upstream returned 502");
	session.ack(error_id);

	host.close().await;
}

#[tokio::test]
async fn run_once_cache_hit_skips_the_callback() {
	let calls = Arc::new(AtomicU32::new(0));
	let workflow = Workflow::builder("w1", "Run once hit").run({
		let calls = calls.clone();
		move |_event: serde_json::Value, ctx| {
			let calls = calls.clone();
			async move {
				let value: serde_json::Value = ctx
					.run_once("k", |_idempotency_key| {
						let calls = calls.clone();
						async move {
							calls.fetch_add(1, Ordering::SeqCst);
							Ok(serde_json::json!({"v": 0}))
						}
					})
					.await?;
				Ok(value)
			}
		}
	});
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (init_id, init) = session.expect_call("INITIALIZE_RUN_ONCE").await;
	assert_eq!(init["key"], "k");
	assert_eq!(init["type"], "REMOTE");
	session.ack(init_id);

	session.call(
		"RESOLVE_RUN_ONCE",
		serde_json::json!({
			"meta": {"runId": "r1"},
			"key": "k",
			"idempotencyKey": "i",
			"hasRun": true,
			"output": {"v": 42}
		}),
	);

	// Straight to completion: no COMPLETE_RUN_ONCE and no callback.
	let (complete_id, complete) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	assert_eq!(complete["output"], "{\"v\":42}");
	session.ack(complete_id);

	assert_eq!(calls.load(Ordering::SeqCst), 0);

	host.close().await;
}

#[tokio::test]
async fn run_once_miss_runs_callback_once_and_reports_output() {
	let calls = Arc::new(AtomicU32::new(0));
	let workflow = Workflow::builder("w1", "Run once miss").run({
		let calls = calls.clone();
		move |_event: serde_json::Value, ctx| {
			let calls = calls.clone();
			async move {
				let value: serde_json::Value = ctx
					.run_once("k", |idempotency_key| {
						let calls = calls.clone();
						async move {
							assert_eq!(idempotency_key, "i");
							calls.fetch_add(1, Ordering::SeqCst);
							Ok(serde_json::json!({"v": 7}))
						}
					})
					.await?;
				Ok(value)
			}
		}
	});
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (init_id, _) = session.expect_call("INITIALIZE_RUN_ONCE").await;
	session.ack(init_id);

	session.call(
		"RESOLVE_RUN_ONCE",
		serde_json::json!({
			"meta": {"runId": "r1"},
			"key": "k",
			"idempotencyKey": "i",
			"hasRun": false
		}),
	);

	let (complete_once_id, complete_once) = session.expect_call("COMPLETE_RUN_ONCE").await;
	assert_eq!(complete_once["idempotencyKey"], "i");
	assert_eq!(complete_once["output"], "{\"v\":7}");
	session.ack(complete_once_id);

	let (complete_id, complete) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	assert_eq!(complete["output"], "{\"v\":7}");
	session.ack(complete_id);

	assert_eq!(calls.load(Ordering::SeqCst), 1);

	host.close().await;
}

#[tokio::test]
async fn run_once_local_only_always_runs_callback() {
	let workflow = Workflow::builder("w1", "Run once local").run(
		|_event: serde_json::Value, ctx| async move {
			let value: String = ctx
				.run_once_local_only("k", |idempotency_key| async move { Ok(idempotency_key) })
				.await?;
			Ok(serde_json::json!({"key": value}))
		},
	);
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (init_id, init) = session.expect_call("INITIALIZE_RUN_ONCE").await;
	assert_eq!(init["type"], "LOCAL_ONLY");
	session.ack(init_id);

	session.call(
		"RESOLVE_RUN_ONCE",
		serde_json::json!({
			"meta": {"runId": "r1"},
			"key": "k",
			"idempotencyKey": "i",
			"hasRun": false
		}),
	);

	// Completion is recorded but no output is cached server-side.
	let (complete_once_id, complete_once) = session.expect_call("COMPLETE_RUN_ONCE").await;
	assert!(complete_once.get("output").is_none());
	session.ack(complete_once_id);

	let (complete_id, complete) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	assert_eq!(complete["output"], "{\"key\":\"i\"}");
	session.ack(complete_id);

	host.close().await;
}

#[tokio::test]
async fn kv_stores_are_namespaced() {
	let workflow = Workflow::builder("w1", "Kv").run(|_event: serde_json::Value, ctx| async move {
		ctx.kv().set("s1", "counter", &5).await?;
		let counter: Option<u32> = ctx.run_kv().get("g1", "counter").await?;
		Ok(serde_json::json!({"counter": counter}))
	});
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (set_id, set) = session.expect_call("SEND_KV_SET").await;
	assert_eq!(set["namespace"], "workflow:w1");
	assert_eq!(set["kvKey"], "counter");
	assert_eq!(set["value"], 5);
	session.ack(set_id);
	session.call(
		"RESOLVE_KV_SET",
		serde_json::json!({"meta": {"runId": "r1"}, "key": "s1"}),
	);

	let (get_id, get) = session.expect_call("SEND_KV_GET").await;
	assert_eq!(get["namespace"], "run:r1");
	assert_eq!(get["kvKey"], "counter");
	session.ack(get_id);
	session.call(
		"RESOLVE_KV_GET",
		serde_json::json!({"meta": {"runId": "r1"}, "key": "g1", "value": 5}),
	);

	let (complete_id, complete) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	assert_eq!(complete["output"], "{\"counter\":5}");
	session.ack(complete_id);

	host.close().await;
}

#[derive(Deserialize, serde::Serialize)]
struct PostedMessage {
	ts: String,
}

#[tokio::test]
async fn ambient_perform_request_applies_response_schema() {
	let workflow = Workflow::builder("w1", "Request").run(
		|_event: serde_json::Value, _ctx| async move {
			let ambient = trigger_host::ambient::current().expect("ambient bundle installed");
			let response: Option<PostedMessage> = ambient
				.perform_request_as(
					"req1",
					trigger_host::RequestOptions {
						service: "slack".into(),
						endpoint: "chat.postMessage".into(),
						params: serde_json::json!({"channel": "C1"}),
						version: None,
					},
				)
				.await?;
			Ok(serde_json::json!({"ts": response.map(|posted| posted.ts)}))
		},
	);
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	let (request_id, request) = session.expect_call("SEND_REQUEST").await;
	assert_eq!(request["runId"], "r1");
	assert_eq!(request["key"], "req1");
	assert_eq!(request["service"], "slack");
	assert_eq!(request["endpoint"], "chat.postMessage");
	session.ack(request_id);

	session.call(
		"RESOLVE_REQUEST",
		serde_json::json!({
			"meta": {"runId": "r1"},
			"key": "req1",
			"output": {"ts": "123.45"}
		}),
	);

	let (complete_id, complete) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	assert_eq!(complete["output"], "{\"ts\":\"123.45\"}");
	session.ack(complete_id);

	host.close().await;
}

#[tokio::test]
async fn send_event_is_fire_and_forget() {
	let workflow = Workflow::builder("w1", "Events").run(
		|_event: serde_json::Value, ctx| async move {
			let event = trigger_host::NewEvent::new("user.created", &serde_json::json!({"id": 7}))?;
			ctx.send_event(event)?;
			Ok(())
		},
	);
	let (host, mut session) = common::launch(workflow).await;

	common::start_run(&mut session, "r1", serde_json::json!({})).await;

	// The run completes without waiting for an event acknowledgement.
	let (event_id, event) = session.expect_call("SEND_EVENT").await;
	assert_eq!(event["event"]["name"], "user.created");
	assert_eq!(event["event"]["payload"], serde_json::json!({"id": 7}));
	session.ack(event_id);

	let (complete_id, _) = session.expect_call("COMPLETE_WORKFLOW_RUN").await;
	session.ack(complete_id);

	host.close().await;
}
