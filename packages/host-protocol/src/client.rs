//! Client originated method catalogue.
//!
//! Each method is a zero-sized marker tying the wire name to its typed
//! request and response payloads. Intent RPCs (`SEND_FETCH`,
//! `INITIALIZE_DELAY`, ...) answer with a bare boolean acknowledgement;
//! the operation output arrives later as a server originated
//! `RESOLVE_*`/`REJECT_*` call correlated by `(runId, key)`.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
	EventEnvelope, FetchRetryOptions, HostMetadata, LogLevel, RegistrationResponse, RunOnceType,
	WaitSpec, WireError,
};

pub trait ClientMethod {
	const NAME: &'static str;
	type Request: Serialize + Send;
	type Response: DeserializeOwned + Send;
}

macro_rules! client_method {
	($marker:ident, $name:literal, $req:ty, $res:ty) => {
		pub struct $marker;

		impl ClientMethod for $marker {
			const NAME: &'static str = $name;
			type Request = $req;
			type Response = $res;
		}
	};
}

client_method!(
	InitializeHostV2,
	"INITIALIZE_HOST_V2",
	InitializeHostRequest,
	RegistrationResponse
);
client_method!(StartWorkflowRun, "START_WORKFLOW_RUN", StartRunRequest, bool);
client_method!(
	CompleteWorkflowRun,
	"COMPLETE_WORKFLOW_RUN",
	CompleteRunRequest,
	bool
);
client_method!(
	SendWorkflowError,
	"SEND_WORKFLOW_ERROR",
	WorkflowErrorRequest,
	bool
);
client_method!(SendRequest, "SEND_REQUEST", PerformRequestRequest, bool);
client_method!(SendFetch, "SEND_FETCH", FetchRequest, bool);
client_method!(SendEvent, "SEND_EVENT", SendEventRequest, bool);
client_method!(SendLog, "SEND_LOG", SendLogRequest, bool);
client_method!(
	InitializeDelay,
	"INITIALIZE_DELAY",
	InitializeDelayRequest,
	bool
);
client_method!(
	InitializeRunOnce,
	"INITIALIZE_RUN_ONCE",
	InitializeRunOnceRequest,
	bool
);
client_method!(
	CompleteRunOnce,
	"COMPLETE_RUN_ONCE",
	CompleteRunOnceRequest,
	bool
);
client_method!(SendKvGet, "SEND_KV_GET", KvGetRequest, bool);
client_method!(SendKvSet, "SEND_KV_SET", KvSetRequest, bool);
client_method!(SendKvDelete, "SEND_KV_DELETE", KvDeleteRequest, bool);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeHostRequest {
	pub api_key: String,
	pub workflow_id: String,
	pub workflow_name: String,
	pub trigger: serde_json::Value,
	pub package_name: String,
	pub package_version: String,
	#[serde(
		default,
		rename = "triggerTTL",
		skip_serializing_if = "Option::is_none"
	)]
	pub trigger_ttl: Option<u64>,
	pub metadata: HostMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
	pub run_id: String,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRunRequest {
	pub run_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output: Option<String>,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowErrorRequest {
	pub run_id: String,
	pub error: WireError,
	pub timestamp: String,
}

/// Outer-path request journaled on behalf of ambient callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformRequestRequest {
	pub run_id: String,
	pub key: String,
	pub service: String,
	pub endpoint: String,
	pub params: serde_json::Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
	pub run_id: String,
	pub key: String,
	pub url: String,
	pub method: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub headers: Option<HashMap<String, String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retry: Option<FetchRetryOptions>,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEventRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub run_id: Option<String>,
	pub event: EventEnvelope,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLogRequest {
	pub run_id: String,
	pub level: LogLevel,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub properties: Option<serde_json::Value>,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeDelayRequest {
	pub run_id: String,
	pub key: String,
	pub wait: WaitSpec,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRunOnceRequest {
	pub run_id: String,
	pub key: String,
	#[serde(rename = "type")]
	pub run_once_type: RunOnceType,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRunOnceRequest {
	pub run_id: String,
	pub key: String,
	pub idempotency_key: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output: Option<String>,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvGetRequest {
	pub run_id: String,
	pub key: String,
	pub namespace: String,
	pub kv_key: String,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvSetRequest {
	pub run_id: String,
	pub key: String,
	pub namespace: String,
	pub kv_key: String,
	pub value: serde_json::Value,
	pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvDeleteRequest {
	pub run_id: String,
	pub key: String,
	pub namespace: String,
	pub kv_key: String,
	pub timestamp: String,
}
