//! Server originated method catalogue.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{FrameError, ResolutionMeta, RunMeta, WireError};

/// A request pushed by the orchestrator. Parsed from the envelope's
/// `(method, payload)` pair; an unknown method or mismatched payload is a
/// catalogue violation answered with an error response frame.
#[derive(Debug, Clone)]
pub enum ServerCall {
	TriggerWorkflow(TriggerWorkflowRequest),
	ResolveDelay(OpResolution),
	ResolveRunOnce(RunOnceResolution),
	ResolveRequest(RequestResolution),
	RejectRequest(OpRejection),
	ResolveFetchRequest(FetchResolution),
	RejectFetchRequest(OpRejection),
	ResolveKvGet(KvGetResolution),
	ResolveKvSet(OpResolution),
	ResolveKvDelete(OpResolution),
}

impl ServerCall {
	pub fn parse(method: &str, payload: serde_json::Value) -> Result<Self, FrameError> {
		fn typed<T: serde::de::DeserializeOwned>(
			method: &str,
			payload: serde_json::Value,
		) -> Result<T, FrameError> {
			serde_json::from_value(payload).map_err(|source| FrameError::InvalidPayload {
				method: method.to_string(),
				source,
			})
		}

		match method {
			"TRIGGER_WORKFLOW" => Ok(Self::TriggerWorkflow(typed(method, payload)?)),
			"RESOLVE_DELAY" => Ok(Self::ResolveDelay(typed(method, payload)?)),
			"RESOLVE_RUN_ONCE" => Ok(Self::ResolveRunOnce(typed(method, payload)?)),
			"RESOLVE_REQUEST" => Ok(Self::ResolveRequest(typed(method, payload)?)),
			"REJECT_REQUEST" => Ok(Self::RejectRequest(typed(method, payload)?)),
			"RESOLVE_FETCH_REQUEST" => Ok(Self::ResolveFetchRequest(typed(method, payload)?)),
			"REJECT_FETCH_REQUEST" => Ok(Self::RejectFetchRequest(typed(method, payload)?)),
			"RESOLVE_KV_GET" => Ok(Self::ResolveKvGet(typed(method, payload)?)),
			"RESOLVE_KV_SET" => Ok(Self::ResolveKvSet(typed(method, payload)?)),
			"RESOLVE_KV_DELETE" => Ok(Self::ResolveKvDelete(typed(method, payload)?)),
			_ => Err(FrameError::UnknownMethod(method.to_string())),
		}
	}

	pub fn method(&self) -> &'static str {
		match self {
			Self::TriggerWorkflow(_) => "TRIGGER_WORKFLOW",
			Self::ResolveDelay(_) => "RESOLVE_DELAY",
			Self::ResolveRunOnce(_) => "RESOLVE_RUN_ONCE",
			Self::ResolveRequest(_) => "RESOLVE_REQUEST",
			Self::RejectRequest(_) => "REJECT_REQUEST",
			Self::ResolveFetchRequest(_) => "RESOLVE_FETCH_REQUEST",
			Self::RejectFetchRequest(_) => "REJECT_FETCH_REQUEST",
			Self::ResolveKvGet(_) => "RESOLVE_KV_GET",
			Self::ResolveKvSet(_) => "RESOLVE_KV_SET",
			Self::ResolveKvDelete(_) => "RESOLVE_KV_DELETE",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerWorkflowRequest {
	/// Run id.
	pub id: String,
	pub trigger: TriggerEvent,
	pub meta: RunMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
	pub input: serde_json::Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub event_id: Option<String>,
}

/// Completion without output: delays, kv sets and deletes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResolution {
	pub meta: ResolutionMeta,
	pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpRejection {
	pub meta: ResolutionMeta,
	pub key: String,
	pub error: WireError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOnceResolution {
	pub meta: ResolutionMeta,
	pub key: String,
	pub idempotency_key: String,
	pub has_run: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResolution {
	pub meta: ResolutionMeta,
	pub key: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResolution {
	pub meta: ResolutionMeta,
	pub key: String,
	pub status: u16,
	pub ok: bool,
	#[serde(default)]
	pub headers: HashMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvGetResolution {
	pub meta: ResolutionMeta,
	pub key: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<serde_json::Value>,
}
