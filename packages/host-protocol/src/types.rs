use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier pair used for workflow/environment/organization records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
	pub id: String,
	pub slug: String,
}

/// Returned by the orchestrator after a successful handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
	pub workflow: NamedRef,
	pub environment: NamedRef,
	pub organization: NamedRef,
	pub is_new: bool,
	pub url: String,
}

/// Tagged union answering `INITIALIZE_HOST_V2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistrationResponse {
	Success { data: RegistrationRecord },
	Error { message: String },
}

/// Optional repository metadata forwarded at registration. Probing the
/// repository is the embedding application's job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitMetadata {
	pub sha: String,
	pub branch: String,
	pub committer: String,
	pub committer_date: String,
	pub commit_message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub git: Option<GitMetadata>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub package_metadata: Option<serde_json::Value>,
	pub env: HashMap<String, String>,
}

/// Meta block attached to every server originated resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionMeta {
	pub run_id: String,
}

/// Run descriptor carried by `TRIGGER_WORKFLOW`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
	pub workflow_id: String,
	#[serde(default)]
	pub attempt: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub environment: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api_key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub organization_id: Option<String>,
	#[serde(default)]
	pub is_test: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_origin: Option<String>,
}

/// Delay request: either a relative duration or an absolute ISO-8601
/// timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WaitSpec {
	#[serde(rename = "DELAY")]
	Delay {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		seconds: Option<u64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		minutes: Option<u64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		hours: Option<u64>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		days: Option<u64>,
	},
	#[serde(rename = "SCHEDULE_FOR")]
	ScheduleFor {
		#[serde(rename = "scheduledFor")]
		scheduled_for: String,
	},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOnceType {
	#[serde(rename = "REMOTE")]
	Remote,
	#[serde(rename = "LOCAL_ONLY")]
	LocalOnly,
}

/// Per status-code-pattern backoff for journaled fetches, e.g. keyed by
/// `"5xx"` or `"429"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStrategy {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub limit: Option<u32>,
	#[serde(
		default,
		rename = "minTimeoutInMs",
		skip_serializing_if = "Option::is_none"
	)]
	pub min_timeout_in_ms: Option<u64>,
	#[serde(
		default,
		rename = "maxTimeoutInMs",
		skip_serializing_if = "Option::is_none"
	)]
	pub max_timeout_in_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub factor: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub randomize: Option<bool>,
}

pub type FetchRetryOptions = HashMap<String, RetryStrategy>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

/// Custom event emitted through `SEND_EVENT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub name: String,
	pub payload: serde_json::Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<String>,
}
