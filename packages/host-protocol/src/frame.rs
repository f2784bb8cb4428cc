use serde::{Deserialize, Serialize};

/// Request/response envelope shared by both directions.
///
/// Correlation ids are unique per sender for the lifetime of the process.
/// Requests carry the method name and an opaque payload; the payload is
/// decoded against the direction's catalogue after the envelope parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Frame {
	Request {
		id: u64,
		method: String,
		payload: serde_json::Value,
	},
	Response {
		id: u64,
		ok: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		value: Option<serde_json::Value>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<WireError>,
	},
}

impl Frame {
	pub fn request(id: u64, method: impl Into<String>, payload: serde_json::Value) -> Self {
		Frame::Request {
			id,
			method: method.into(),
			payload,
		}
	}

	pub fn ok_response(id: u64, value: serde_json::Value) -> Self {
		Frame::Response {
			id,
			ok: true,
			value: Some(value),
			error: None,
		}
	}

	pub fn err_response(id: u64, error: WireError) -> Self {
		Frame::Response {
			id,
			ok: false,
			value: None,
			error: Some(error),
		}
	}

	pub fn encode(&self) -> Result<String, FrameError> {
		serde_json::to_string(self).map_err(FrameError::Encode)
	}

	pub fn decode(raw: &str) -> Result<Self, FrameError> {
		serde_json::from_str(raw).map_err(FrameError::Decode)
	}
}

/// Error shape carried on the wire: workflow errors, journaled-call
/// rejections, and failed response frames all use it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
	pub name: String,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack_trace: Option<String>,
}

impl WireError {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			message: message.into(),
			stack_trace: None,
		}
	}

	pub fn unknown() -> Self {
		Self::new("UnknownError", "An unknown error occurred")
	}
}

impl std::fmt::Display for WireError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.name, self.message)
	}
}

impl std::error::Error for WireError {}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
	#[error("failed to encode frame: {0}")]
	Encode(#[source] serde_json::Error),
	#[error("failed to decode frame: {0}")]
	Decode(#[source] serde_json::Error),
	#[error("unknown method: {0}")]
	UnknownMethod(String),
	#[error("invalid payload for {method}: {source}")]
	InvalidPayload {
		method: String,
		#[source]
		source: serde_json::Error,
	},
}
