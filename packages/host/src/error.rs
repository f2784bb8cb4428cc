use trigger_host_protocol::WireError;

/// Construction and lifecycle errors surfaced to the embedding
/// application.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
	#[error("missing api key: pass `api_key` or set TRIGGER_API_KEY")]
	MissingApiKey,
	#[error("invalid endpoint url: {0}")]
	InvalidEndpoint(#[source] url::ParseError),
	#[error("registration rejected: {0}")]
	RegistrationRejected(String),
	#[error("host closed before registration completed")]
	Closed,
}

/// Outcome of a single correlated request on the wire.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
	#[error("request timed out")]
	Timeout,
	#[error("remote error: {0}")]
	Remote(WireError),
	#[error("response did not match the method schema: {0}")]
	Schema(#[source] serde_json::Error),
	#[error("failed to encode request payload: {0}")]
	Encode(#[source] serde_json::Error),
	#[error("connection closed")]
	Closed,
}

/// Errors observed by workflow code at a journaled suspension point.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
	#[error("journaled call rejected: {0}")]
	Rejected(WireError),
	#[error(transparent)]
	Rpc(#[from] RpcError),
	#[error("response body did not match the supplied schema: {0}")]
	Schema(#[source] serde_json::Error),
	#[error("a journaled call with key {0:?} is already pending in this run")]
	DuplicateKey(String),
	#[error("context used after the run completed")]
	RunCompleted,
	#[error("run torn down while suspended")]
	TornDown,
}

/// Typed error workflow code can return to control the reported
/// name/message/stack trace verbatim. Any other error is normalized from
/// its display/debug representation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{name}: {message}")]
pub struct WorkflowError {
	pub name: String,
	pub message: String,
	pub stack_trace: Option<String>,
}

impl WorkflowError {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			message: message.into(),
			stack_trace: None,
		}
	}

	pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
		self.stack_trace = Some(stack_trace.into());
		self
	}
}

impl From<WorkflowError> for WireError {
	fn from(err: WorkflowError) -> Self {
		WireError {
			name: err.name,
			message: err.message,
			stack_trace: err.stack_trace,
		}
	}
}
