use std::time::Duration;

use trigger_host_protocol::{GitMetadata, LogLevel};
use url::Url;

use crate::error::HostError;

pub const DEFAULT_ENDPOINT: &str = "wss://wss.trigger.dev/ws";

const ENV_API_KEY: &str = "TRIGGER_API_KEY";
const ENV_ENDPOINT: &str = "TRIGGER_WSS_URL";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Host construction options. Unset fields fall back to the environment
/// and then to defaults; a missing api key is fatal.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
	pub api_key: Option<String>,
	pub endpoint: Option<String>,
	/// Stable client identity across reconnects. Freshly generated when
	/// not supplied.
	pub session_id: Option<String>,
	/// Minimum level forwarded to the orchestrator via `SEND_LOG`.
	pub log_level: Option<LogLevel>,
	pub trigger_ttl: Option<u64>,
	pub git: Option<GitMetadata>,
	pub package_name: Option<String>,
	pub package_version: Option<String>,
	pub request_timeout: Option<Duration>,
	pub retry_interval: Option<Duration>,
	pub reconnect_interval: Option<Duration>,
	pub heartbeat_interval: Option<Duration>,
}

impl HostOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
		self.api_key = Some(api_key.into());
		self
	}

	pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
		self.endpoint = Some(endpoint.into());
		self
	}

	pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());
		self
	}

	pub fn log_level(mut self, log_level: LogLevel) -> Self {
		self.log_level = Some(log_level);
		self
	}

	pub fn trigger_ttl(mut self, trigger_ttl: u64) -> Self {
		self.trigger_ttl = Some(trigger_ttl);
		self
	}

	pub fn git(mut self, git: GitMetadata) -> Self {
		self.git = Some(git);
		self
	}

	pub(crate) fn resolve(self) -> Result<HostConfig, HostError> {
		self.resolve_from(|key| std::env::var(key).ok())
	}

	fn resolve_from(self, get_env: impl Fn(&str) -> Option<String>) -> Result<HostConfig, HostError> {
		let api_key = self
			.api_key
			.or_else(|| get_env(ENV_API_KEY))
			.ok_or(HostError::MissingApiKey)?;

		let endpoint = self
			.endpoint
			.or_else(|| get_env(ENV_ENDPOINT))
			.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
		let endpoint = Url::parse(&endpoint).map_err(HostError::InvalidEndpoint)?;

		Ok(HostConfig {
			api_key,
			endpoint,
			session_id: self
				.session_id
				.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
			log_level: self.log_level.unwrap_or(LogLevel::Info),
			trigger_ttl: self.trigger_ttl,
			git: self.git,
			package_name: self
				.package_name
				.unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string()),
			package_version: self
				.package_version
				.unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
			request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
			retry_interval: self.retry_interval.unwrap_or(DEFAULT_RETRY_INTERVAL),
			reconnect_interval: self
				.reconnect_interval
				.unwrap_or(DEFAULT_RECONNECT_INTERVAL),
			heartbeat_interval: self
				.heartbeat_interval
				.unwrap_or(DEFAULT_HEARTBEAT_INTERVAL),
		})
	}
}

#[derive(Debug, Clone)]
pub(crate) struct HostConfig {
	pub api_key: String,
	pub endpoint: Url,
	pub session_id: String,
	pub log_level: LogLevel,
	pub trigger_ttl: Option<u64>,
	pub git: Option<GitMetadata>,
	pub package_name: String,
	pub package_version: String,
	pub request_timeout: Duration,
	pub retry_interval: Duration,
	pub reconnect_interval: Duration,
	pub heartbeat_interval: Duration,
}
