//! Host registration handshake.
//!
//! `INITIALIZE_HOST_V2` advertises the workflow identity, trigger
//! metadata, package version and environment metadata, and receives the
//! workflow/environment/organization identifiers back. It is re-issued
//! after every reconnect before other outbound traffic is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use trigger_host_protocol::{
	HostMetadata, InitializeHostRequest, InitializeHostV2, RegistrationRecord,
	RegistrationResponse,
};

use crate::config::HostConfig;
use crate::error::{HostError, RpcError};
use crate::executor::WorkflowDef;
use crate::rpc::RpcClient;

const ENV_PREFIX: &str = "TRIGGER_";
const ENV_API_KEY: &str = "TRIGGER_API_KEY";
const ENV_PACKAGE_MANIFEST: &str = "npm_package_json";
const ENV_PACKAGE_SECTION_PREFIX: &str = "npm_package_triggerdotdev_";
const MANIFEST_SECTION: &str = "triggerdotdev";

pub(crate) type FirstRegistration = oneshot::Sender<Result<RegistrationRecord, HostError>>;

pub(crate) struct Registrar {
	rpc: RpcClient,
	payload: InitializeHostRequest,
	record: Arc<Mutex<Option<RegistrationRecord>>>,
	first_result_tx: Mutex<Option<FirstRegistration>>,
	retry_interval: Duration,
}

impl Registrar {
	pub fn new(
		rpc: RpcClient,
		payload: InitializeHostRequest,
		record: Arc<Mutex<Option<RegistrationRecord>>>,
		first_result_tx: FirstRegistration,
		retry_interval: Duration,
	) -> Self {
		Self {
			rpc,
			payload,
			record,
			first_result_tx: Mutex::new(Some(first_result_tx)),
			retry_interval,
		}
	}

	/// Registers the workflow on the current connection. Retries forever
	/// on timeout; a rejection from the server is final.
	pub async fn register(&self) -> Result<RegistrationRecord, HostError> {
		loop {
			match self.rpc.call_ungated::<InitializeHostV2>(&self.payload).await {
				Ok(RegistrationResponse::Success { data }) => {
					tracing::info!(
						workflow = %data.workflow.slug,
						environment = %data.environment.slug,
						url = %data.url,
						"workflow registered"
					);
					*self.record.lock().expect("registration lock poisoned") = Some(data.clone());
					self.notify_first(Ok(data.clone()));
					return Ok(data);
				}
				Ok(RegistrationResponse::Error { message }) => {
					tracing::error!(%message, "registration rejected");
					self.notify_first(Err(HostError::RegistrationRejected(message.clone())));
					return Err(HostError::RegistrationRejected(message));
				}
				Err(RpcError::Timeout) => {
					tracing::debug!("registration timed out, retrying");
					tokio::time::sleep(self.retry_interval).await;
				}
				Err(err) => {
					tracing::debug!(?err, "registration attempt failed");
					return Err(HostError::Closed);
				}
			}
		}
	}

	/// Unblocks a `listen` still waiting on the first registration when
	/// the host is closed before it completes.
	pub fn notify_closed(&self) {
		self.notify_first(Err(HostError::Closed));
	}

	fn notify_first(&self, result: Result<RegistrationRecord, HostError>) {
		let tx = self
			.first_result_tx
			.lock()
			.expect("registration lock poisoned")
			.take();
		if let Some(tx) = tx {
			let _ = tx.send(result);
		}
	}
}

pub(crate) fn build_payload(config: &HostConfig, workflow: &WorkflowDef) -> InitializeHostRequest {
	let vars: HashMap<String, String> = std::env::vars().collect();

	InitializeHostRequest {
		api_key: config.api_key.clone(),
		workflow_id: workflow.id.clone(),
		workflow_name: workflow.name.clone(),
		trigger: workflow.trigger.clone(),
		package_name: config.package_name.clone(),
		package_version: config.package_version.clone(),
		trigger_ttl: config.trigger_ttl,
		metadata: HostMetadata {
			git: config.git.clone(),
			package_metadata: package_metadata(&vars),
			env: forwarded_env(&vars),
		},
	}
}

/// Every `TRIGGER_`-prefixed env entry except the api key, with the
/// prefix stripped.
fn forwarded_env(vars: &HashMap<String, String>) -> HashMap<String, String> {
	vars.iter()
		.filter(|(key, _)| key.as_str() != ENV_API_KEY)
		.filter_map(|(key, value)| {
			key.strip_prefix(ENV_PREFIX)
				.map(|stripped| (stripped.to_string(), value.clone()))
		})
		.collect()
}

/// Package metadata: the manifest section named by `npm_package_json`,
/// else a flat projection of `npm_package_triggerdotdev_*` entries.
fn package_metadata(vars: &HashMap<String, String>) -> Option<serde_json::Value> {
	if let Some(path) = vars.get(ENV_PACKAGE_MANIFEST) {
		if let Some(section) = read_manifest_section(path) {
			return Some(section);
		}
	}

	let flattened: serde_json::Map<String, serde_json::Value> = vars
		.iter()
		.filter_map(|(key, value)| {
			key.strip_prefix(ENV_PACKAGE_SECTION_PREFIX)
				.map(|suffix| (suffix.to_string(), serde_json::Value::String(value.clone())))
		})
		.collect();

	if flattened.is_empty() {
		None
	} else {
		Some(serde_json::Value::Object(flattened))
	}
}

fn read_manifest_section(path: &str) -> Option<serde_json::Value> {
	let raw = std::fs::read_to_string(path).ok()?;
	let manifest: serde_json::Value = serde_json::from_str(&raw).ok()?;
	manifest.get(MANIFEST_SECTION).cloned()
}
