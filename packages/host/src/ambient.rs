//! Run-scoped ambient state.
//!
//! While a workflow function executes, its run handle is installed in a
//! task-local scope. Any asynchronously linked descendant can recover it
//! with [`current`] without threading a context parameter through; tasks
//! started with [`spawn`] re-enter the scope so transitively spawned work
//! observes the same bundle. Concurrent runs hold disjoint scopes.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::context::{FetchOptions, FetchOutput, NewEvent, RequestOptions, RunHandle};
use crate::error::ContextError;

tokio::task_local! {
	static RUN_SCOPE: Arc<RunHandle>;
}

/// Runs `fut` inside the ambient scope of `handle`.
pub(crate) async fn scope<F: Future>(handle: Arc<RunHandle>, fut: F) -> F::Output {
	RUN_SCOPE.scope(handle, fut).await
}

pub(crate) fn current_handle() -> Option<Arc<RunHandle>> {
	RUN_SCOPE.try_with(|handle| handle.clone()).ok()
}

/// The ambient bundle of the enclosing run, if any.
pub fn current() -> Option<AmbientContext> {
	current_handle().map(|handle| AmbientContext { handle })
}

/// Spawns a task that inherits the caller's ambient scope.
pub fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	match current_handle() {
		Some(handle) => tokio::spawn(scope(handle, fut)),
		None => tokio::spawn(fut),
	}
}

/// Capability bundle available outside the direct workflow frame.
#[derive(Clone)]
pub struct AmbientContext {
	handle: Arc<RunHandle>,
}

impl AmbientContext {
	pub fn id(&self) -> &str {
		self.handle.run_id()
	}

	pub fn workflow_id(&self) -> &str {
		self.handle.workflow_id()
	}

	pub fn app_origin(&self) -> Option<&str> {
		self.handle.app_origin()
	}

	pub async fn perform_request(
		&self,
		key: &str,
		options: RequestOptions,
	) -> Result<Option<serde_json::Value>, ContextError> {
		self.handle.perform_request(key, options).await
	}

	/// Like [`Self::perform_request`] with a response schema applied.
	pub async fn perform_request_as<T: DeserializeOwned>(
		&self,
		key: &str,
		options: RequestOptions,
	) -> Result<Option<T>, ContextError> {
		match self.handle.perform_request(key, options).await? {
			Some(value) => Ok(Some(
				serde_json::from_value(value).map_err(ContextError::Schema)?,
			)),
			None => Ok(None),
		}
	}

	pub async fn fetch(
		&self,
		key: &str,
		url: &str,
		options: FetchOptions,
	) -> Result<FetchOutput, ContextError> {
		self.handle.fetch(key, url, options).await
	}

	/// Like [`Self::fetch`] with a response schema applied to the body.
	pub async fn fetch_json<T: DeserializeOwned>(
		&self,
		key: &str,
		url: &str,
		options: FetchOptions,
	) -> Result<FetchOutput<T>, ContextError> {
		self.handle.fetch(key, url, options).await?.parse_body()
	}

	pub fn send_event(&self, event: NewEvent) -> Result<(), ContextError> {
		self.handle.send_event(event)
	}
}
