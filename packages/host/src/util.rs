use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since process epoch as a decimal string. Journaled intents
/// carry this so the orchestrator can order calls from one host without
/// trusting wall clocks.
pub(crate) fn monotonic_timestamp() -> String {
	PROCESS_EPOCH
		.get_or_init(Instant::now)
		.elapsed()
		.as_nanos()
		.to_string()
}
