use serde::Serialize;

use crate::{core::unix_now_secs, stream::StreamRuntime};

/// Point-in-time view of the delivery stream for status surfaces and
/// support bundles.
#[derive(Debug, Serialize, Clone)]
pub struct RuntimeSnapshot {
    pub connection_state: String,
    pub should_run: bool,
    pub last_connected_at: Option<u64>,
    pub last_event_at: Option<u64>,
    pub last_payload_at: Option<u64>,
    pub stale_for_seconds: Option<u64>,
    pub last_error: Option<String>,
    pub backoff_seconds: u64,
    pub reconnect_attempts: u64,
}

pub(crate) fn snapshot(runtime: &StreamRuntime) -> RuntimeSnapshot {
    let now = unix_now_secs();
    let stale_for_seconds = runtime.last_event_at.map(|last| now.saturating_sub(last));

    RuntimeSnapshot {
        connection_state: runtime.connection_state.as_str().to_string(),
        should_run: runtime.should_run,
        last_connected_at: runtime.last_connected_at,
        last_event_at: runtime.last_event_at,
        last_payload_at: runtime.last_payload_at,
        stale_for_seconds,
        last_error: runtime.last_error.clone(),
        backoff_seconds: runtime.backoff_seconds,
        reconnect_attempts: runtime.reconnect_attempts,
    }
}
