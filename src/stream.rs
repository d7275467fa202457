use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
};

use crate::{
    consts::{
        BACKOFF_MAX_SECS, STREAM_CONNECT_TIMEOUT_SECS, STREAM_LIVENESS_CHECK_INTERVAL_SECS,
        STREAM_LIVENESS_IDLE_SECS, STREAM_LIVENESS_PING_GRACE_SECS,
    },
    core::{truncate_message, unix_now_secs},
    error::NotifyError,
    model::DeliveryToken,
    provider::DeliveryHandler,
};

const TOKEN_HEADER: &str = "X-Delivery-Token";
const ROTATION_EVENT: &str = "token-rotated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Backoff => "Backoff",
        }
    }
}

pub(crate) struct StreamRuntime {
    stop_tx: Option<watch::Sender<bool>>,
    /// Incremented per spawned stream task. The task captures its epoch and
    /// only writes cleanup state if it still matches, so a late-exiting old
    /// task never clobbers a freshly started replacement's state.
    stream_epoch: u64,
    pub(crate) connection_state: ConnectionState,
    pub(crate) should_run: bool,
    pub(crate) last_connected_at: Option<u64>,
    pub(crate) last_event_at: Option<u64>,
    pub(crate) last_payload_at: Option<u64>,
    pub(crate) last_error: Option<String>,
    pub(crate) backoff_seconds: u64,
    pub(crate) reconnect_attempts: u64,
}

impl Default for StreamRuntime {
    fn default() -> Self {
        Self {
            stop_tx: None,
            stream_epoch: 0,
            connection_state: ConnectionState::Disconnected,
            should_run: false,
            last_connected_at: None,
            last_event_at: None,
            last_payload_at: None,
            last_error: None,
            backoff_seconds: 0,
            reconnect_attempts: 0,
        }
    }
}

/// The background execution context for stream-capable hosts: one
/// long-lived task holding a websocket to the push relay, reconnecting with
/// capped backoff, and handing frames to the `DeliveryHandler`.
pub struct DeliveryStream {
    runtime: Arc<Mutex<StreamRuntime>>,
}

impl Default for DeliveryStream {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryStream {
    pub fn new() -> Self {
        Self {
            runtime: Arc::new(Mutex::new(StreamRuntime::default())),
        }
    }

    /// Spawns the stream task; a second start while running is a no-op.
    /// Must be called from within a tokio runtime.
    pub fn start(
        &self,
        ws_url: String,
        token: DeliveryToken,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<(), NotifyError> {
        let (rx, task_epoch) = {
            let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
            if runtime.stop_tx.is_some() {
                return Ok(());
            }
            let (tx, rx) = watch::channel(false);
            runtime.stop_tx = Some(tx);
            runtime.stream_epoch = runtime.stream_epoch.wrapping_add(1);
            runtime.should_run = true;
            runtime.last_error = None;
            runtime.backoff_seconds = 0;
            runtime.reconnect_attempts = 0;
            runtime.connection_state = ConnectionState::Connecting;
            (rx, runtime.stream_epoch)
        };

        tracing::debug!(url = %ws_url, "spawning delivery stream task");
        let shared = self.runtime.clone();
        tokio::spawn(async move {
            run_stream_loop(shared, ws_url, token, handler, rx, task_epoch).await;
        });
        Ok(())
    }

    pub fn stop(&self) {
        let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stop_tx) = runtime.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        runtime.should_run = false;
        runtime.backoff_seconds = 0;
        runtime.connection_state = ConnectionState::Disconnected;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .connection_state
    }

    pub fn snapshot(&self) -> crate::diagnostics::RuntimeSnapshot {
        let runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
        crate::diagnostics::snapshot(&runtime)
    }
}

pub(crate) fn next_backoff(current: u64) -> u64 {
    current.saturating_mul(2).clamp(1, BACKOFF_MAX_SECS)
}

#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Payload(String),
    TokenRotated(DeliveryToken),
}

#[derive(Debug, Deserialize)]
struct ControlFrameWire {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

/// Control frames are rare; anything that is not a well-formed rotation
/// event is handed to the receiver as a payload candidate, which drops it
/// if malformed.
pub(crate) fn classify_frame(text: &str) -> Frame {
    if let Ok(control) = serde_json::from_str::<ControlFrameWire>(text) {
        if control.event.as_deref() == Some(ROTATION_EVENT) {
            if let Some(token) = control.token.filter(|t| !t.trim().is_empty()) {
                return Frame::TokenRotated(DeliveryToken::new(token));
            }
            tracing::warn!("rotation frame without a token, ignoring as control frame");
        }
    }
    Frame::Payload(text.to_string())
}

fn set_connection_state(runtime: &Arc<Mutex<StreamRuntime>>, state: ConnectionState) {
    let mut guard = runtime.lock().unwrap_or_else(PoisonError::into_inner);
    guard.connection_state = state;
}

fn mark_event(runtime: &Arc<Mutex<StreamRuntime>>, at: u64, payload: bool) {
    let mut guard = runtime.lock().unwrap_or_else(PoisonError::into_inner);
    guard.last_event_at = Some(at);
    if payload {
        guard.last_payload_at = Some(at);
    }
}

async fn run_stream_loop(
    runtime: Arc<Mutex<StreamRuntime>>,
    ws_url: String,
    token: DeliveryToken,
    handler: Arc<dyn DeliveryHandler>,
    mut stop_rx: watch::Receiver<bool>,
    task_epoch: u64,
) {
    let mut backoff_secs: u64 = 1;
    tracing::debug!("delivery stream task started");

    loop {
        if *stop_rx.borrow() {
            break;
        }

        set_connection_state(&runtime, ConnectionState::Connecting);
        match stream_once(&runtime, &ws_url, &token, handler.as_ref(), &mut stop_rx).await {
            Ok(()) => {
                if *stop_rx.borrow() {
                    break;
                }
                tracing::debug!("stream session ended without error");
                set_connection_state(&runtime, ConnectionState::Disconnected);
            }
            Err(err) => {
                if *stop_rx.borrow() {
                    break;
                }

                tracing::warn!(error = %err, "delivery stream error, backing off");
                {
                    let mut guard = runtime.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.connection_state = ConnectionState::Backoff;
                    guard.last_error = Some(truncate_message(&err, 300));
                    guard.backoff_seconds = backoff_secs;
                    guard.reconnect_attempts = guard.reconnect_attempts.saturating_add(1);
                }

                let jitter_ms = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| (d.subsec_millis() % 500) as u64)
                    .unwrap_or(0);

                tokio::time::sleep(
                    std::time::Duration::from_secs(backoff_secs)
                        + std::time::Duration::from_millis(jitter_ms),
                )
                .await;
                backoff_secs = next_backoff(backoff_secs);
            }
        }
    }

    finish_task(&runtime, task_epoch);
    tracing::debug!("delivery stream task exited");
}

/// Task-exit cleanup. Every write here is behind the epoch check: a late
/// old task must not flip a replacement task's state to Disconnected.
fn finish_task(runtime: &Arc<Mutex<StreamRuntime>>, task_epoch: u64) {
    let mut guard = runtime.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.stream_epoch == task_epoch {
        guard.stop_tx = None;
        guard.should_run = false;
        guard.backoff_seconds = 0;
        guard.connection_state = ConnectionState::Disconnected;
    }
}

async fn stream_once(
    runtime: &Arc<Mutex<StreamRuntime>>,
    ws_url: &str,
    token: &DeliveryToken,
    handler: &dyn DeliveryHandler,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<(), String> {
    tracing::debug!(token = %token, "ws connect");
    let mut ws_request = ws_url
        .into_client_request()
        .map_err(|error| format!("failed to build websocket request: {error}"))?;
    let token_header = HeaderValue::from_str(token.as_str().trim())
        .map_err(|error| format!("invalid token for websocket header: {error}"))?;
    ws_request.headers_mut().insert(TOKEN_HEADER, token_header);

    let (mut ws_stream, _) = tokio::time::timeout(
        std::time::Duration::from_secs(STREAM_CONNECT_TIMEOUT_SECS),
        connect_async(ws_request),
    )
    .await
    .map_err(|_| {
        format!("stream connection timed out after {STREAM_CONNECT_TIMEOUT_SECS} seconds")
    })?
    .map_err(|error| format!("stream connection failed: {error}"))?;

    tracing::debug!("ws connected");
    let now = unix_now_secs();
    {
        let mut guard = runtime.lock().unwrap_or_else(PoisonError::into_inner);
        guard.last_connected_at = Some(now);
        guard.last_event_at = Some(now);
        guard.last_error = None;
        guard.backoff_seconds = 0;
        guard.connection_state = ConnectionState::Connected;
    }

    let mut liveness_interval = tokio::time::interval(std::time::Duration::from_secs(
        STREAM_LIVENESS_CHECK_INTERVAL_SECS,
    ));
    liveness_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    liveness_interval.tick().await;
    let mut last_activity_at = now;
    let mut pending_ping_since: Option<u64> = None;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    let _ = ws_stream.close(None).await;
                    return Ok(());
                }
            }
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_event(runtime, event_now, true);
                        tracing::debug!(bytes = text.len(), "ws text frame");
                        match classify_frame(text.as_ref()) {
                            Frame::TokenRotated(new_token) => handler.on_token_rotated(new_token),
                            Frame::Payload(raw) => handler.on_payload(&raw),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_event(runtime, event_now, false);
                        ws_stream.send(Message::Pong(payload)).await
                            .map_err(|error| format!("failed to send pong: {error}"))?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_event(runtime, event_now, false);
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Err("stream closed by server".to_string());
                    }
                    Some(Ok(_)) => {
                        let event_now = unix_now_secs();
                        last_activity_at = event_now;
                        pending_ping_since = None;
                        mark_event(runtime, event_now, false);
                    }
                    Some(Err(error)) => return Err(format!("stream read error: {error}")),
                    None => return Err("stream ended unexpectedly".to_string()),
                }
            }
            _ = liveness_interval.tick() => {
                let event_now = unix_now_secs();
                if event_now.saturating_sub(last_activity_at) < STREAM_LIVENESS_IDLE_SECS {
                    continue;
                }
                match pending_ping_since {
                    None => {
                        tracing::debug!("ws liveness ping sent");
                        ws_stream
                            .send(Message::Ping(Vec::<u8>::new().into()))
                            .await
                            .map_err(|error| format!("failed to send liveness ping: {error}"))?;
                        pending_ping_since = Some(event_now);
                    }
                    Some(started) => {
                        if event_now.saturating_sub(started) >= STREAM_LIVENESS_PING_GRACE_SECS {
                            return Err(format!(
                                "stream liveness timeout after {}s idle",
                                event_now.saturating_sub(last_activity_at)
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_frame_is_classified() {
        let frame = classify_frame(r#"{"event":"token-rotated","token":"tok-next"}"#);
        assert_eq!(frame, Frame::TokenRotated(DeliveryToken::new("tok-next")));
    }

    #[test]
    fn rotation_frame_without_token_falls_through_to_payload() {
        let frame = classify_frame(r#"{"event":"token-rotated"}"#);
        assert!(matches!(frame, Frame::Payload(_)));
    }

    #[test]
    fn ordinary_payloads_stay_payloads() {
        let raw = r#"{"notification":{"title":"Hi","body":"there"},"data":{}}"#;
        assert_eq!(classify_frame(raw), Frame::Payload(raw.to_string()));
        assert_eq!(
            classify_frame("not json"),
            Frame::Payload("not json".to_string())
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(next_backoff(1), 2);
        assert_eq!(next_backoff(8), 16);
        assert_eq!(next_backoff(16), BACKOFF_MAX_SECS);
        assert_eq!(next_backoff(BACKOFF_MAX_SECS), BACKOFF_MAX_SECS);
    }

    #[test]
    fn stale_task_exit_leaves_replacement_state_alone() {
        let runtime = Arc::new(Mutex::new(StreamRuntime::default()));
        {
            let mut guard = runtime.lock().unwrap();
            guard.stream_epoch = 2;
            guard.should_run = true;
            guard.connection_state = ConnectionState::Connecting;
        }

        // An epoch-1 task exiting late must not touch the epoch-2 state.
        finish_task(&runtime, 1);
        {
            let guard = runtime.lock().unwrap();
            assert_eq!(guard.connection_state, ConnectionState::Connecting);
            assert!(guard.should_run);
        }

        // The current task's own exit does clean up.
        finish_task(&runtime, 2);
        let guard = runtime.lock().unwrap();
        assert_eq!(guard.connection_state, ConnectionState::Disconnected);
        assert!(!guard.should_run);
    }

    #[tokio::test]
    async fn second_start_is_a_noop() {
        struct NullHandler;
        impl DeliveryHandler for NullHandler {
            fn on_payload(&self, _raw: &str) {}
            fn on_token_rotated(&self, _token: DeliveryToken) {}
        }

        let stream = DeliveryStream::new();
        let handler: Arc<dyn DeliveryHandler> = Arc::new(NullHandler);
        stream
            .start(
                "ws://127.0.0.1:1/notifications/stream".to_string(),
                DeliveryToken::new("tok-123"),
                handler.clone(),
            )
            .unwrap();
        stream
            .start(
                "ws://127.0.0.1:1/notifications/stream".to_string(),
                DeliveryToken::new("tok-123"),
                handler,
            )
            .unwrap();
        stream.stop();
        assert_eq!(stream.connection_state(), ConnectionState::Disconnected);
    }
}
