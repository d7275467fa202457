use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use crate::{consts::PROMPT_TIMEOUT_SECS, error::NotifyError, model::PermissionState};

/// Platform seam for notification consent. Implementations wrap whatever
/// the host exposes (browser Notification API, UNUserNotificationCenter,
/// a channel-level toggle).
#[async_trait]
pub trait HostPermissions: Send + Sync {
    /// Non-blocking read of the capability and any stored decision.
    fn current(&self) -> PermissionState;

    /// Shows the consent prompt and waits for the user, or auto-resolves if
    /// the host already holds a decision. Some hosts require a preceding
    /// user gesture; callers without one may see an error here, which the
    /// gate degrades to `Denied`.
    async fn prompt(&self) -> Result<PermissionState, NotifyError>;
}

/// Session-scoped view of notification consent.
///
/// Host errors never escape this type: a failed or ignored prompt resolves
/// to `Denied`, so callers treat "error during request" and "user said no"
/// identically.
pub struct PermissionGate {
    host: Arc<dyn HostPermissions>,
    cached: Mutex<PermissionState>,
}

impl PermissionGate {
    pub fn new(host: Arc<dyn HostPermissions>) -> Self {
        Self {
            host,
            cached: Mutex::new(PermissionState::Unasked),
        }
    }

    /// Non-blocking read. Falls back to the in-session decision when the
    /// host reports `Unasked` (hosts that forget a same-session answer).
    pub fn query(&self) -> PermissionState {
        let host_state = self.host.current();
        if host_state.is_decided() {
            self.remember(host_state);
            return host_state;
        }
        *self
            .cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Prompts the user and resolves to a decided state. Never hangs: the
    /// host call is bounded, and any host failure resolves to `Denied`.
    pub async fn request(&self) -> PermissionState {
        match self.host.current() {
            PermissionState::Unsupported => {
                self.remember(PermissionState::Unsupported);
                return PermissionState::Unsupported;
            }
            PermissionState::Granted => {
                self.remember(PermissionState::Granted);
                return PermissionState::Granted;
            }
            PermissionState::Unasked | PermissionState::Denied => {}
        }

        let outcome = tokio::time::timeout(
            Duration::from_secs(PROMPT_TIMEOUT_SECS),
            self.host.prompt(),
        )
        .await;

        let state = match outcome {
            Ok(Ok(state)) if state.is_decided() => state,
            Ok(Ok(_)) => PermissionState::Denied,
            Ok(Err(error)) => {
                tracing::warn!(%error, "permission prompt failed, treating as denied");
                PermissionState::Denied
            }
            Err(_) => {
                tracing::warn!("permission prompt timed out, treating as denied");
                PermissionState::Denied
            }
        };
        self.remember(state);
        state
    }

    fn remember(&self, state: PermissionState) {
        if state.is_decided() {
            *self
                .cached
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = state;
        }
    }
}
