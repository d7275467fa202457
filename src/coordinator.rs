use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    error::NotifyError,
    history::HistoryCache,
    model::{DeliveryToken, DeviceType, PermissionState},
    permission::PermissionGate,
    provider::PushProvider,
    registry::NotificationRegistry,
};

/// Where the enable/disable flow currently stands. `Failed` is not
/// terminal; the next enable starts over from the top.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorState {
    Idle,
    RequestingPermission,
    AcquiringToken,
    Registering,
    Registered { token: DeliveryToken },
    Unregistering,
    /// `stale_token` is set when an unregister failed: the backend still
    /// holds the record, and a retried disable must re-issue the call.
    Failed {
        reason: NotifyError,
        stale_token: Option<DeliveryToken>,
    },
}

impl CoordinatorState {
    fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::RequestingPermission | Self::AcquiringToken | Self::Registering | Self::Unregistering
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::RequestingPermission => "RequestingPermission",
            Self::AcquiringToken => "AcquiringToken",
            Self::Registering => "Registering",
            Self::Registered { .. } => "Registered",
            Self::Unregistering => "Unregistering",
            Self::Failed { .. } => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnableOutcome {
    Registered(DeliveryToken),
    /// Enable while already registered is a no-op.
    AlreadyRegistered,
    /// Another attempt holds the in-flight guard; this call folded into a
    /// no-op rather than racing a second token registration.
    AttemptInFlight,
}

/// Drives permission -> token -> registration strictly in that order, one
/// outstanding attempt at a time. Never auto-retries; a retry is a fresh
/// user-initiated call. Abandoned attempts still apply their result to this
/// shared state, UI callbacks for dead views are the caller's no-op.
pub struct RegistrationCoordinator {
    gate: PermissionGate,
    provider: Arc<dyn PushProvider>,
    registry: Arc<dyn NotificationRegistry>,
    history: Arc<HistoryCache>,
    device_type: DeviceType,
    state: Mutex<CoordinatorState>,
}

impl RegistrationCoordinator {
    pub fn new(
        gate: PermissionGate,
        provider: Arc<dyn PushProvider>,
        registry: Arc<dyn NotificationRegistry>,
        history: Arc<HistoryCache>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            gate,
            provider,
            registry,
            history,
            device_type,
            state: Mutex::new(CoordinatorState::Idle),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_failure(&self) -> Option<NotifyError> {
        match self.state() {
            CoordinatorState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn registered_token(&self) -> Option<DeliveryToken> {
        match self.state() {
            CoordinatorState::Registered { token } => Some(token),
            _ => None,
        }
    }

    /// User-initiated enable. Steps run strictly sequentially; each failure
    /// lands in `Failed` with the originating reason and is returned to the
    /// caller for display.
    pub async fn enable(&self) -> Result<EnableOutcome, NotifyError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                CoordinatorState::Registered { .. } => {
                    return Ok(EnableOutcome::AlreadyRegistered)
                }
                s if s.is_in_flight() => return Ok(EnableOutcome::AttemptInFlight),
                // Idle or Failed: take the guard and start over.
                _ => *state = CoordinatorState::RequestingPermission,
            }
        }

        // Skip the prompt when the gate already reports a granted decision,
        // e.g. a retry after a token failure.
        let permission = match self.gate.query() {
            PermissionState::Granted => PermissionState::Granted,
            PermissionState::Unsupported => PermissionState::Unsupported,
            PermissionState::Unasked | PermissionState::Denied => self.gate.request().await,
        };
        if permission != PermissionState::Granted {
            return Err(self.fail(NotifyError::PermissionDenied));
        }

        self.set_state(CoordinatorState::AcquiringToken);
        let token = match self.provider.acquire_token().await {
            Ok(token) => token,
            Err(error) => return Err(self.fail(error)),
        };

        self.set_state(CoordinatorState::Registering);
        if let Err(error) = self.registry.register(&token, self.device_type).await {
            return Err(self.fail(error));
        }

        self.set_state(CoordinatorState::Registered {
            token: token.clone(),
        });
        self.history.invalidate();
        tracing::info!(%token, device_type = self.device_type.as_str(), "notifications enabled");
        Ok(EnableOutcome::Registered(token))
    }

    /// Teardown on disable or logout. A no-op when nothing is registered.
    /// A failed unregister leaves the backend record behind, so the token
    /// is carried into `Failed` and a retried disable re-issues the call.
    pub async fn disable(&self) -> Result<(), NotifyError> {
        let token = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                CoordinatorState::Registered { token } => {
                    let token = token.clone();
                    *state = CoordinatorState::Unregistering;
                    token
                }
                CoordinatorState::Failed {
                    stale_token: Some(token),
                    ..
                } => {
                    let token = token.clone();
                    *state = CoordinatorState::Unregistering;
                    token
                }
                s if s.is_in_flight() => return Ok(()),
                _ => {
                    *state = CoordinatorState::Idle;
                    return Ok(());
                }
            }
        };

        match self.registry.unregister(&token).await {
            Ok(()) => {
                self.set_state(CoordinatorState::Idle);
                self.history.invalidate();
                tracing::info!(%token, "notifications disabled");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, %token, "unregister failed, keeping token for retry");
                self.set_state(CoordinatorState::Failed {
                    reason: error.clone(),
                    stale_token: Some(token),
                });
                Err(error)
            }
        }
    }

    /// Provider-initiated rotation: the old token is already dead, so the
    /// new one is registered without an unregister round-trip. Ignored when
    /// nothing is registered.
    pub async fn handle_token_rotation(&self, new_token: DeliveryToken) -> Result<(), NotifyError> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                CoordinatorState::Registered { .. } => {
                    *state = CoordinatorState::Registering;
                }
                _ => {
                    tracing::debug!(token = %new_token, "token rotation while not registered, ignoring");
                    return Ok(());
                }
            }
        }

        if let Err(error) = self.registry.register(&new_token, self.device_type).await {
            return Err(self.fail(error));
        }
        self.set_state(CoordinatorState::Registered {
            token: new_token.clone(),
        });
        self.history.invalidate();
        tracing::info!(token = %new_token, "delivery token re-registered after rotation");
        Ok(())
    }

    fn set_state(&self, next: CoordinatorState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = next;
    }

    fn fail(&self, error: NotifyError) -> NotifyError {
        tracing::warn!(%error, "registration attempt failed");
        self.set_state(CoordinatorState::Failed {
            reason: error.clone(),
            stale_token: None,
        });
        error
    }
}
