use thiserror::Error;

/// Failure taxonomy for the notification subsystem.
///
/// None of these are fatal to the embedding app; the app stays fully usable
/// with notifications disabled. Timeouts surface as the failing step's
/// variant with a timeout-marked reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The user or the host declined the notification prompt. Recoverable by
    /// asking again later from a fresh user gesture.
    #[error("notification permission denied")]
    PermissionDenied,

    /// The push provider could not issue a delivery token. Recoverable via
    /// retry with backoff.
    #[error("push provider could not issue a delivery token: {reason}")]
    TokenUnavailable { reason: String },

    /// The backend rejected a register/unregister/history call. When
    /// `auth_expired` is set the right response is re-authentication, not a
    /// blind retry.
    #[error("backend rejected the request: {reason}")]
    RegistrationRejected {
        status: Option<u16>,
        auth_expired: bool,
        reason: String,
    },

    /// A push payload that could not be decoded or was missing its
    /// title/body. Never surfaced to the user; the background context logs
    /// and drops it.
    #[error("malformed push payload: {reason}")]
    MalformedPayload { reason: String },

    /// Configuration layer failure (settings file, keychain).
    #[error("settings error: {reason}")]
    Settings { reason: String },
}

impl NotifyError {
    pub(crate) fn rejected(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::RegistrationRejected {
            status,
            auth_expired: matches!(status, Some(401) | Some(403)),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            reason: reason.into(),
        }
    }

    pub(crate) fn settings(reason: impl Into<String>) -> Self {
        Self::Settings {
            reason: reason.into(),
        }
    }

    /// Whether a fresh user-initiated attempt is worth offering.
    pub fn is_recoverable(&self) -> bool {
        !self.is_auth_expired()
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::RegistrationRejected {
                auth_expired: true,
                ..
            }
        )
    }

    /// Transient, dismissible copy naming the failure category. The app
    /// never blocks navigation or other features on any of these.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "Notifications are blocked for this app",
            Self::TokenUnavailable { .. } => "Couldn't enable notifications, try again",
            Self::RegistrationRejected { auth_expired, .. } => {
                if *auth_expired {
                    "Your session expired, sign in again to manage notifications"
                } else {
                    "Couldn't update notification settings, try again"
                }
            }
            Self::MalformedPayload { .. } | Self::Settings { .. } => {
                "Couldn't update notification settings, try again"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_status_marks_auth_expiry() {
        let error = NotifyError::rejected(Some(401), "HTTP 401");
        assert!(error.is_auth_expired());
        assert!(!error.is_recoverable());

        let error = NotifyError::rejected(Some(500), "HTTP 500");
        assert!(!error.is_auth_expired());
        assert!(error.is_recoverable());
    }

    #[test]
    fn every_failure_has_user_copy() {
        for error in [
            NotifyError::PermissionDenied,
            NotifyError::TokenUnavailable {
                reason: "offline".to_string(),
            },
            NotifyError::rejected(None, "request failed"),
            NotifyError::malformed("no title"),
            NotifyError::settings("unreadable"),
        ] {
            assert!(!error.user_message().is_empty());
        }
    }
}
