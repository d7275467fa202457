use async_trait::async_trait;

use crate::{error::NotifyError, model::DeliveryToken};

/// Provider-agnostic token capability (Firebase, APNs, a self-hosted
/// relay). The coordinator only talks to this trait; platform crates supply
/// the concrete implementation.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Requests a fresh delivery token. Callers must have observed a
    /// granted permission first; the coordinator enforces that ordering.
    /// Failure is recoverable, retry with backoff from a fresh attempt.
    async fn acquire_token(&self) -> Result<DeliveryToken, NotifyError>;
}

/// Events crossing out of the background delivery stream. Implementors must
/// not block: `on_payload` is fire and forget, `on_token_rotated` should
/// hand off to an async task for re-registration.
pub trait DeliveryHandler: Send + Sync {
    fn on_payload(&self, raw: &str);

    /// The provider rotated this installation's token; the current
    /// registration is stale until the new token is registered.
    fn on_token_rotated(&self, token: DeliveryToken);
}
