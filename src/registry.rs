use std::time::Duration;

use async_trait::async_trait;

use crate::{
    consts::{ERROR_BODY_PREVIEW_CHARS, MAX_HISTORY_ENTRIES, REQUEST_TIMEOUT_SECS},
    core::truncate_message,
    error::NotifyError,
    model::{
        entry_cmp_desc, DeliveryToken, DeviceType, NotificationEntry, RegisterTokenBody,
        UnregisterTokenBody,
    },
    settings::normalize_base_url,
};

/// Write-mostly client view of the backend registration record plus the
/// historical log. The backend enforces at-most-one active record per
/// `(user, token)`; the client only needs to treat idempotent-success like
/// fresh-insert success.
#[async_trait]
pub trait NotificationRegistry: Send + Sync {
    async fn register(
        &self,
        token: &DeliveryToken,
        device_type: DeviceType,
    ) -> Result<(), NotifyError>;

    /// Idempotent delete; unregistering an unknown token is a no-op
    /// success.
    async fn unregister(&self, token: &DeliveryToken) -> Result<(), NotifyError>;

    /// Entries ordered `receivedAt` descending.
    async fn fetch_history(&self) -> Result<Vec<NotificationEntry>, NotifyError>;
}

pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpRegistry {
    pub fn new(base_url: &str, auth_token: impl Into<String>) -> Result<Self, NotifyError> {
        let base_url = normalize_base_url(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| {
                NotifyError::settings(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            client,
            base_url,
            auth_token: auth_token.into(),
        })
    }

    async fn post_json<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(u16, String), NotifyError> {
        let endpoint = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await
            .map_err(|error| transport_error(path, &error))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read response body>".to_string());
        Ok((status, body))
    }
}

fn transport_error(path: &str, error: &reqwest::Error) -> NotifyError {
    if error.is_timeout() {
        return NotifyError::rejected(None, format!("request to {path} timed out"));
    }
    NotifyError::rejected(None, format!("request to {path} failed: {error}"))
}

pub(crate) fn interpret_register_response(status: u16, body: &str) -> Result<(), NotifyError> {
    // Fresh insert and idempotent upsert both come back 2xx and are
    // indistinguishable here, which is exactly what callers want.
    if (200..300).contains(&status) {
        return Ok(());
    }
    Err(NotifyError::rejected(
        Some(status),
        format!(
            "register-token failed with HTTP {status}: {}",
            truncate_message(body, ERROR_BODY_PREVIEW_CHARS)
        ),
    ))
}

pub(crate) fn interpret_unregister_response(status: u16, body: &str) -> Result<(), NotifyError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    // Unknown token: the mapping is already gone, idempotent delete.
    if status == 404 {
        return Ok(());
    }
    Err(NotifyError::rejected(
        Some(status),
        format!(
            "unregister-token failed with HTTP {status}: {}",
            truncate_message(body, ERROR_BODY_PREVIEW_CHARS)
        ),
    ))
}

/// The backend promises descending order but the cache re-sorts anyway and
/// drops duplicate ids, then bounds the page.
pub(crate) fn normalize_history(mut entries: Vec<NotificationEntry>) -> Vec<NotificationEntry> {
    entries.sort_by(|a, b| a.id.cmp(&b.id));
    entries.dedup_by(|a, b| a.id == b.id);
    entries.sort_by(entry_cmp_desc);
    if entries.len() > MAX_HISTORY_ENTRIES {
        entries.truncate(MAX_HISTORY_ENTRIES);
    }
    entries
}

#[async_trait]
impl NotificationRegistry for HttpRegistry {
    async fn register(
        &self,
        token: &DeliveryToken,
        device_type: DeviceType,
    ) -> Result<(), NotifyError> {
        let body = RegisterTokenBody {
            token: token.as_str(),
            device_type,
        };
        let (status, body_text) = self
            .post_json("/notifications/register-token", &body)
            .await?;
        tracing::debug!(%token, device_type = device_type.as_str(), status, "register-token");
        interpret_register_response(status, &body_text)
    }

    async fn unregister(&self, token: &DeliveryToken) -> Result<(), NotifyError> {
        let body = UnregisterTokenBody {
            token: token.as_str(),
        };
        let (status, body_text) = self
            .post_json("/notifications/unregister-token", &body)
            .await?;
        tracing::debug!(%token, status, "unregister-token");
        interpret_unregister_response(status, &body_text)
    }

    async fn fetch_history(&self) -> Result<Vec<NotificationEntry>, NotifyError> {
        let endpoint = format!("{}/notifications/history", self.base_url);
        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|error| transport_error("/notifications/history", &error))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read response body>".to_string());
            return Err(NotifyError::rejected(
                Some(status),
                format!(
                    "history fetch failed with HTTP {status}: {}",
                    truncate_message(&body, ERROR_BODY_PREVIEW_CHARS)
                ),
            ));
        }

        let entries = response
            .json::<Vec<NotificationEntry>>()
            .await
            .map_err(|error| {
                NotifyError::rejected(None, format!("failed to decode history: {error}"))
            })?;
        Ok(normalize_history(entries))
    }
}
