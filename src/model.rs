use std::{cmp::Ordering, collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{core::redact_token, error::NotifyError};

/// Host-level notification consent.
///
/// `Unasked` only ever moves to `Granted` or `Denied` via an explicit user
/// decision; `Unsupported` is terminal and host-determined. Never persisted,
/// the cache lives for the process only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unsupported,
    Unasked,
    Granted,
    Denied,
}

impl PermissionState {
    /// Granted, Denied and Unsupported are settled for this session;
    /// Unasked is the only state a prompt can still change.
    pub fn is_decided(self) -> bool {
        !matches!(self, Self::Unasked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Web,
    Ios,
    Android,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Ios => "ios",
            Self::Android => "android",
        }
    }
}

/// Opaque provider-issued identifier for this device installation.
///
/// The client never assumes a token stays valid; provider rotation arrives
/// as an asynchronous event and triggers re-registration.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeliveryToken({})", redact_token(&self.0))
    }
}

impl fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact_token(&self.0))
    }
}

/// One backend-recorded notification. Immutable once created; the client's
/// only destructive operation against these is a cache refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub payload: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
}

/// Display order: `receivedAt` descending, id as a stable tiebreak.
pub(crate) fn entry_cmp_desc(a: &NotificationEntry, b: &NotificationEntry) -> Ordering {
    b.received_at
        .cmp(&a.received_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterTokenBody<'a> {
    pub(crate) token: &'a str,
    pub(crate) device_type: DeviceType,
}

#[derive(Debug, Serialize)]
pub(crate) struct UnregisterTokenBody<'a> {
    pub(crate) token: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PushPayloadWire {
    #[serde(default)]
    pub(crate) notification: Option<PushContentWire>,
    #[serde(default)]
    pub(crate) data: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct PushContentWire {
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) body: String,
}

/// A push payload that passed validation: title and body present, data map
/// carried along for the host notification.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

impl PushMessage {
    /// Decodes `{notification: {title, body}, data: {...}}`. Missing or
    /// empty title/body is a `MalformedPayload`, never a panic.
    pub fn parse(raw: &str) -> Result<Self, NotifyError> {
        let wire: PushPayloadWire = serde_json::from_str(raw)
            .map_err(|error| NotifyError::malformed(format!("undecodable payload: {error}")))?;
        let content = wire
            .notification
            .ok_or_else(|| NotifyError::malformed("missing notification block"))?;
        if content.title.trim().is_empty() {
            return Err(NotifyError::malformed("missing notification.title"));
        }
        if content.body.trim().is_empty() {
            return Err(NotifyError::malformed("missing notification.body"));
        }
        Ok(Self {
            title: content.title,
            body: content.body,
            data: wire.data,
        })
    }
}
