//! Push notification registration and delivery client.
//!
//! Covers the full enable/disable lifecycle for push notifications:
//! obtaining user consent ([`PermissionGate`]), acquiring a delivery token
//! from a provider ([`PushProvider`]) and registering it with the backend
//! ([`NotificationRegistry`]), receiving payloads in a background execution
//! context ([`BackgroundReceiver`], [`DeliveryStream`]) and keeping a
//! foreground read model of notification history ([`HistoryCache`]). The
//! [`RegistrationCoordinator`] sequences the whole flow as an explicit
//! state machine with typed, recoverable failures; nothing here is ever
//! fatal to the embedding app.

mod consts;
mod core;

pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod history;
pub mod model;
pub mod permission;
pub mod provider;
pub mod receiver;
pub mod registry;
pub mod settings;
pub mod stream;

pub use coordinator::{CoordinatorState, EnableOutcome, RegistrationCoordinator};
pub use diagnostics::RuntimeSnapshot;
pub use error::NotifyError;
pub use history::HistoryCache;
pub use model::{DeliveryToken, DeviceType, NotificationEntry, PermissionState, PushMessage};
pub use permission::{HostPermissions, PermissionGate};
pub use provider::{DeliveryHandler, PushProvider};
#[cfg(target_os = "macos")]
pub use receiver::MacNotifier;
pub use receiver::{BackgroundReceiver, HostNotifier};
pub use registry::{HttpRegistry, NotificationRegistry};
pub use settings::{build_stream_ws_url, normalize_base_url, Settings, SettingsStore};
pub use stream::{ConnectionState, DeliveryStream};
