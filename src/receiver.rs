use chrono::Timelike;

use crate::{
    core::{truncate_message, unix_now_secs},
    error::NotifyError,
    model::PushMessage,
    settings::SettingsStore,
};

/// Host-level notification display. Implementations must not block the
/// caller; slow work goes to a detached thread.
pub trait HostNotifier: Send + Sync {
    fn display(&self, message: &PushMessage) -> Result<(), NotifyError>;
}

/// Runs in the background execution context; invoked by the host push
/// mechanism whenever a payload arrives while the client is not focused.
///
/// Fire and forget: nothing observes a return value, and no state survives
/// between invocations, so a bad payload cannot poison the next one. The
/// settings file is re-read per payload because this context shares no
/// memory with the foreground.
pub struct BackgroundReceiver<N: HostNotifier> {
    notifier: N,
    settings: SettingsStore,
}

impl<N: HostNotifier> BackgroundReceiver<N> {
    pub fn new(notifier: N, settings: SettingsStore) -> Self {
        Self { notifier, settings }
    }

    pub fn on_message(&self, raw: &str) {
        let message = match PushMessage::parse(raw) {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(
                    %error,
                    payload = %truncate_message(raw, 140),
                    "dropping malformed push payload"
                );
                return;
            }
        };

        // Fail open on a bad settings read: a missing or corrupt file must
        // not swallow a valid push, so defaults (no pause, no quiet hours)
        // apply instead.
        let settings = self.settings.load().unwrap_or_else(|error| {
            tracing::warn!(%error, "failed to read settings, using defaults");
            crate::settings::Settings::default()
        });

        if settings.notifications_paused(unix_now_secs()) {
            tracing::debug!(title = %message.title, "notifications paused, suppressing push");
            return;
        }
        if is_quiet_hours(settings.quiet_hours_start, settings.quiet_hours_end) {
            tracing::debug!(title = %message.title, "quiet hours, suppressing push");
            return;
        }

        if let Err(error) = self.notifier.display(&message) {
            tracing::warn!(%error, title = %message.title, "host notification display failed");
        }
    }
}

pub(crate) fn is_quiet_hours(start: Option<u8>, end: Option<u8>) -> bool {
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => return false,
    };
    hour_in_quiet_window(chrono::Local::now().hour() as u8, start, end)
}

pub(crate) fn hour_in_quiet_window(now: u8, start: u8, end: u8) -> bool {
    if start == end {
        return true;
    }
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(target_os = "macos")]
pub use macos::MacNotifier;

#[cfg(target_os = "macos")]
mod macos {
    use std::thread;

    use mac_notification_sys::Notification;

    use super::HostNotifier;
    use crate::{core::truncate_message, error::NotifyError, model::PushMessage};

    const BUNDLE_ID_FALLBACKS: [&str; 3] = [
        "net.pushbridge.client",
        "com.apple.Terminal",
        "com.apple.Finder",
    ];

    /// macOS notification center display. The send happens on a detached
    /// thread; the data map cannot be attached to the banner itself, so it
    /// is only logged for interaction handlers living elsewhere.
    pub struct MacNotifier;

    impl HostNotifier for MacNotifier {
        fn display(&self, message: &PushMessage) -> Result<(), NotifyError> {
            ensure_notification_application();
            let title = message.title.clone();
            let body = truncate_message(&message.body, 220);
            thread::spawn(move || {
                let mut notification = Notification::new();
                notification
                    .title(&title)
                    .message(&body)
                    .default_sound()
                    .asynchronous(true);
                if let Err(error) = notification.send() {
                    tracing::warn!(%error, "failed to show macOS notification");
                }
            });
            Ok(())
        }
    }

    fn ensure_notification_application() {
        static INIT_NOTIFICATION_APP: std::sync::Once = std::sync::Once::new();
        INIT_NOTIFICATION_APP.call_once(|| {
            for bundle_id in BUNDLE_ID_FALLBACKS {
                match mac_notification_sys::set_application(bundle_id) {
                    Ok(_) => return,
                    Err(error) => {
                        tracing::debug!(bundle_id, %error, "notification bundle id rejected");
                    }
                }
            }
        });
    }
}
