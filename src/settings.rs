use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    consts::{
        HISTORY_FRESH_SECS, PAUSE_FOREVER_SENTINEL, PAUSE_MODE_15M, PAUSE_MODE_1H,
        PAUSE_MODE_CUSTOM, PAUSE_MODE_FOREVER,
    },
    core::{restrict_file_permissions, unix_now_secs},
    error::NotifyError,
    model::DeviceType,
};

const KEYRING_SERVICE: &str = "pushbridge";
const KEYRING_AUTH_USER: &str = "backend-auth";

/// Non-secret settings, stored as JSON with 0o600 perms. The backend auth
/// token lives in the OS keychain, never in this file.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    /// Push relay stream endpoint override; empty means derive from
    /// `base_url`.
    pub stream_url: String,
    pub device_type: DeviceType,
    pub history_fresh_secs: u64,
    pub pause_until: Option<u64>,
    pub pause_mode: Option<String>,
    pub quiet_hours_start: Option<u8>,
    pub quiet_hours_end: Option<u8>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            stream_url: String::new(),
            device_type: DeviceType::default(),
            history_fresh_secs: HISTORY_FRESH_SECS,
            pause_until: None,
            pause_mode: None,
            quiet_hours_start: None,
            quiet_hours_end: None,
        }
    }
}

impl Settings {
    pub fn history_ttl(&self) -> Duration {
        Duration::from_secs(self.history_fresh_secs.max(1))
    }

    /// Whether the user has locally paused notification display.
    pub fn notifications_paused(&self, now: u64) -> bool {
        match self.pause_until {
            Some(until) => until == PAUSE_FOREVER_SENTINEL || now < until,
            None => false,
        }
    }

    pub fn stream_endpoint(&self) -> Result<String, NotifyError> {
        if !self.stream_url.trim().is_empty() {
            return build_stream_ws_url(self.stream_url.trim());
        }
        build_stream_ws_url(&self.base_url)
    }
}

/// Explicit context object for the settings file path; components hold one
/// of these instead of reaching for process globals.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is not an error, it means defaults.
    pub fn load(&self) -> Result<Settings, NotifyError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|error| NotifyError::settings(format!("failed to read settings: {error}")))?;
        serde_json::from_str::<Settings>(&content)
            .map_err(|error| NotifyError::settings(format!("failed to parse settings: {error}")))
    }

    pub fn save(&self, settings: &Settings) -> Result<(), NotifyError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                NotifyError::settings(format!("failed to create settings directory: {error}"))
            })?;
        }
        let content = serde_json::to_string_pretty(settings).map_err(|error| {
            NotifyError::settings(format!("failed to serialize settings: {error}"))
        })?;
        fs::write(&self.path, content)
            .map_err(|error| NotifyError::settings(format!("failed to write settings: {error}")))?;
        restrict_file_permissions(&self.path);
        Ok(())
    }

    pub fn save_auth_token(&self, token: &str) -> Result<(), NotifyError> {
        if token.trim().is_empty() {
            return Err(NotifyError::settings("auth token is required"));
        }
        auth_entry()?
            .set_password(token.trim())
            .map_err(|error| NotifyError::settings(format!("failed to store auth token: {error}")))
    }

    pub fn load_auth_token(&self) -> Result<Option<String>, NotifyError> {
        match auth_entry()?.get_password() {
            Ok(token) if !token.trim().is_empty() => Ok(Some(token)),
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(NotifyError::settings(format!(
                "failed to read auth token: {error}"
            ))),
        }
    }

    pub fn clear_auth_token(&self) -> Result<(), NotifyError> {
        match auth_entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(NotifyError::settings(format!(
                "failed to clear auth token: {error}"
            ))),
        }
    }

    pub fn pause_notifications(&self, minutes: u64) -> Result<(), NotifyError> {
        if minutes == 0 {
            return Err(NotifyError::settings(
                "pause duration must be greater than 0 minutes",
            ));
        }
        let until = unix_now_secs().saturating_add(minutes.saturating_mul(60));
        let mode = match minutes {
            15 => PAUSE_MODE_15M,
            60 => PAUSE_MODE_1H,
            _ => PAUSE_MODE_CUSTOM,
        };
        self.set_pause(Some(until), Some(mode))
    }

    pub fn pause_notifications_forever(&self) -> Result<(), NotifyError> {
        self.set_pause(Some(PAUSE_FOREVER_SENTINEL), Some(PAUSE_MODE_FOREVER))
    }

    pub fn resume_notifications(&self) -> Result<(), NotifyError> {
        self.set_pause(None, None)
    }

    fn set_pause(&self, until: Option<u64>, mode: Option<&str>) -> Result<(), NotifyError> {
        let mut settings = self.load()?;
        settings.pause_until = until;
        settings.pause_mode = mode.map(str::to_string);
        self.save(&settings)
    }
}

fn auth_entry() -> Result<keyring::Entry, NotifyError> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_AUTH_USER)
        .map_err(|error| NotifyError::settings(format!("keychain unavailable: {error}")))
}

pub fn normalize_base_url(input: &str) -> Result<String, NotifyError> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(NotifyError::settings("server URL is required"));
    }

    let url = reqwest::Url::parse(trimmed)
        .map_err(|error| NotifyError::settings(format!("invalid server URL: {error}")))?;

    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(NotifyError::settings(
            "server URL must start with http:// or https://",
        ));
    }

    Ok(trimmed.to_string())
}

/// Derives the websocket delivery endpoint from an http(s) base URL.
pub fn build_stream_ws_url(base_url: &str) -> Result<String, NotifyError> {
    let normalized = normalize_base_url(base_url)?;
    let mut ws_url = reqwest::Url::parse(&normalized)
        .map_err(|error| NotifyError::settings(format!("invalid server URL: {error}")))?;

    match ws_url.scheme() {
        "http" => {
            ws_url
                .set_scheme("ws")
                .map_err(|_| NotifyError::settings("unable to convert URL scheme to ws"))?;
        }
        "https" => {
            ws_url
                .set_scheme("wss")
                .map_err(|_| NotifyError::settings("unable to convert URL scheme to wss"))?;
        }
        _ => {
            return Err(NotifyError::settings(
                "server URL must start with http:// or https://",
            ))
        }
    }

    let mut path = ws_url.path().trim_end_matches('/').to_string();
    path.push_str("/notifications/stream");
    ws_url.set_path(&path);
    Ok(ws_url.to_string())
}
