pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 15;
pub(crate) const PROMPT_TIMEOUT_SECS: u64 = 120;

/// How long a fetched history page is served from memory before the next
/// read refetches. A performance knob, not a correctness one.
pub(crate) const HISTORY_FRESH_SECS: u64 = 180;
pub(crate) const MAX_HISTORY_ENTRIES: usize = 500;

pub(crate) const STREAM_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const STREAM_LIVENESS_CHECK_INTERVAL_SECS: u64 = 15;
pub(crate) const STREAM_LIVENESS_IDLE_SECS: u64 = 90;
pub(crate) const STREAM_LIVENESS_PING_GRACE_SECS: u64 = 30;
pub(crate) const BACKOFF_MAX_SECS: u64 = 30;

pub(crate) const ERROR_BODY_PREVIEW_CHARS: usize = 200;

pub(crate) const PAUSE_FOREVER_SENTINEL: u64 = 0;
pub(crate) const PAUSE_MODE_15M: &str = "15m";
pub(crate) const PAUSE_MODE_1H: &str = "1h";
pub(crate) const PAUSE_MODE_CUSTOM: &str = "custom";
pub(crate) const PAUSE_MODE_FOREVER: &str = "forever";
