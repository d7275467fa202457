use std::{
    fs,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

pub(crate) fn truncate_message(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }

    let truncated: String = input.chars().take(max_chars).collect();
    format!("{truncated}...")
}

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Delivery and auth tokens never hit the logs in full.
pub(crate) fn redact_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    format!("{visible}***(len={})", token.chars().count())
}

pub(crate) fn restrict_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        if path.exists() {
            if let Err(error) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                tracing::warn!(?path, %error, "failed to restrict file permissions");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_input() {
        assert_eq!(truncate_message("hello", 10), "hello");
    }

    #[test]
    fn truncate_appends_marker() {
        assert_eq!(truncate_message("hello world", 5), "hello...");
    }

    #[test]
    fn redacted_token_hides_tail() {
        let redacted = redact_token("tok-1234567890");
        assert!(redacted.starts_with("tok-"));
        assert!(!redacted.contains("1234567890"));
    }
}
