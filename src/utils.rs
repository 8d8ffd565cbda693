use chrono::{DateTime, Utc};

/// Build a namespaced counter key for a rate-limit window.
pub fn format_window_key(subject: &str, window: &str) -> String {
    format!("rate_limit:{}:{}", subject, window)
}

/// Whole seconds until `when`, rounded up. Returns 0 for past instants.
pub fn secs_until(when: DateTime<Utc>) -> u64 {
    let millis = (when - Utc::now()).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1000) as u64
    }
}
