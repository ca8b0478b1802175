//! Small text helpers for user-facing replies

/// Platform cap for plain messages (characters)
pub const MESSAGE_LIMIT: usize = 4096;

/// Platform cap for media captions (characters)
pub const CAPTION_LIMIT: usize = 1024;

/// Compact "3 h 12 min" style rendering of a second count
pub fn human_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    if h > 0 {
        format!("{} h {} min", h, m)
    } else if m > 0 {
        format!("{} min", m)
    } else {
        "a few seconds".to_string()
    }
}

/// Strip NUL bytes and cut to at most `limit` characters
pub fn sanitize(text: &str, limit: usize) -> String {
    text.chars().filter(|c| *c != '\0').take(limit).collect()
}
