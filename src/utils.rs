use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

pub fn now_ts() -> f64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs_f64()
}

pub fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Timestamp-derived comment id. The millisecond prefix keeps ids roughly
/// sortable by arrival; the suffix keeps concurrent writers from colliding.
pub fn comment_id() -> String {
    let ms = Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", ms, &suffix[..8])
}
