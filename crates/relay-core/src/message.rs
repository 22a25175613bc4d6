//! Message id generation and timestamps.

use chrono::{SecondsFormat, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for ensuring unique ids even within the same millisecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique message id.
///
/// Format: `msg_<unix-millis>_<counter>`. Collision-resistant within one
/// process lifetime; not required to be strictly ordered.
#[must_use]
pub fn generate_message_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("msg_{}_{:06x}", millis, counter & 0xff_ffff)
}

/// Current time as an ISO-8601 string with millisecond precision.
#[must_use]
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
