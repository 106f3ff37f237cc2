use chrono::{DateTime, FixedOffset, Local, Timelike};

use crate::error::LeetError;

/// Wall-clock instant with the UTC offset it was observed in. All target-time
/// comparisons use the local wall-clock fields, never UTC.
pub type Timestamp = DateTime<FixedOffset>;

/// Score points. Totals may go negative through near misses.
pub type Points = i64;

// ── Environment ──────────────────────────────────────────────────────────────

/// Source of "now" for the scoring path.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The host's local clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let now = Local::now();
        now.with_timezone(now.offset())
    }
}

/// Outbound message delivery to a chat channel.
pub trait Notifier: Send + Sync {
    fn send(&self, channel: &str, text: &str) -> Result<(), LeetError>;
}

/// Rejects deliveries that could never succeed, before touching the transport.
pub fn check_outgoing(channel: &str, text: &str) -> Result<(), LeetError> {
    if channel.is_empty() {
        return Err(LeetError::EmptyChannel);
    }
    if text.is_empty() {
        return Err(LeetError::EmptyMessage);
    }
    Ok(())
}

// ── Formatting ───────────────────────────────────────────────────────────────

/// `[HH:MM:SS:nnnnnnnnn]`, the stamp echoed back on every attempt.
pub fn entry_stamp(t: &Timestamp) -> String {
    format!(
        "[{:02}:{:02}:{:02}:{:09}]",
        t.hour(),
        t.minute(),
        t.second(),
        t.nanosecond()
    )
}

/// Seconds and nanoseconds as one digit string, e.g. `00001337123`. Bonus
/// rules search this for lucky patterns.
pub fn bonus_probe(t: &Timestamp) -> String {
    format!("{:02}{:09}", t.second(), t.nanosecond())
}

/// Full date and time down to the nanosecond.
pub fn long_date(t: &Timestamp) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32, nanos: u32) -> Timestamp {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, h, m, s)
            .unwrap()
            .with_nanosecond(nanos)
            .unwrap()
    }

    #[test]
    fn stamp_and_probe_are_zero_padded() {
        let t = at(13, 37, 0, 1_337);
        assert_eq!(entry_stamp(&t), "[13:37:00:000001337]");
        assert_eq!(bonus_probe(&t), "00000001337");
    }

    #[test]
    fn outgoing_requires_channel_and_text() {
        assert!(matches!(check_outgoing("", "hi"), Err(LeetError::EmptyChannel)));
        assert!(matches!(check_outgoing("#c", ""), Err(LeetError::EmptyMessage)));
        assert!(check_outgoing("#c", "hi").is_ok());
    }
}
