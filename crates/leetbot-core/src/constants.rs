//! ─── leetbot game constants ─────────────────────────────────────────────────
//!
//! Participants race to post the trigger inside the target minute. The target
//! time doubles as the season's target score: 13:37 -> 1337 points.

use std::time::Duration;

// ── Target time ──────────────────────────────────────────────────────────────

/// Default target hour (local time).
pub const DEFAULT_HOUR: u32 = 13;

/// Default target minute.
pub const DEFAULT_MINUTE: u32 = 37;

/// Default tolerance on each side of the target minute, in whole minutes.
pub const DEFAULT_TOLERANCE_MINUTES: u32 = 1;

// ── Scoring ──────────────────────────────────────────────────────────────────

/// Points for arriving inside the window but outside the target minute.
pub const NEAR_MISS_POINTS: i64 = -1;

/// Points for arriving inside the target minute. Positive points for on-time
/// arrivals are granted by rank at settlement.
pub const ON_TIME_POINTS: i64 = 0;

/// After a scored attempt, further attempts by the same user are rejected for
/// this long.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2 * 60);

// ── Scheduling ───────────────────────────────────────────────────────────────

/// Delay between the first accepted attempt and the deferred save.
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_secs(5 * 60);

/// Minimum delay between the first accepted attempt and round settlement.
/// Settlement is pushed back further when the window is still open.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3 * 60);

/// How long before the target minute the daily clock check runs.
pub const DEFAULT_OFFSET_CHECK_LEAD: Duration = Duration::from_secs(5 * 60);

/// Give up on an SNTP reply after this long.
pub const SNTP_TIMEOUT: Duration = Duration::from_secs(5);

// ── Files ────────────────────────────────────────────────────────────────────

pub const DEFAULT_SCORE_FILE: &str = "/tmp/leetbot_scores.json";
pub const DEFAULT_BONUS_FILE: &str = "/tmp/leetbot_bonusconfigs.json";
