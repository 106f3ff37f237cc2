use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use leetbot_core::constants::DEBOUNCE_WINDOW;
use leetbot_core::timeframe::TimeWindow;
use leetbot_core::types::{long_date, Points, Timestamp};

/// How often something happened and how much it amounted to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueTracker {
    pub times: u64,
    pub total: Points,
}

impl ValueTracker {
    /// Adds `amount`; only non-zero amounts count as an occurrence.
    pub fn add(&mut self, amount: Points) {
        if amount != 0 {
            self.times += 1;
        }
        self.total += amount;
    }
}

/// Persisted form of a [`User`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub score: Points,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub last_entry: Option<Timestamp>,
    #[serde(default)]
    pub best_entry: Option<Timestamp>,
    #[serde(default)]
    pub taxes: ValueTracker,
    #[serde(default)]
    pub bonuses: ValueTracker,
    #[serde(default)]
    pub misses: ValueTracker,
}

/// Result of [`User::attempt_score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreAttempt {
    pub accepted: bool,
    pub total: Points,
}

#[derive(Debug, Default)]
struct UserState {
    record: UserRecord,
    /// Further attempts are rejected until this instant.
    debounce_until: Option<Instant>,
}

/// One participant in one channel.
#[derive(Debug)]
pub struct User {
    nick: String,
    state: RwLock<UserState>,
}

impl User {
    pub fn new(nick: impl Into<String>) -> Self {
        Self::from_record(nick, UserRecord::default())
    }

    pub fn from_record(nick: impl Into<String>, record: UserRecord) -> Self {
        Self {
            nick: nick.into(),
            state: RwLock::new(UserState {
                record,
                debounce_until: None,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, UserState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    // ── Scoring path ─────────────────────────────────────────────────────────

    /// Apply `delta` for an attempt at `when`, unless the user already scored
    /// within the debounce window. The best-entry update runs off this path.
    pub fn attempt_score(self: &Arc<Self>, delta: Points, when: Timestamp, window: &TimeWindow) -> ScoreAttempt {
        let total = {
            let mut state = self.write();
            let now = Instant::now();
            if state.debounce_until.is_some_and(|until| now < until) {
                debug!(nick = %self.nick, "attempt rejected by debounce");
                return ScoreAttempt {
                    accepted: false,
                    total: state.record.score,
                };
            }
            state.debounce_until = Some(now + DEBOUNCE_WINDOW);
            state.record.last_entry = Some(when);
            state.record.score += delta;
            state.record.score
        };

        let window = *window;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let user = Arc::clone(self);
                handle.spawn(async move {
                    user.set_best_entry(when, &window);
                });
            }
            Err(_) => {
                self.set_best_entry(when, &window);
            }
        }

        ScoreAttempt {
            accepted: true,
            total,
        }
    }

    /// True while further attempts would be rejected.
    pub fn debounced(&self) -> bool {
        self.read()
            .debounce_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Keep `when` as the best entry if it is closer to the target minute
    /// than the current one. Returns whether it was kept.
    pub fn set_best_entry(&self, when: Timestamp, window: &TimeWindow) -> bool {
        let mut state = self.write();
        let Some(best) = state.record.best_entry else {
            state.record.best_entry = Some(when);
            return true;
        };

        let code = window.code(&when);
        if !code.inside_window() {
            return false;
        }
        let candidate = (code.closeness_rank(), window.distance(&when));
        let current = (window.code(&best).closeness_rank(), window.distance(&best));
        if candidate < current {
            state.record.best_entry = Some(when);
            true
        } else {
            false
        }
    }

    /// Round-rank points and taxes.
    pub fn add_points(&self, delta: Points) -> Points {
        let mut state = self.write();
        state.record.score += delta;
        state.record.score
    }

    /// Administrative override.
    pub fn set_points(&self, points: Points) {
        self.write().record.score = points;
    }

    pub fn lock(&self) {
        self.write().record.locked = true;
    }

    pub fn add_tax(&self, amount: Points) {
        self.write().record.taxes.add(amount);
    }

    pub fn add_bonus(&self, amount: Points) {
        self.write().record.bonuses.add(amount);
    }

    pub fn add_miss(&self) {
        self.write().record.misses.add(1);
    }

    // ── Getters ──────────────────────────────────────────────────────────────

    pub fn points(&self) -> Points {
        self.read().record.score
    }

    pub fn is_locked(&self) -> bool {
        self.read().record.locked
    }

    pub fn last_entry(&self) -> Option<Timestamp> {
        self.read().record.last_entry
    }

    pub fn best_entry(&self) -> Option<Timestamp> {
        self.read().record.best_entry
    }

    /// Best entry down to the nanosecond, or "never".
    pub fn best_entry_long(&self) -> String {
        self.best_entry()
            .map(|t| long_date(&t))
            .unwrap_or_else(|| "never".to_string())
    }

    pub fn taxes(&self) -> ValueTracker {
        self.read().record.taxes
    }

    pub fn bonuses(&self) -> ValueTracker {
        self.read().record.bonuses
    }

    pub fn misses(&self) -> ValueTracker {
        self.read().record.misses
    }

    pub fn record(&self) -> UserRecord {
        self.read().record.clone()
    }
}
