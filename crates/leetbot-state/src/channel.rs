use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Datelike;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use leetbot_core::bonus::BonusRuleSet;
use leetbot_core::types::{Points, Timestamp};

use crate::report::{self, ResultLine, StatsLine};
use crate::user::{User, UserRecord};

/// Per-channel taxation settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxPolicy {
    /// Inspection tax cap as a percentage of the round's lowest total.
    /// Zero or below disables inspection taxes.
    #[serde(default)]
    pub inspection_tax: f64,
    /// Deduction step for users past the target. Zero or below disables it.
    #[serde(default)]
    pub overshoot_tax: Points,
    /// Inspect every round instead of on a 1-in-7 weekday draw.
    #[serde(default)]
    pub inspect_always: bool,
    /// Allow inspecting rounds with a single contestant.
    #[serde(default)]
    pub tax_loners: bool,
    /// Post to the channel why no inspection happened.
    #[serde(default)]
    pub post_tax_fail: bool,
}

/// Persisted form of a [`Channel`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
    #[serde(flatten)]
    pub policy: TaxPolicy,
}

/// Outcome of the inspection draw. `weekday` and `random` are only set when
/// the weekday draw actually ran (Sunday = 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InspectionDecision {
    pub inspect: bool,
    pub weekday: Option<u32>,
    pub random: Option<u32>,
}

/// The contestant picked for inspection and what they paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    pub nick: String,
    pub index: usize,
    pub tax: Points,
}

/// Everything a settlement produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Header plus one line per affected user, newline terminated.
    pub report: String,
    pub lines: Vec<ResultLine>,
    /// Reasons inspection did not happen, when the channel asks for them.
    pub notices: Vec<String>,
    pub inspection: Option<Inspection>,
}

#[derive(Debug, Default)]
struct ChannelState {
    users: HashMap<String, Arc<User>>,
    /// On-time contestants of the current round in arrival order.
    contestants: Vec<String>,
    policy: TaxPolicy,
}

impl ChannelState {
    fn user(&mut self, nick: &str) -> Arc<User> {
        Arc::clone(
            self.users
                .entry(nick.to_string())
                .or_insert_with(|| Arc::new(User::new(nick))),
        )
    }

    fn winner_rank(&self, nick: &str) -> Option<usize> {
        let mut winners: Vec<(Option<Timestamp>, &str)> = self
            .users
            .values()
            .filter(|u| u.is_locked())
            .map(|u| (u.last_entry(), u.nick()))
            .collect();
        winners.sort();
        winners.iter().position(|(_, n)| *n == nick)
    }

    fn nick_width(&self) -> usize {
        report::nick_width(self.users.keys().map(String::as_str))
    }
}

/// The players and current round of one chat channel.
#[derive(Debug)]
pub struct Channel {
    name: String,
    state: RwLock<ChannelState>,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_record(name, ChannelRecord::default())
    }

    pub fn from_record(name: impl Into<String>, record: ChannelRecord) -> Self {
        let users = record
            .users
            .into_iter()
            .map(|(nick, rec)| {
                let user = Arc::new(User::from_record(nick.clone(), rec));
                (nick, user)
            })
            .collect();
        Self {
            name: name.into(),
            state: RwLock::new(ChannelState {
                users,
                contestants: Vec::new(),
                policy: record.policy,
            }),
        }
    }

    pub fn record(&self) -> ChannelRecord {
        let state = self.read();
        ChannelRecord {
            users: state
                .users
                .iter()
                .map(|(nick, user)| (nick.clone(), user.record()))
                .collect(),
            policy: state.policy,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ChannelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChannelState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get or create.
    pub fn user(&self, nick: &str) -> Arc<User> {
        if let Some(user) = self.read().users.get(nick) {
            return Arc::clone(user);
        }
        self.write().user(nick)
    }

    /// Lookup without creating.
    pub fn get(&self, nick: &str) -> Option<Arc<User>> {
        self.read().users.get(nick).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.read().users.len()
    }

    pub fn policy(&self) -> TaxPolicy {
        self.read().policy
    }

    pub fn set_policy(&self, policy: TaxPolicy) {
        self.write().policy = policy;
    }

    // ── Round ────────────────────────────────────────────────────────────────

    /// Append an on-time contestant. Returns its 1-based arrival rank.
    pub fn add_contestant(&self, nick: &str) -> usize {
        let mut state = self.write();
        state.contestants.push(nick.to_string());
        state.contestants.len()
    }

    pub fn has_pending_round(&self) -> bool {
        !self.read().contestants.is_empty()
    }

    pub fn contestants(&self) -> Vec<String> {
        self.read().contestants.clone()
    }

    // ── Taxation ─────────────────────────────────────────────────────────────

    pub fn should_inspect<R: Rng + ?Sized>(&self, now: &Timestamp, contestants: usize, rng: &mut R) -> InspectionDecision {
        decide_inspection(&self.policy(), now, contestants, rng)
    }

    pub fn overshoot_tax_for(&self, target: Points, points: Points) -> Points {
        overshoot_tax(&self.policy(), target, points)
    }

    /// Largest inspection tax for a round whose lowest total is `lowest`.
    pub fn inspection_cap(&self, lowest: Points) -> Points {
        max_round_tax(&self.policy(), lowest).floor() as Points
    }

    /// 0-based position of `nick` among locked users ordered by last entry,
    /// `None` if `nick` is not a winner.
    pub fn winner_rank(&self, nick: &str) -> Option<usize> {
        self.read().winner_rank(nick)
    }

    /// Close the current round: inspection draw, rank points, overshoot and
    /// inspection taxes, locking. Clears the contestant list.
    pub fn settle_round<R: Rng + ?Sized>(
        &self,
        target: Points,
        rules: &BonusRuleSet,
        now: &Timestamp,
        rng: &mut R,
    ) -> Settlement {
        let mut state = self.write();
        let policy = state.policy;
        let contestants = std::mem::take(&mut state.contestants);
        let count = contestants.len();
        let mut notices = Vec::new();

        let decision = decide_inspection(&policy, now, count, rng);
        let inspection = if decision.inspect {
            let lowest = contestants
                .iter()
                .map(|nick| state.user(nick).points())
                .min()
                .unwrap_or(0);
            if policy.inspection_tax > 0.0 && lowest < 1 {
                notices.push("No tax today, as we have a participant with less than 1 points".to_string());
            }
            let max_tax = max_round_tax(&policy, lowest);
            if max_tax < 1.0 {
                notices.push(format!("No tax today. Calculated tax was: {max_tax:.6}"));
                None
            } else {
                let index = rng.gen_range(0..count);
                let tax = rng.gen_range(0..=max_tax.floor() as Points);
                Some(Inspection {
                    nick: contestants[index].clone(),
                    index,
                    tax,
                })
            }
        } else {
            if let (Some(weekday), Some(random)) = (decision.weekday, decision.random) {
                notices.push(format!("No tax today :) Weekday = {weekday}, random = {random}"));
            }
            None
        };
        debug!(channel = %self.name, ?decision, ?inspection, "inspection drawn");
        if !policy.post_tax_fail {
            notices.clear();
        }

        for (idx, nick) in contestants.iter().enumerate() {
            state.user(nick).add_points((count - idx) as Points);
        }

        let mut overshooters: Vec<Arc<User>> = state
            .users
            .values()
            .filter(|u| u.points() >= target)
            .cloned()
            .collect();
        overshooters.sort_by(|a, b| a.nick().cmp(b.nick()));

        let mut lines = Vec::with_capacity(count + overshooters.len());
        for (idx, nick) in contestants.iter().enumerate() {
            let user = state.user(nick);
            let os_tax = overshoot_tax(&policy, target, user.points());
            if os_tax > 0 {
                user.add_points(-os_tax);
                user.add_tax(os_tax);
            }
            let inspection_tax = inspection.as_ref().filter(|i| i.index == idx).map(|i| i.tax);
            if let Some(tax) = inspection_tax.filter(|t| *t > 0) {
                user.add_points(-tax);
                user.add_tax(tax);
            }
            if user.points() == target {
                user.lock();
            }
            lines.push(ResultLine {
                nick: nick.clone(),
                total: user.points(),
                rank_points: (count - idx) as Points,
                overshoot_tax: os_tax,
                inspection_tax,
                winner: None,
                greeting: None,
            });
        }

        let entered: HashSet<&str> = contestants.iter().map(String::as_str).collect();
        for user in overshooters.iter().filter(|u| !entered.contains(u.nick())) {
            let os_tax = overshoot_tax(&policy, target, user.points());
            if os_tax > 0 {
                user.add_points(-os_tax);
                user.add_tax(os_tax);
            }
            if user.points() == target {
                user.lock();
            }
            lines.push(ResultLine {
                nick: user.nick().to_string(),
                total: user.points(),
                overshoot_tax: os_tax,
                ..Default::default()
            });
        }

        // Winner ranks depend on every lock made above.
        for line in &mut lines {
            line.winner = state.winner_rank(&line.nick).map(|r| r + 1);
            line.greeting = rules.rule_for_points(line.total).map(|r| r.greeting.clone());
        }

        let width = state.nick_width();
        let mut out = report::results_header(now);
        out.push('\n');
        for line in &lines {
            out.push_str(&line.padded(width).to_string());
            out.push('\n');
        }

        Settlement {
            report: out,
            lines,
            notices,
            inspection,
        }
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    /// All users by descending points, nick ascending on ties.
    pub fn stats(&self, since: &Timestamp, rules: &BonusRuleSet) -> String {
        let state = self.read();
        if state.users.is_empty() {
            return report::no_users(&self.name);
        }

        let mut users: Vec<&Arc<User>> = state.users.values().collect();
        users.sort_by(|a, b| b.points().cmp(&a.points()).then_with(|| a.nick().cmp(b.nick())));

        let width = state.nick_width();
        let mut out = report::stats_header(since);
        out.push('\n');
        for user in users {
            let points = user.points();
            let row = StatsLine {
                nick: user.nick().to_string(),
                points,
                best_entry: user.best_entry_long(),
                winner: state.winner_rank(user.nick()).map(|r| r + 1),
                greeting: rules.rule_for_points(points).map(|r| r.greeting.clone()),
            };
            out.push_str(&row.render(width));
            out.push('\n');
        }
        out
    }
}

fn decide_inspection<R: Rng + ?Sized>(
    policy: &TaxPolicy,
    now: &Timestamp,
    contestants: usize,
    rng: &mut R,
) -> InspectionDecision {
    if policy.inspect_always {
        return InspectionDecision {
            inspect: true,
            weekday: None,
            random: None,
        };
    }
    if !policy.tax_loners && contestants < 2 {
        return InspectionDecision {
            inspect: false,
            weekday: None,
            random: None,
        };
    }
    let weekday = now.weekday().num_days_from_sunday();
    let random = rng.gen_range(0..=6);
    InspectionDecision {
        inspect: weekday == random,
        weekday: Some(weekday),
        random: Some(random),
    }
}

fn overshoot_tax(policy: &TaxPolicy, target: Points, points: Points) -> Points {
    if policy.overshoot_tax <= 0 || points == target {
        return 0;
    }
    let mut deduction = 0;
    while points - deduction >= target {
        deduction += policy.overshoot_tax;
    }
    deduction
}

fn max_round_tax(policy: &TaxPolicy, lowest: Points) -> f64 {
    if policy.inspection_tax <= 0.0 || lowest < 1 {
        return 0.0;
    }
    lowest as f64 / 100.0 * policy.inspection_tax
}
