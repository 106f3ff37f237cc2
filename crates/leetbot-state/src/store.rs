use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use leetbot_core::bonus::{BonusHits, BonusRuleSet};
use leetbot_core::error::LeetError;
use leetbot_core::timeframe::{TemporalCode, TimeWindow};
use leetbot_core::types::{bonus_probe, entry_stamp, Points, Timestamp};

use crate::channel::{Channel, ChannelRecord, Settlement};
use crate::report;

/// Persisted form of a [`ScoreStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub botstart: Timestamp,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelRecord>,
}

/// Why an attempt scored nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OutsideWindow,
    AlreadyTried,
}

/// What happened to one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Rejected {
        reason: Rejection,
        message: Option<String>,
    },
    /// Inside the window but outside the target minute.
    Missed {
        code: TemporalCode,
        total: Points,
        bonus: BonusHits,
        message: String,
    },
    Scored {
        rank: usize,
        total: Points,
        bonus: BonusHits,
        message: String,
    },
}

impl AttemptOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Reply for the channel, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => message.as_deref(),
            Self::Missed { message, .. } | Self::Scored { message, .. } => Some(message),
        }
    }
}

/// Season state for every channel.
pub struct ScoreStore {
    bot_start: RwLock<Timestamp>,
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    save_in_progress: AtomicBool,
    settling: Mutex<HashSet<String>>,
    saves_completed: AtomicU64,
    /// Serializes file writes so the last rename carries the latest state.
    file_lock: Mutex<()>,
}

impl ScoreStore {
    pub fn new(bot_start: Timestamp) -> Self {
        Self::from_record(StoreRecord {
            botstart: bot_start,
            channels: BTreeMap::new(),
        })
    }

    pub fn from_record(record: StoreRecord) -> Self {
        Self {
            bot_start: RwLock::new(record.botstart),
            channels: RwLock::new(build_channels(record.channels)),
            save_in_progress: AtomicBool::new(false),
            settling: Mutex::new(HashSet::new()),
            saves_completed: AtomicU64::new(0),
            file_lock: Mutex::new(()),
        }
    }

    pub fn bot_start(&self) -> Timestamp {
        *self.bot_start.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get or create.
    pub fn channel(&self, name: &str) -> Arc<Channel> {
        if let Some(ch) = self.get_channel(name) {
            return ch;
        }
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            channels
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Channel::new(name))),
        )
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    // ── Scoring ──────────────────────────────────────────────────────────────

    pub fn try_score(
        &self,
        channel: &str,
        nick: &str,
        when: Timestamp,
        window: &TimeWindow,
        rules: &BonusRuleSet,
    ) -> AttemptOutcome {
        let code = window.code(&when);
        if !code.inside_window() {
            return AttemptOutcome::Rejected {
                reason: Rejection::OutsideWindow,
                message: None,
            };
        }

        let bonus = rules.evaluate(&bonus_probe(&when));
        let ch = self.channel(channel);
        let user = ch.user(nick);
        let attempt = user.attempt_score(TimeWindow::base_points(code) + bonus.total(), when, window);
        if !attempt.accepted {
            return AttemptOutcome::Rejected {
                reason: Rejection::AlreadyTried,
                message: Some(format!("{nick}: Stop spamming!")),
            };
        }
        user.add_bonus(bonus.total());

        let stamp = entry_stamp(&when);
        if code.near_miss() {
            user.add_miss();
            let mut message = format!("{stamp} Too {code}, sucker! {nick}: {}", attempt.total);
            if !bonus.is_empty() {
                message.push_str(&format!(" (but: {bonus})"));
            }
            debug!(channel, nick, %code, total = attempt.total, "near miss");
            return AttemptOutcome::Missed {
                code,
                total: attempt.total,
                bonus,
                message,
            };
        }

        let rank = ch.add_contestant(nick);
        let mut message = format!("{stamp} Whoop! {nick}: #{rank}");
        if !bonus.is_empty() {
            message.push_str(&format!(" ({bonus})"));
        }
        debug!(channel, nick, rank, "on time");
        AttemptOutcome::Scored {
            rank,
            total: attempt.total,
            bonus,
            message,
        }
    }

    /// Settle the current round of `channel`. `None` for an unknown channel.
    pub fn settle<R: Rng + ?Sized>(
        &self,
        channel: &str,
        target: Points,
        rules: &BonusRuleSet,
        now: &Timestamp,
        rng: &mut R,
    ) -> Option<Settlement> {
        let ch = self.get_channel(channel)?;
        Some(ch.settle_round(target, rules, now, rng))
    }

    pub fn stats(&self, channel: &str, rules: &BonusRuleSet) -> String {
        match self.get_channel(channel) {
            Some(ch) => ch.stats(&self.bot_start(), rules),
            None => report::no_users(channel),
        }
    }

    // ── Guards ───────────────────────────────────────────────────────────────

    pub fn try_begin_save(&self) -> bool {
        self.save_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_save(&self) {
        self.save_in_progress.store(false, Ordering::Release);
    }

    pub fn save_in_progress(&self) -> bool {
        self.save_in_progress.load(Ordering::Acquire)
    }

    pub fn try_begin_settlement(&self, channel: &str) -> bool {
        self.settling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string())
    }

    pub fn finish_settlement(&self, channel: &str) {
        self.settling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
    }

    pub fn settlement_pending(&self, channel: &str) -> bool {
        self.settling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(channel)
    }

    pub fn saves_completed(&self) -> u64 {
        self.saves_completed.load(Ordering::Acquire)
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    pub fn record(&self) -> StoreRecord {
        let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
        StoreRecord {
            botstart: self.bot_start(),
            channels: channels
                .iter()
                .map(|(name, ch)| (name.clone(), ch.record()))
                .collect(),
        }
    }

    /// Replace the whole state. On error nothing changes.
    pub fn load<R: Read>(&self, reader: R) -> Result<(), LeetError> {
        let record: StoreRecord = serde_json::from_reader(reader)?;
        let channels = build_channels(record.channels);
        *self.channels.write().unwrap_or_else(PoisonError::into_inner) = channels;
        *self.bot_start.write().unwrap_or_else(PoisonError::into_inner) = record.botstart;
        Ok(())
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<(), LeetError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.load(BufReader::new(file))?;
        info!(path = %path.display(), "scores loaded");
        Ok(())
    }

    /// Pretty-printed JSON with a trailing newline. Returns bytes written.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<usize, LeetError> {
        let mut bytes = serde_json::to_vec_pretty(&self.record())?;
        bytes.push(b'\n');
        writer.write_all(&bytes)?;
        writer.flush()?;
        self.saves_completed.fetch_add(1, Ordering::AcqRel);
        Ok(bytes.len())
    }

    /// Write to a uniquely named temp file next to `path`, then rename it
    /// over `path`. Concurrent callers write one at a time.
    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, LeetError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let _writing = self.file_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let tmp = NamedTempFile::new_in(dir)?;
        let n = self.save(tmp.as_file())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        info!(path = %path.display(), bytes = n, "scores saved");
        Ok(n)
    }
}

fn build_channels(records: BTreeMap<String, ChannelRecord>) -> HashMap<String, Arc<Channel>> {
    records
        .into_iter()
        .map(|(name, rec)| {
            let ch = Arc::new(Channel::from_record(name.clone(), rec));
            (name, ch)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Timelike};
    use leetbot_core::bonus::BonusRule;

    fn at(h: u32, m: u32, s: u32, nanos: u32) -> Timestamp {
        FixedOffset::east_opt(7200)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, h, m, s)
            .unwrap()
            .with_nanosecond(nanos)
            .unwrap()
    }

    fn rules() -> BonusRuleSet {
        BonusRuleSet::new(vec![BonusRule {
            substring: "1337".into(),
            prefix_char: '0',
            use_step: true,
            step_points: 10,
            flat_points: 0,
            greeting: "The ultimate goal!".into(),
        }])
    }

    fn store() -> ScoreStore {
        ScoreStore::new(at(9, 0, 0, 0))
    }

    fn score(s: &ScoreStore, nick: &str, when: Timestamp) -> AttemptOutcome {
        s.try_score("#leet", nick, when, &TimeWindow::default(), &rules())
    }

    #[test]
    fn outside_window_has_no_side_effects() {
        let s = store();
        let out = score(&s, "alice", at(13, 35, 59, 0));
        assert_eq!(
            out,
            AttemptOutcome::Rejected {
                reason: Rejection::OutsideWindow,
                message: None,
            }
        );
        assert!(s.is_empty());
    }

    #[test]
    fn near_miss_costs_a_point() {
        let s = store();
        let out = score(&s, "alice", at(13, 36, 5, 0));
        assert_eq!(out.message(), Some("[13:36:05:000000000] Too early, sucker! alice: -1"));
        let user = s.channel("#leet").user("alice");
        assert_eq!(user.points(), -1);
        assert_eq!(user.misses().times, 1);
        assert!(!s.channel("#leet").has_pending_round());

        let out = score(&s, "bob", at(13, 38, 5, 0));
        assert_eq!(out.message(), Some("[13:38:05:000000000] Too late, sucker! bob: -1"));
    }

    #[test]
    fn on_time_attempts_are_ranked() {
        let s = store();
        let first = score(&s, "alice", at(13, 37, 1, 0));
        let second = score(&s, "bob", at(13, 37, 2, 0));
        assert_eq!(first.message(), Some("[13:37:01:000000000] Whoop! alice: #1"));
        assert!(matches!(second, AttemptOutcome::Scored { rank: 2, total: 0, .. }));
        assert_eq!(s.channel("#leet").contestants(), vec!["alice", "bob"]);
    }

    #[test]
    fn bonus_is_added_and_announced() {
        let s = store();
        let out = score(&s, "alice", at(13, 37, 0, 1_337_000));
        assert_eq!(
            out.message(),
            Some("[13:37:00:001337000] Whoop! alice: #1 (+50 points bonus! : [1337=50]: The ultimate goal!)")
        );
        let user = s.channel("#leet").user("alice");
        assert_eq!(user.points(), 50);
        assert_eq!(user.bonuses().total, 50);

        let out = score(&s, "bob", at(13, 38, 13, 370_000_000));
        assert_eq!(
            out.message(),
            Some("[13:38:13:370000000] Too late, sucker! bob: 9 (but: +10 points bonus! : [1337=10]: The ultimate goal!)")
        );
    }

    #[test]
    fn repeated_attempt_is_rejected_and_keeps_points() {
        let s = store();
        assert!(score(&s, "alice", at(13, 36, 30, 0)).accepted());
        let again = score(&s, "alice", at(13, 37, 0, 0));
        assert!(!again.accepted());
        assert_eq!(again.message(), Some("alice: Stop spamming!"));
        assert_eq!(s.channel("#leet").user("alice").points(), -1);
        assert!(!s.channel("#leet").has_pending_round());
    }

    #[test]
    fn stats_do_not_create_channels() {
        let s = store();
        assert_eq!(s.stats("#void", &rules()), "No users with scores for channel \"#void\"");
        assert!(s.get_channel("#void").is_none());
    }

    #[test]
    fn settle_unknown_channel_is_none() {
        let s = store();
        let mut rng = rand::thread_rng();
        assert!(s.settle("#void", 1337, &rules(), &at(13, 40, 0, 0), &mut rng).is_none());
    }

    #[test]
    fn save_then_load_reproduces_state() {
        let s = store();
        score(&s, "alice", at(13, 37, 0, 5));
        score(&s, "bob", at(13, 36, 0, 0));
        s.channel("#leet").user("alice").lock();
        s.channel("#other").user("carol").set_points(42);

        let mut buf = Vec::new();
        let n = s.save(&mut buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(buf.last(), Some(&b'\n'));
        assert_eq!(s.saves_completed(), 1);

        let restored = ScoreStore::new(at(0, 0, 0, 0));
        restored.load(&buf[..]).unwrap();
        assert_eq!(restored.record(), s.record());
        assert_eq!(restored.bot_start(), at(9, 0, 0, 0));
        let alice = restored.channel("#leet").user("alice");
        assert!(alice.is_locked());
        assert_eq!(alice.last_entry(), Some(at(13, 37, 0, 5)));
    }

    #[test]
    fn failed_load_leaves_state_untouched() {
        let s = store();
        s.channel("#leet").user("alice").set_points(7);
        assert!(s.load(&b"{\"botstart\": 12"[..]).is_err());
        assert_eq!(s.channel("#leet").user("alice").points(), 7);
        assert_eq!(s.bot_start(), at(9, 0, 0, 0));
    }

    #[test]
    fn file_round_trip_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");
        let s = store();
        s.channel("#leet").user("alice").set_points(1337);

        s.save_file(&path).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        s.channel("#leet").user("alice").set_points(1);
        s.save_file(&path).unwrap();

        let restored = ScoreStore::new(at(0, 0, 0, 0));
        restored.load_file(&path).unwrap();
        assert_eq!(restored.channel("#leet").user("alice").points(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = store().load_file(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, LeetError::Io(_)));
    }

    #[test]
    fn save_guard_admits_one_holder() {
        let s = store();
        assert!(s.try_begin_save());
        assert!(!s.try_begin_save());
        assert!(s.save_in_progress());
        s.finish_save();
        assert!(s.try_begin_save());
    }

    #[test]
    fn settlement_guards_are_per_channel() {
        let s = store();
        assert!(s.try_begin_settlement("#a"));
        assert!(!s.try_begin_settlement("#a"));
        assert!(s.try_begin_settlement("#b"));
        s.finish_settlement("#a");
        assert!(!s.settlement_pending("#a"));
        assert!(s.settlement_pending("#b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_contestants_get_distinct_ranks() {
        const N: usize = 16;
        let s = Arc::new(store());
        let handles: Vec<_> = (0..N)
            .map(|i| {
                let s = Arc::clone(&s);
                tokio::spawn(async move {
                    match score(&s, &format!("nick{i:02}"), at(13, 37, i as u32, 0)) {
                        AttemptOutcome::Scored { rank, .. } => rank,
                        other => panic!("unexpected outcome {other:?}"),
                    }
                })
            })
            .collect();

        let mut ranks = Vec::with_capacity(N);
        for h in handles {
            ranks.push(h.await.unwrap());
        }
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=N).collect::<Vec<_>>());
        assert_eq!(s.channel("#leet").contestants().len(), N);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_attempts_by_one_nick_score_once() {
        let s = Arc::new(store());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let s = Arc::clone(&s);
                tokio::spawn(async move { score(&s, "alice", at(13, 36, 5, 0)).accepted() })
            })
            .collect();

        let mut accepted = 0;
        for h in handles {
            if h.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        let user = s.channel("#leet").user("alice");
        assert_eq!(user.points(), -1);
        assert_eq!(user.misses().times, 1);
    }

    #[test]
    fn concurrent_file_saves_leave_one_complete_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.json");
        let s = Arc::new(store());
        s.channel("#leet").user("alice").set_points(42);

        let writers: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        s.save_file(&path).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(s.saves_completed(), 80);
        let restored = ScoreStore::new(at(0, 0, 0, 0));
        restored.load_file(&path).unwrap();
        assert_eq!(restored.channel("#leet").user("alice").points(), 42);
    }
}
