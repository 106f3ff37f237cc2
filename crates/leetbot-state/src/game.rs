use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use leetbot_clock::ClockOffset;
use leetbot_core::bonus::BonusRuleSet;
use leetbot_core::config::GameConfig;
use leetbot_core::error::LeetError;
use leetbot_core::timeframe::TimeWindow;
use leetbot_core::types::{check_outgoing, Clock, Notifier, Timestamp};

use crate::scheduler::{Scheduler, TaskKey};
use crate::store::{AttemptOutcome, ScoreStore};

struct Inner {
    store: ScoreStore,
    rules: RwLock<Arc<BonusRuleSet>>,
    window: TimeWindow,
    config: GameConfig,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    offset: Arc<ClockOffset>,
    scheduler: Scheduler,
    /// Set when a save is requested while one is already pending.
    save_again: AtomicBool,
}

/// One running game: the score store plus everything it needs from its
/// environment. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LeetGame {
    inner: Arc<Inner>,
}

/// Clears the save flag when the save task ends, however it ends.
struct SaveGuard(Arc<Inner>);

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.0.store.finish_save();
    }
}

struct SettlementGuard {
    inner: Arc<Inner>,
    channel: String,
}

impl Drop for SettlementGuard {
    fn drop(&mut self) {
        self.inner.store.finish_settlement(&self.channel);
    }
}

impl LeetGame {
    pub fn new(
        config: GameConfig,
        store: ScoreStore,
        rules: BonusRuleSet,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, LeetError> {
        let window = config.window()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                rules: RwLock::new(Arc::new(rules)),
                window,
                config,
                clock,
                notifier,
                offset: Arc::new(ClockOffset::new()),
                scheduler: Scheduler::new(),
                save_again: AtomicBool::new(false),
            }),
        })
    }

    pub fn store(&self) -> &ScoreStore {
        &self.inner.store
    }

    pub fn window(&self) -> &TimeWindow {
        &self.inner.window
    }

    pub fn config(&self) -> &GameConfig {
        &self.inner.config
    }

    /// Shared with the clock offset corrector.
    pub fn offset(&self) -> Arc<ClockOffset> {
        Arc::clone(&self.inner.offset)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn rules(&self) -> Arc<BonusRuleSet> {
        self.inner.rules()
    }

    /// Local time corrected by the last measured clock offset.
    pub fn now(&self) -> Timestamp {
        self.inner.now()
    }

    pub fn attempt(&self, channel: &str, nick: &str) -> AttemptOutcome {
        self.attempt_at(channel, nick, self.now())
    }

    pub fn attempt_at(&self, channel: &str, nick: &str, when: Timestamp) -> AttemptOutcome {
        let rules = self.rules();
        let outcome = self
            .inner
            .store
            .try_score(channel, nick, when, &self.inner.window, &rules);
        if outcome.accepted() {
            self.schedule_save(self.inner.config.save_delay);
            self.schedule_settlement(channel, self.settle_delay(&when));
        }
        outcome
    }

    /// How long to wait before settling a round that `when` took part in:
    /// the configured delay, but never before the late minute has ended.
    pub fn settle_delay(&self, when: &Timestamp) -> Duration {
        let until_close = self
            .inner
            .window
            .until_close(when)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.inner.config.settle_delay.max(until_close)
    }

    /// Save after `delay`. Returns false while a save is pending; that save
    /// then runs once more after it has written.
    pub fn schedule_save(&self, delay: Duration) -> bool {
        self.inner.schedule_save(delay)
    }

    /// Settle `channel` after `delay` and post the results. No-op returning
    /// false while a settlement for that channel is pending.
    pub fn schedule_settlement(&self, channel: &str, delay: Duration) -> bool {
        if !self.inner.store.try_begin_settlement(channel) {
            return false;
        }
        let guard = SettlementGuard {
            inner: Arc::clone(&self.inner),
            channel: channel.to_string(),
        };
        let key = TaskKey::Settlement(channel.to_string());
        self.inner.scheduler.schedule(key, delay, async move {
            guard.inner.settle_and_post(&guard.channel);
            drop(guard);
        });
        true
    }

    pub fn stats(&self, channel: &str) -> String {
        self.inner.store.stats(channel, &self.rules())
    }

    /// Re-read bonus rules and scores from their files. Refused while a save
    /// is pending. A file that fails to load leaves its current state in
    /// place; the first such error is returned.
    pub fn reload(&self) -> Result<(), LeetError> {
        if self.inner.store.save_in_progress() {
            return Err(LeetError::SaveInProgress);
        }
        let cfg = &self.inner.config;
        let mut first_err = None;

        match BonusRuleSet::load_file(&cfg.bonus_file) {
            Ok(rules) => {
                info!(path = %cfg.bonus_file.display(), rules = rules.len(), "bonus rules reloaded");
                *self.inner.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(rules);
            }
            Err(e) => {
                warn!(path = %cfg.bonus_file.display(), error = %e, "keeping current bonus rules");
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = self.inner.store.load_file(&cfg.score_file) {
            warn!(path = %cfg.score_file.display(), error = %e, "keeping current scores");
            first_err.get_or_insert(e);
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Save immediately.
    pub async fn flush(&self) -> Result<usize, LeetError> {
        self.inner.save_blocking().await
    }

    /// Abort every pending save and settlement.
    pub fn shutdown(&self) {
        self.inner.scheduler.cancel_all();
    }
}

impl Inner {
    fn rules(&self) -> Arc<BonusRuleSet> {
        Arc::clone(&self.rules.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn now(&self) -> Timestamp {
        self.offset.apply(&self.clock.now())
    }

    fn schedule_save(self: &Arc<Self>, delay: Duration) -> bool {
        if !self.store.try_begin_save() {
            self.save_again.store(true, Ordering::SeqCst);
            return false;
        }
        let guard = SaveGuard(Arc::clone(self));
        self.scheduler.schedule(TaskKey::Save, delay, async move {
            let inner = Arc::clone(&guard.0);
            loop {
                inner.save_again.store(false, Ordering::SeqCst);
                if let Err(e) = inner.save_blocking().await {
                    error!(error = %e, "scheduled save failed");
                }
                if !inner.save_again.swap(false, Ordering::SeqCst) {
                    break;
                }
                debug!("state changed during save, saving again");
            }
            drop(guard);
            if inner.save_again.swap(false, Ordering::SeqCst) {
                inner.schedule_save(inner.config.save_delay);
            }
        });
        true
    }

    async fn save_blocking(self: &Arc<Self>) -> Result<usize, LeetError> {
        let inner = Arc::clone(self);
        tokio::task::spawn_blocking(move || inner.store.save_file(&inner.config.score_file))
            .await
            .map_err(|e| LeetError::Other(format!("save task failed: {e}")))?
    }

    fn settle_and_post(self: &Arc<Self>, channel: &str) {
        let now = self.now();
        let rules = self.rules();
        let settlement = {
            let mut rng = rand::thread_rng();
            self.store
                .settle(channel, self.window.target_score(), &rules, &now, &mut rng)
        };
        let Some(settlement) = settlement else {
            warn!(channel, "settlement for unknown channel skipped");
            return;
        };
        info!(channel, lines = settlement.lines.len(), "round settled");
        self.schedule_save(self.config.save_delay);

        if settlement.lines.is_empty() {
            debug!(channel, "no contestants, nothing to post");
            return;
        }
        for notice in &settlement.notices {
            self.post(channel, notice);
        }
        self.post(channel, settlement.report.trim_end_matches('\n'));
    }

    fn post(&self, channel: &str, text: &str) {
        let sent = check_outgoing(channel, text).and_then(|()| self.notifier.send(channel, text));
        if let Err(e) = sent {
            error!(channel, error = %e, "failed to post message");
        }
    }
}
