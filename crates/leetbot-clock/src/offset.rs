use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures::future::BoxFuture;
use tracing::{info, warn};

use leetbot_core::error::LeetError;
use leetbot_core::timeframe::TimeWindow;
use leetbot_core::types::{Clock, Notifier, Timestamp};

/// An external reference clock.
pub trait OffsetSource: Send + Sync {
    /// Shown in logs and notices.
    fn name(&self) -> &str;

    /// How far the local clock is behind the reference (positive) or ahead
    /// of it (negative).
    fn query(&self) -> BoxFuture<'_, Result<ChronoDuration, LeetError>>;
}

/// Correction added to the local clock on the scoring path. Zero until a
/// check succeeds, and reset to zero whenever a check fails.
#[derive(Debug, Default)]
pub struct ClockOffset {
    nanos: AtomicI64,
}

impl ClockOffset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ChronoDuration {
        ChronoDuration::nanoseconds(self.nanos.load(Ordering::Acquire))
    }

    pub fn set(&self, offset: ChronoDuration) {
        let nanos = offset.num_nanoseconds().unwrap_or_else(|| {
            if offset < ChronoDuration::zero() {
                i64::MIN
            } else {
                i64::MAX
            }
        });
        self.nanos.store(nanos, Ordering::Release);
    }

    pub fn reset(&self) {
        self.nanos.store(0, Ordering::Release);
    }

    /// `t` corrected by the current offset.
    pub fn apply(&self, t: &Timestamp) -> Timestamp {
        *t + self.get()
    }
}

/// Runs the daily clock check and keeps a [`ClockOffset`] current.
pub struct OffsetCorrector {
    source: Arc<dyn OffsetSource>,
    offset: Arc<ClockOffset>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn Notifier>>,
    notice_channels: Vec<String>,
}

impl OffsetCorrector {
    pub fn new(
        source: Arc<dyn OffsetSource>,
        offset: Arc<ClockOffset>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            offset,
            clock,
            notifier: None,
            notice_channels: Vec::new(),
        }
    }

    /// Broadcast every measured offset to `channels`.
    pub fn with_notices(mut self, notifier: Arc<dyn Notifier>, channels: Vec<String>) -> Self {
        self.notifier = Some(notifier);
        self.notice_channels = channels;
        self
    }

    pub fn offset(&self) -> &Arc<ClockOffset> {
        &self.offset
    }

    /// Query the source once. A failure is logged and zeroes the offset.
    pub async fn check_once(&self) -> Option<ChronoDuration> {
        match self.source.query().await {
            Ok(offset) => {
                self.offset.set(offset);
                info!(
                    source = self.source.name(),
                    offset_ms = offset.num_milliseconds(),
                    "clock offset updated"
                );
                self.broadcast(offset);
                Some(offset)
            }
            Err(e) => {
                self.offset.reset();
                warn!(source = self.source.name(), error = %e, "clock offset check failed, offset reset to zero");
                None
            }
        }
    }

    fn broadcast(&self, offset: ChronoDuration) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let text = format!(
            "Clock offset from {}: {} ms",
            self.source.name(),
            offset.num_milliseconds()
        );
        for channel in &self.notice_channels {
            if let Err(e) = notifier.send(channel, &text) {
                warn!(channel = %channel, error = %e, "failed to post clock offset notice");
            }
        }
    }

    /// When the next check is due: `lead` ahead of the window's target
    /// minute, today or tomorrow. Returns the instant and the wait.
    pub fn next_check(&self, window: &TimeWindow, lead: Duration) -> (Timestamp, Duration) {
        let now = self.clock.now();
        let lead = ChronoDuration::from_std(lead).unwrap_or_else(|_| ChronoDuration::zero());
        let at = window.shifted(-lead).next_occurrence(&now);
        let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
        (at, wait)
    }

    /// Check every day, `lead` before the target minute. Never returns.
    pub async fn run(self, window: TimeWindow, lead: Duration) {
        loop {
            let (at, wait) = self.next_check(&window, lead);
            info!(at = %at, "next clock offset check scheduled");
            tokio::time::sleep(wait).await;
            self.check_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use futures::FutureExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FixedClock(Timestamp);

    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }

    struct ScriptedSource {
        replies: Mutex<VecDeque<Result<ChronoDuration, LeetError>>>,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Result<ChronoDuration, LeetError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }
    }

    impl OffsetSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        fn query(&self) -> BoxFuture<'_, Result<ChronoDuration, LeetError>> {
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LeetError::Other("no more replies".into())));
            async move { next }.boxed()
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl Notifier for Recorder {
        fn send(&self, channel: &str, text: &str) -> Result<(), LeetError> {
            self.0.lock().unwrap().push((channel.into(), text.into()));
            Ok(())
        }
    }

    fn noon() -> Timestamp {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, 12, 0, 0)
            .unwrap()
    }

    fn corrector(source: Arc<ScriptedSource>) -> OffsetCorrector {
        OffsetCorrector::new(source, Arc::new(ClockOffset::new()), Arc::new(FixedClock(noon())))
    }

    #[tokio::test]
    async fn success_stores_offset_and_notifies() {
        let source = ScriptedSource::new(vec![Ok(ChronoDuration::milliseconds(250))]);
        let recorder = Arc::new(Recorder::default());
        let c = corrector(source).with_notices(recorder.clone(), vec!["#leet".into()]);

        assert_eq!(c.check_once().await, Some(ChronoDuration::milliseconds(250)));
        assert_eq!(c.offset().get(), ChronoDuration::milliseconds(250));

        let sent = recorder.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "#leet");
        assert_eq!(sent[0].1, "Clock offset from scripted: 250 ms");
    }

    #[tokio::test]
    async fn failure_resets_a_stored_offset() {
        let source = ScriptedSource::new(vec![
            Ok(ChronoDuration::seconds(3)),
            Err(LeetError::TimeQueryTimeout {
                server: "scripted".into(),
            }),
        ]);
        let c = corrector(source);

        c.check_once().await;
        assert_eq!(c.offset().get(), ChronoDuration::seconds(3));

        assert!(c.check_once().await.is_none());
        assert_eq!(c.offset().get(), ChronoDuration::zero());
    }

    #[test]
    fn offset_applies_to_timestamps() {
        let offset = ClockOffset::new();
        offset.set(ChronoDuration::milliseconds(-1500));
        assert_eq!(offset.apply(&noon()), noon() - ChronoDuration::milliseconds(1500));
        offset.reset();
        assert_eq!(offset.apply(&noon()), noon());
    }

    #[test]
    fn next_check_runs_ahead_of_target() {
        let c = corrector(ScriptedSource::new(vec![]));
        let (at, wait) = c.next_check(&TimeWindow::default(), Duration::from_secs(5 * 60));
        assert_eq!(at, noon() + ChronoDuration::minutes(92));
        assert_eq!(wait, Duration::from_secs(92 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn run_checks_after_the_wait() {
        let source = ScriptedSource::new(vec![Ok(ChronoDuration::milliseconds(7))]);
        let c = corrector(source);
        let offset = c.offset().clone();

        let handle = tokio::spawn(c.run(TimeWindow::default(), Duration::from_secs(5 * 60)));
        tokio::time::sleep(Duration::from_secs(91 * 60)).await;
        assert_eq!(offset.get(), ChronoDuration::zero());

        tokio::time::sleep(Duration::from_secs(2 * 60)).await;
        assert_eq!(offset.get(), ChronoDuration::milliseconds(7));
        handle.abort();
    }
}
