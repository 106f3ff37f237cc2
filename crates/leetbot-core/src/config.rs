use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BONUS_FILE, DEFAULT_HOUR, DEFAULT_MINUTE, DEFAULT_OFFSET_CHECK_LEAD,
    DEFAULT_SAVE_DELAY, DEFAULT_SCORE_FILE, DEFAULT_SETTLE_DELAY, DEFAULT_TOLERANCE_MINUTES,
};
use crate::error::LeetError;
use crate::timeframe::TimeWindow;

/// Process-wide game settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub hour: u32,
    pub minute: u32,
    /// Tolerance on each side of the target minute, in whole minutes.
    pub tolerance: u32,
    pub score_file: PathBuf,
    pub bonus_file: PathBuf,
    /// SNTP server for the daily clock check. No check when unset.
    pub ntp_server: Option<String>,
    /// Channels that receive clock-offset notices.
    pub notice_channels: Vec<String>,
    pub save_delay: Duration,
    /// Lower bound; see `TimeWindow::until_close`.
    pub settle_delay: Duration,
    pub offset_check_lead: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            hour: DEFAULT_HOUR,
            minute: DEFAULT_MINUTE,
            tolerance: DEFAULT_TOLERANCE_MINUTES,
            score_file: PathBuf::from(DEFAULT_SCORE_FILE),
            bonus_file: PathBuf::from(DEFAULT_BONUS_FILE),
            ntp_server: None,
            notice_channels: Vec::new(),
            save_delay: DEFAULT_SAVE_DELAY,
            settle_delay: DEFAULT_SETTLE_DELAY,
            offset_check_lead: DEFAULT_OFFSET_CHECK_LEAD,
        }
    }
}

impl GameConfig {
    /// Defaults overridden by `LEETBOT_*` environment variables. Values that
    /// do not parse are reported and replaced by the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let mut cfg = Self {
            hour: parse_or(&lookup, "LEETBOT_HOUR", defaults.hour),
            minute: parse_or(&lookup, "LEETBOT_MINUTE", defaults.minute),
            tolerance: parse_or(&lookup, "LEETBOT_TOLERANCE", defaults.tolerance),
            ..defaults
        };
        if let Some(path) = lookup("LEETBOT_SCORE_FILE").filter(|s| !s.is_empty()) {
            cfg.score_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("LEETBOT_BONUS_FILE").filter(|s| !s.is_empty()) {
            cfg.bonus_file = PathBuf::from(path);
        }
        cfg.ntp_server = lookup("LEETBOT_NTP_SERVER").filter(|s| !s.is_empty());
        if let Some(list) = lookup("LEETBOT_NOTICE_CHANNELS") {
            cfg.notice_channels = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        cfg
    }

    /// The classification window described by this config. The tolerance
    /// must stay below an hour.
    pub fn window(&self) -> Result<TimeWindow, LeetError> {
        if self.tolerance >= 60 {
            return Err(LeetError::InvalidConfig {
                key: "tolerance".into(),
                value: self.tolerance.to_string(),
            });
        }
        Ok(TimeWindow::new(self.hour, self.minute)?.with_tolerance(self.tolerance, self.tolerance))
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, fallback = %default, "unparseable setting");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let cfg = GameConfig::from_lookup(lookup(&[]));
        assert_eq!((cfg.hour, cfg.minute, cfg.tolerance), (13, 37, 1));
        assert_eq!(cfg.score_file, PathBuf::from(DEFAULT_SCORE_FILE));
        assert!(cfg.ntp_server.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = GameConfig::from_lookup(lookup(&[
            ("LEETBOT_HOUR", "4"),
            ("LEETBOT_MINUTE", "20"),
            ("LEETBOT_SCORE_FILE", "/var/lib/leetbot/scores.json"),
            ("LEETBOT_NTP_SERVER", "pool.ntp.org"),
            ("LEETBOT_NOTICE_CHANNELS", "#a, #b,,"),
        ]));
        assert_eq!((cfg.hour, cfg.minute), (4, 20));
        assert_eq!(cfg.score_file, PathBuf::from("/var/lib/leetbot/scores.json"));
        assert_eq!(cfg.ntp_server.as_deref(), Some("pool.ntp.org"));
        assert_eq!(cfg.notice_channels, vec!["#a".to_string(), "#b".to_string()]);
        assert_eq!(cfg.window().unwrap().target_score(), 420);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let cfg = GameConfig::from_lookup(lookup(&[("LEETBOT_HOUR", "thirteen")]));
        assert_eq!(cfg.hour, 13);
    }

    #[test]
    fn tolerance_of_an_hour_is_rejected() {
        let cfg = GameConfig::from_lookup(lookup(&[("LEETBOT_TOLERANCE", "60")]));
        assert!(matches!(cfg.window(), Err(LeetError::InvalidConfig { .. })));
    }

    #[test]
    fn out_of_range_target_fails_window() {
        let cfg = GameConfig::from_lookup(lookup(&[("LEETBOT_MINUTE", "75")]));
        assert!(matches!(cfg.window(), Err(LeetError::InvalidTarget { .. })));
    }
}
