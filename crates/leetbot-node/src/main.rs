//! leetbot-node: runs the 13:37 game against a console transport.
//!
//! Startup sequence:
//!   1. Resolve configuration (environment, then command-line overrides)
//!   2. Load bonus rules and scores, falling back to empty state
//!   3. Start the daily clock offset check if an NTP server is configured
//!   4. Read `<channel> <nick> <text>` lines from stdin until EOF or Ctrl-C
//!   5. Cancel pending tasks and save

mod console;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use leetbot_clock::{OffsetCorrector, SntpSource};
use leetbot_core::bonus::BonusRuleSet;
use leetbot_core::config::GameConfig;
use leetbot_core::types::{Clock, Notifier, SystemClock, Timestamp};
use leetbot_state::{LeetGame, ScoreStore};

use console::{Command, ConsoleNotifier, Inbound};

#[derive(Parser, Debug)]
#[command(
    name = "leetbot-node",
    version,
    about = "Race to post at 13:37 sharp; scores, bonuses and taxes per channel"
)]
struct Args {
    /// Target hour, local time.
    #[arg(long)]
    hour: Option<u32>,

    /// Target minute.
    #[arg(long)]
    minute: Option<u32>,

    /// Minutes of tolerance on each side of the target minute.
    #[arg(long)]
    tolerance: Option<u32>,

    /// Score file (JSON).
    #[arg(long)]
    score_file: Option<PathBuf>,

    /// Bonus rule file (JSON).
    #[arg(long)]
    bonus_file: Option<PathBuf>,

    /// SNTP server for the daily clock offset check.
    #[arg(long)]
    ntp_server: Option<String>,

    /// Channels that receive clock offset notices (comma-separated).
    #[arg(long, value_delimiter = ',')]
    notice_channels: Vec<String>,
}

impl Args {
    fn apply(self, cfg: &mut GameConfig) {
        if let Some(hour) = self.hour {
            cfg.hour = hour;
        }
        if let Some(minute) = self.minute {
            cfg.minute = minute;
        }
        if let Some(tolerance) = self.tolerance {
            cfg.tolerance = tolerance;
        }
        if let Some(path) = self.score_file {
            cfg.score_file = path;
        }
        if let Some(path) = self.bonus_file {
            cfg.bonus_file = path;
        }
        if self.ntp_server.is_some() {
            cfg.ntp_server = self.ntp_server;
        }
        if !self.notice_channels.is_empty() {
            cfg.notice_channels = self.notice_channels;
        }
        cfg.score_file = expand_tilde(&cfg.score_file);
        cfg.bonus_file = expand_tilde(&cfg.bonus_file);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,leetbot=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = GameConfig::from_env();
    Args::parse().apply(&mut cfg);
    let window = cfg.window().context("invalid target time")?;
    info!(
        target_time = %window.target_time(),
        tolerance = cfg.tolerance,
        score_file = %cfg.score_file.display(),
        "leetbot starting"
    );

    // ── Persistent state ─────────────────────────────────────────────────────
    let rules = match BonusRuleSet::load_file(&cfg.bonus_file) {
        Ok(rules) => {
            info!(rules = rules.len(), "bonus rules loaded");
            rules
        }
        Err(e) => {
            warn!(path = %cfg.bonus_file.display(), error = %e, "no bonus rules, starting without");
            BonusRuleSet::default()
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = ScoreStore::new(clock.now());
    if let Err(e) = store.load_file(&cfg.score_file) {
        warn!(path = %cfg.score_file.display(), error = %e, "no saved scores, starting fresh");
    }

    let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
    let game = LeetGame::new(cfg.clone(), store, rules, Arc::clone(&clock), Arc::clone(&notifier))
        .context("setting up game")?;

    // ── Clock offset check ───────────────────────────────────────────────────
    if let Some(server) = cfg.ntp_server.clone() {
        let corrector = OffsetCorrector::new(
            Arc::new(SntpSource::new(server)),
            game.offset(),
            Arc::clone(&clock),
        )
        .with_notices(Arc::clone(&notifier), cfg.notice_channels.clone());
        tokio::spawn(corrector.run(window, cfg.offset_check_lead));
    } else {
        info!("no NTP server configured, clock offset check disabled");
    }

    // ── Reload on SIGUSR1 ────────────────────────────────────────────────────
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut usr1 = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
        let game = game.clone();
        tokio::spawn(async move {
            while usr1.recv().await.is_some() {
                match game.reload() {
                    Ok(()) => info!("reloaded on SIGUSR1"),
                    Err(e) => warn!(error = %e, "reload on SIGUSR1 failed"),
                }
            }
        });
    }

    // ── Console input ────────────────────────────────────────────────────────
    let (line_tx, mut line_rx) = mpsc::channel::<(Timestamp, String)>(256);
    let reader_game = game.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    // Stamp before anything else touches the line.
                    let received = reader_game.now();
                    if line_tx.send((received, line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    info!("ready");
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            next = line_rx.recv() => match next {
                Some((received, line)) => {
                    if let Some(inbound) = console::parse_line(&line) {
                        handle(&game, notifier.as_ref(), received, inbound);
                    }
                }
                None => {
                    info!("input closed");
                    break;
                }
            },
            _ = &mut interrupt => {
                info!("interrupt received");
                break;
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────
    game.shutdown();
    let bytes = game.flush().await.context("saving scores on shutdown")?;
    info!(bytes, "scores saved, bye");
    Ok(())
}

fn handle(game: &LeetGame, notifier: &dyn Notifier, received: Timestamp, inbound: Inbound) {
    let Inbound { channel, nick, command } = inbound;
    let reply = match command {
        Command::Attempt => {
            let outcome = game.attempt_at(&channel, &nick, received);
            debug!(channel = %channel, nick = %nick, ?outcome, "attempt");
            outcome.message().map(str::to_string)
        }
        Command::Stats => Some(game.stats(&channel)),
        Command::Reload => Some(match game.reload() {
            Ok(()) => "Bonus rules and scores reloaded".to_string(),
            Err(e) => format!("Reload failed: {e}"),
        }),
        Command::Unknown(arg) => Some(console::usage(&arg)),
    };
    if let Some(text) = reply {
        if let Err(e) = notifier.send(&channel, text.trim_end_matches('\n')) {
            warn!(channel = %channel, error = %e, "reply not delivered");
        }
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
