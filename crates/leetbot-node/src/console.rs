//! Line-oriented stand-in for a chat connection.
//!
//! Input lines are `<channel> <nick> <text>`; output lines are
//! `<channel> <text>`, one per line of the message.

use std::io::Write;

use leetbot_core::error::LeetError;
use leetbot_core::types::{check_outgoing, Notifier};

pub const TRIGGER: &str = "!1337";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Attempt,
    Stats,
    Reload,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub channel: String,
    pub nick: String,
    pub command: Command,
}

/// `None` for lines that are not addressed to the game.
pub fn parse_line(line: &str) -> Option<Inbound> {
    let mut parts = line.split_whitespace();
    let channel = parts.next()?;
    let nick = parts.next()?;
    if parts.next()? != TRIGGER {
        return None;
    }
    let command = match parts.next() {
        None => Command::Attempt,
        Some("stats") => Command::Stats,
        Some("reload") => Command::Reload,
        Some(other) => Command::Unknown(other.to_string()),
    };
    Some(Inbound {
        channel: channel.to_string(),
        nick: nick.to_string(),
        command,
    })
}

pub fn usage(arg: &str) -> String {
    format!("Unrecognized argument: {arg:?}. Usage: {TRIGGER} [stats|reload]")
}

/// Writes messages to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn send(&self, channel: &str, text: &str) -> Result<(), LeetError> {
        check_outgoing(channel, text)?;
        let mut out = std::io::stdout().lock();
        for line in text.lines() {
            writeln!(out, "{channel} {line}").map_err(|e| LeetError::Delivery {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}
