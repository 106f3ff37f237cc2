//! Plain-text rendering for settlement reports and stats.

use std::fmt;

use leetbot_core::types::{Points, Timestamp};

/// Results for one user after a settlement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultLine {
    pub nick: String,
    pub total: Points,
    pub rank_points: Points,
    pub overshoot_tax: Points,
    /// `Some` only for the inspected contestant; zero is a slap on the wrist.
    pub inspection_tax: Option<Points>,
    /// 1-based rank among winners.
    pub winner: Option<usize>,
    pub greeting: Option<String>,
}

impl ResultLine {
    pub fn padded(&self, width: usize) -> Padded<'_> {
        Padded { line: self, width }
    }
}

pub struct Padded<'a> {
    line: &'a ResultLine,
    width: usize,
}

impl fmt::Display for Padded<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let l = self.line;
        write!(f, "{:<width$}: {:04}", l.nick, l.total, width = self.width)?;
        if l.rank_points != 0 {
            write!(f, " [Rank: +{:02}]", l.rank_points)?;
        }
        if l.overshoot_tax != 0 {
            write!(f, " [Overshoot tax: -{}]", l.overshoot_tax)?;
        }
        match l.inspection_tax {
            Some(0) => f.write_str(" [Tax: Slap on the wrist ;)]")?,
            Some(tax) => write!(f, " [Tax: -{tax}]")?,
            None => {}
        }
        write_tail(f, l.winner, l.greeting.as_deref())
    }
}

fn write_tail(f: &mut fmt::Formatter<'_>, winner: Option<usize>, greeting: Option<&str>) -> fmt::Result {
    if let Some(rank) = winner {
        write!(f, " - Winner #{rank}!")?;
    }
    if let Some(greeting) = greeting {
        write!(f, " - {greeting}")?;
    }
    Ok(())
}

/// One row of the stats listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsLine {
    pub nick: String,
    pub points: Points,
    pub best_entry: String,
    pub winner: Option<usize>,
    pub greeting: Option<String>,
}

impl StatsLine {
    pub fn render(&self, width: usize) -> String {
        struct Row<'a>(&'a StatsLine, usize);

        impl fmt::Display for Row<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = self.0;
                write!(f, "{:<width$}: {:04} @ {}", s.nick, s.points, s.best_entry, width = self.1)?;
                write_tail(f, s.winner, s.greeting.as_deref())
            }
        }

        Row(self, width).to_string()
    }
}

pub fn results_header(now: &Timestamp) -> String {
    format!("Results for {}:", now.format("%Y-%m-%d"))
}

pub fn stats_header(since: &Timestamp) -> String {
    format!("Stats since {}:", since.to_rfc3339())
}

pub fn no_users(channel: &str) -> String {
    format!("No users with scores for channel {channel:?}")
}

/// Column width for a set of nicks.
pub fn nick_width<'a, I>(nicks: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    nicks.into_iter().map(|n| n.chars().count()).max().unwrap_or(0)
}
