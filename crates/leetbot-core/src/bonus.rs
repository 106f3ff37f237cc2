//! Lucky-pattern bonuses on the sub-second part of an arrival time.
//!
//! The further right a pattern appears behind a run of prefix characters,
//! the more it is worth. With substring "1337", prefix '0' and step 10:
//!
//!   1337xxxxxxx  = +(1 * 10)
//!   01337xxxxxx  = +(2 * 10)
//!   001337xxxxx  = +(3 * 10)
//!   0001337xxxx  = +(4 * 10)
//!   1001337xxxx  = +10        (prefix is not all '0')

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::LeetError;
use crate::types::Points;

/// One configured pattern.
///
/// Also reads the older capitalised layout (`SubString`, `PrefixChar` as a
/// code point, `NoStepPoints`, ...). Missing fields take their zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusRule {
    /// Pattern to search for in the probe string.
    #[serde(alias = "SubString")]
    pub substring: String,
    /// The only character allowed in front of the match for a scaled bonus.
    #[serde(alias = "PrefixChar", deserialize_with = "char_or_code_point")]
    pub prefix_char: char,
    /// Scale `step_points` by match position when true; pay `flat_points`
    /// for any match when false.
    #[serde(alias = "UseStep")]
    pub use_step: bool,
    #[serde(alias = "StepPoints")]
    pub step_points: Points,
    #[serde(alias = "NoStepPoints")]
    pub flat_points: Points,
    /// Shown to the user on a hit, and next to totals equal to the pattern.
    #[serde(alias = "Greeting")]
    pub greeting: String,
}

fn char_or_code_point<'de, D>(deserializer: D) -> Result<char, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Char(char),
        Code(u32),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Char(c) => Ok(c),
        Raw::Code(code) => char::from_u32(code)
            .ok_or_else(|| D::Error::custom(format!("invalid code point {code}"))),
    }
}

impl BonusRule {
    fn has_homogeneous_prefix(&self, prefix: &str) -> bool {
        prefix.chars().all(|c| c == self.prefix_char)
    }

    /// Points for the first occurrence of the pattern in `probe`, if any.
    pub fn evaluate(&self, probe: &str) -> Option<BonusHit> {
        if self.substring.is_empty() {
            return None;
        }
        let pos = probe.find(&self.substring)?;

        let points = if !self.use_step {
            self.flat_points
        } else if pos == 0 {
            self.step_points
        } else {
            let prefix = &probe[..pos];
            if self.has_homogeneous_prefix(prefix) {
                (prefix.chars().count() as Points + 1) * self.step_points
            } else {
                self.step_points
            }
        };

        Some(BonusHit {
            substring: self.substring.clone(),
            points,
            greeting: self.greeting.clone(),
        })
    }
}

/// A rule that matched, and what it paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusHit {
    pub substring: String,
    pub points: Points,
    pub greeting: String,
}

impl fmt::Display for BonusHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}={}]: {}", self.substring, self.points, self.greeting)
    }
}

/// All hits for one probe, in rule order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BonusHits(Vec<BonusHit>);

impl BonusHits {
    pub fn total(&self) -> Points {
        self.0.iter().map(|h| h.points).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BonusHit> {
        self.0.iter()
    }
}

impl fmt::Display for BonusHits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{} points bonus! : ", self.total())?;
        for (i, hit) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" + ")?;
            }
            write!(f, "{hit}")?;
        }
        Ok(())
    }
}

/// Ordered collection of bonus rules, persisted as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BonusRuleSet {
    rules: Vec<BonusRule>,
}

impl BonusRuleSet {
    pub fn new(rules: Vec<BonusRule>) -> Self {
        Self { rules }
    }

    pub fn push(&mut self, rule: BonusRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[BonusRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Every rule is tried independently; rules paying nothing are dropped.
    pub fn evaluate(&self, probe: &str) -> BonusHits {
        BonusHits(
            self.rules
                .iter()
                .filter_map(|r| r.evaluate(probe))
                .filter(|hit| hit.points > 0)
                .collect(),
        )
    }

    /// The first rule whose pattern, read as a number, equals `total`.
    pub fn rule_for_points(&self, total: Points) -> Option<&BonusRule> {
        self.rules
            .iter()
            .find(|r| r.substring.parse::<Points>().ok() == Some(total))
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    pub fn load<R: Read>(reader: R) -> Result<Self, LeetError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, LeetError> {
        let file = File::open(path)?;
        Self::load(BufReader::new(file))
    }

    /// Pretty-printed JSON with a trailing newline. Returns bytes written.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<usize, LeetError> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        writer.write_all(&bytes)?;
        Ok(bytes.len())
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, LeetError> {
        let file = File::create(path)?;
        self.save(file)
    }
}
