pub mod bonus;
pub mod config;
pub mod constants;
pub mod error;
pub mod timeframe;
pub mod types;

pub use bonus::{BonusHit, BonusHits, BonusRule, BonusRuleSet};
pub use config::GameConfig;
pub use constants::*;
pub use error::LeetError;
pub use timeframe::{TemporalCode, TimeWindow};
pub use types::*;
