pub mod channel;
pub mod game;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod user;

pub use channel::{Channel, ChannelRecord, Inspection, InspectionDecision, Settlement, TaxPolicy};
pub use game::LeetGame;
pub use scheduler::{Scheduler, TaskKey};
pub use store::{AttemptOutcome, Rejection, ScoreStore, StoreRecord};
pub use user::{ScoreAttempt, User, UserRecord, ValueTracker};
