use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeetError {
    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("invalid target time {hour:02}:{minute:02}")]
    InvalidTarget { hour: u32, minute: u32 },

    #[error("invalid configuration value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    // ── Persistence errors ───────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("reload refused: a save is in progress")]
    SaveInProgress,

    // ── Notification errors ──────────────────────────────────────────────────
    #[error("channel name is empty")]
    EmptyChannel,

    #[error("message is empty")]
    EmptyMessage,

    #[error("message delivery to {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },

    // ── Time source errors ───────────────────────────────────────────────────
    #[error("time query to {server} failed: {reason}")]
    TimeQuery { server: String, reason: String },

    #[error("time query to {server} timed out")]
    TimeQueryTimeout { server: String },

    #[error("{0}")]
    Other(String),
}
