pub mod offset;
pub mod sntp;

pub use offset::{ClockOffset, OffsetCorrector, OffsetSource};
pub use sntp::SntpSource;
