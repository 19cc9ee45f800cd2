pub mod groups;
pub mod poll;

pub use groups::{ScanGroup, ScanGroupBuilder};
pub use poll::PollScheduler;
