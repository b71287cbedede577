pub mod poll;
pub mod rate_limiter;

pub use poll::{group_by_item, lot_limit, CycleStats, PollDeps, PollScheduler, PollSettings};
pub use rate_limiter::RateLimiter;
