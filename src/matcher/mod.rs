pub mod filter_matcher;
pub mod quality;

pub use filter_matcher::{evaluate, select_price, FilterMatcher, Rejection};
