//! HOBOlink data-logger web services client.

pub mod webapi;

pub use webapi::{HoboApi, HoboTokenInfo};
