pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod feed;
pub mod planner;
pub mod retry;
pub mod schedule;
pub mod tender;

pub use error::{BridgeError, Result};
