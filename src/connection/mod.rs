//! Connection Management Module
//!
//! The role state machine and the three workers it coordinates: one listener
//! per service variant, at most one dialer and at most one data pump.

pub mod dialer;
pub mod listener;
pub mod manager;
pub mod pump;
pub mod session;
pub mod worker;

pub use manager::{ConnectionManager, LinkStats, Origin, WorkerCensus};
pub use session::{LinkSession, SessionSnapshot};
