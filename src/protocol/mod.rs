//! Link Protocol
//!
//! Wire-level pieces shared by the workers: roles, service variants and the
//! newline-delimited inbound framing.

pub mod constants;
pub mod line;
pub mod types;

pub use constants::*;
pub use line::LineAccumulator;
pub use types::*;
