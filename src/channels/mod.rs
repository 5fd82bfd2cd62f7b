//! Channel abstraction for chat platform I/O.

pub mod channel;
pub mod cli;
pub mod slack;

pub use channel::*;
pub use cli::CliChannel;
pub use slack::SlackChannel;
