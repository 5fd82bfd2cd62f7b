//! Message handling pipeline.
//!
//! Every inbound event from the chat platform flows through:
//! 1. `Dispatcher::handle_incoming()`: filtering and attachment OCR
//! 2. `Matcher::match_message()`: channel rules, then the knowledge base
//! 3. Reply in thread, plus direct-message notifications for channel rules
//!
//! Nothing in here fails the event loop: platform errors are logged and
//! reported in the `Outcome`.

pub mod dispatcher;
pub mod matcher;
pub mod rules;
pub mod types;

pub use dispatcher::Dispatcher;
pub use matcher::Matcher;
pub use rules::{ChannelRule, PatternTable};
pub use types::{MatchResult, Outcome};
