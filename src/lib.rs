//! FixBuddy: Slack helper bot answering support questions from a knowledge base.

pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod kb;
pub mod lang;
pub mod ocr;
pub mod pipeline;
