//! Spreadsheet-backed knowledge base.
//!
//! - `record`: rows → ordered [`KnowledgeBase`] with precompiled keyword regexes
//! - `store`: the live table behind an atomic reload
//! - `sheets`: where rows come from (Google Sheets, local JSON)
//! - `similarity`: ratio used by the fuzzy fallback

pub mod record;
pub mod sheets;
pub mod similarity;
pub mod store;

pub use record::{KbRecord, KnowledgeBase, SheetRow};
pub use sheets::{GoogleSheetsSource, JsonFileSource, SheetSource, SheetsAuth};
pub use store::KnowledgeBaseStore;
