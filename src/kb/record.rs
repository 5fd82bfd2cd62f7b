//! Knowledge base records and the parsed table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;

use crate::error::KnowledgeBaseError;

/// Column holding the comma-separated keyword list.
pub const COL_KEYWORDS: &str = "keywords";
/// Column holding the Spanish answer.
pub const COL_STEPS_ES: &str = "steps_es";
/// Column holding the English answer.
pub const COL_STEPS_EN: &str = "steps_en";

/// One spreadsheet row, keyed by column header.
pub type SheetRow = HashMap<String, String>;

/// A keyword → answer record.
#[derive(Debug, Clone)]
pub struct KbRecord {
    /// The keyword cell exactly as stored in the sheet.
    pub raw_keywords: String,
    /// Trimmed, lowercased, non-empty keywords.
    pub keywords: Vec<String>,
    /// `\b<keyword>\b` for each keyword, literal-escaped.
    patterns: Vec<Regex>,
    pub steps_es: String,
    pub steps_en: String,
}

impl KbRecord {
    /// Build a record from its three cells.
    pub fn new(
        raw_keywords: impl Into<String>,
        steps_es: impl Into<String>,
        steps_en: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let raw_keywords = raw_keywords.into();
        let keywords = split_keywords(&raw_keywords);
        let patterns = keywords
            .iter()
            .map(|k| Regex::new(&format!(r"\b{}\b", regex::escape(k))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw_keywords,
            keywords,
            patterns,
            steps_es: steps_es.into(),
            steps_en: steps_en.into(),
        })
    }

    /// Whether any keyword occurs as a whole word in `lowered`.
    ///
    /// `lowered` must already be lowercase.
    pub fn matches(&self, lowered: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(lowered))
    }

    /// Answer for a detected language code. English only when requested and
    /// present; Spanish otherwise.
    pub fn answer_for(&self, lang: &str) -> &str {
        if lang.starts_with("en") && !self.steps_en.is_empty() {
            &self.steps_en
        } else {
            &self.steps_es
        }
    }
}

/// Split a raw keyword cell on commas; trim, lowercase, drop empties.
pub fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Ordered knowledge base table. Row order is match precedence.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    records: Vec<KbRecord>,
    /// Rows dropped as malformed during the last load.
    skipped: usize,
    loaded_at: DateTime<Utc>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl KnowledgeBase {
    pub fn new(records: Vec<KbRecord>) -> Self {
        Self {
            records,
            skipped: 0,
            loaded_at: Utc::now(),
        }
    }

    /// Parse source rows into a table. Malformed rows are logged and skipped.
    ///
    /// Fails only when the source has rows but no `keywords` column at all,
    /// which means the sheet is not a knowledge base.
    pub fn from_rows(source_name: &str, rows: &[SheetRow]) -> Result<Self, KnowledgeBaseError> {
        if !rows.is_empty() && !rows.iter().any(|r| r.contains_key(COL_KEYWORDS)) {
            return Err(KnowledgeBaseError::SourceUnavailable {
                source_name: source_name.to_string(),
                reason: format!("missing required column '{COL_KEYWORDS}'"),
            });
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut skipped = 0;

        // Row 1 is the header in the sheet; data starts at row 2.
        for (idx, row) in rows.iter().enumerate() {
            match parse_row(idx + 2, row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(source = %source_name, error = %e, "Skipping knowledge base row");
                    skipped += 1;
                }
            }
        }

        Ok(Self {
            records,
            skipped,
            loaded_at: Utc::now(),
        })
    }

    pub fn records(&self) -> &[KbRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

fn cell<'a>(row: &'a SheetRow, column: &str) -> &'a str {
    row.get(column).map(String::as_str).unwrap_or_default()
}

fn parse_row(row_number: usize, row: &SheetRow) -> Result<KbRecord, KnowledgeBaseError> {
    let malformed = |reason: String| KnowledgeBaseError::MalformedRecord {
        row: row_number,
        reason,
    };

    let raw_keywords = cell(row, COL_KEYWORDS);
    if split_keywords(raw_keywords).is_empty() {
        return Err(malformed("no keywords".into()));
    }

    let steps_es = cell(row, COL_STEPS_ES);
    let steps_en = cell(row, COL_STEPS_EN);
    if steps_es.trim().is_empty() && steps_en.trim().is_empty() {
        return Err(malformed("no answer text".into()));
    }

    KbRecord::new(raw_keywords, steps_es, steps_en).map_err(|e| malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(keywords: &str, es: &str, en: &str) -> SheetRow {
        HashMap::from([
            (COL_KEYWORDS.to_string(), keywords.to_string()),
            (COL_STEPS_ES.to_string(), es.to_string()),
            (COL_STEPS_EN.to_string(), en.to_string()),
        ])
    }

    #[test]
    fn split_keywords_normalizes_and_filters() {
        assert_eq!(
            split_keywords(" Login Issue ,, PASSWORD,  "),
            vec!["login issue".to_string(), "password".to_string()]
        );
        assert!(split_keywords(" , ,").is_empty());
    }

    #[test]
    fn record_matches_whole_words_only() {
        let record = KbRecord::new("login", "es", "en").unwrap();
        assert!(record.matches("my login fails"));
        assert!(record.matches("login"));
        assert!(!record.matches("relogin fails"));
        assert!(!record.matches("logins fail"));
    }

    #[test]
    fn record_escapes_regex_metacharacters() {
        let record = KbRecord::new("v1.2, a+b", "es", "en").unwrap();
        assert!(record.matches("after the v1.2 upgrade"));
        assert!(record.matches("see a+b now"));
        assert!(!record.matches("after the v112 upgrade"));
        assert!(!record.matches("see aab now"));
    }

    #[test]
    fn empty_keyword_entries_never_match() {
        let record = KbRecord::new("vpn,,", "es", "en").unwrap();
        assert_eq!(record.keywords, vec!["vpn".to_string()]);
        assert!(!record.matches("nothing relevant here"));
    }

    #[test]
    fn answer_language_selection() {
        let record = KbRecord::new("login issue", "Reinicia sesión", "Restart session").unwrap();
        assert_eq!(record.answer_for("en"), "Restart session");
        assert_eq!(record.answer_for("en-US"), "Restart session");
        assert_eq!(record.answer_for("es"), "Reinicia sesión");
        assert_eq!(record.answer_for("fr"), "Reinicia sesión");

        let spanish_only = KbRecord::new("login issue", "Reinicia sesión", "").unwrap();
        assert_eq!(spanish_only.answer_for("en"), "Reinicia sesión");
    }

    #[test]
    fn from_rows_keeps_order_and_skips_malformed() {
        let rows = vec![
            row("printer", "Reinicia la impresora", "Restart the printer"),
            row(" , ", "sin claves", "no keywords"),
            row("vpn", "", ""),
            row("vpn, tunnel", "Reconecta la VPN", ""),
        ];
        let kb = KnowledgeBase::from_rows("test", &rows).unwrap();
        assert_eq!(kb.len(), 2);
        assert_eq!(kb.skipped(), 2);
        assert_eq!(kb.records()[0].raw_keywords, "printer");
        assert_eq!(kb.records()[1].raw_keywords, "vpn, tunnel");
    }

    #[test]
    fn from_rows_missing_english_column_is_empty() {
        let rows = vec![HashMap::from([
            (COL_KEYWORDS.to_string(), "vpn".to_string()),
            (COL_STEPS_ES.to_string(), "Reconecta".to_string()),
        ])];
        let kb = KnowledgeBase::from_rows("test", &rows).unwrap();
        assert_eq!(kb.records()[0].steps_en, "");
    }

    #[test]
    fn from_rows_without_keywords_column_fails() {
        let rows = vec![HashMap::from([("question".to_string(), "x".to_string())])];
        let err = KnowledgeBase::from_rows("sheet", &rows).unwrap_err();
        assert!(matches!(err, KnowledgeBaseError::SourceUnavailable { .. }));
    }

    #[test]
    fn from_rows_empty_source_is_empty_table() {
        let kb = KnowledgeBase::from_rows("sheet", &[]).unwrap();
        assert!(kb.is_empty());
        assert_eq!(kb.skipped(), 0);
    }
}
