//! Message matcher: channel rule → exact keyword → fuzzy keyword → nothing.

use std::sync::Arc;

use tracing::debug;

use crate::kb::similarity::closest_match;
use crate::kb::{KbRecord, KnowledgeBaseStore};
use crate::lang::LanguageSelector;
use crate::pipeline::rules::PatternTable;
use crate::pipeline::types::MatchResult;

/// Minimum similarity for the fuzzy fallback.
pub const FUZZY_CUTOFF: f64 = 0.55;

/// Decides how a message should be answered.
pub struct Matcher {
    rules: PatternTable,
    kb: Arc<KnowledgeBaseStore>,
    language: LanguageSelector,
}

impl Matcher {
    pub fn new(rules: PatternTable, kb: Arc<KnowledgeBaseStore>, language: LanguageSelector) -> Self {
        Self { rules, kb, language }
    }

    /// Match one message. First success wins:
    ///
    /// 1. the channel's rule, if any pattern matches (knowledge base not consulted)
    /// 2. the first knowledge base record with a keyword occurring as a whole word
    /// 3. the record whose raw keyword cell is most similar to the whole text
    ///
    /// A record hit whose answer is empty in the chosen language ends the
    /// search with `NoMatch`.
    pub async fn match_message(&self, channel_id: &str, text: &str) -> MatchResult {
        if let Some(rule) = self.rules.evaluate(channel_id, text) {
            return MatchResult::ChannelRule {
                response: rule.response_template.clone(),
                notify: rule.notify.clone(),
            };
        }

        // One snapshot for the whole scan.
        let kb = self.kb.current().await;
        let lowered = text.to_lowercase();

        if let Some(record) = kb.records().iter().find(|r| r.matches(&lowered)) {
            debug!(keywords = %record.raw_keywords, "Exact keyword match");
            return self.answer(record, text);
        }

        // The raw cell is compared whole, not per keyword.
        let raw_fields = kb.records().iter().map(|r| r.raw_keywords.as_str());
        if let Some((idx, score)) = closest_match(&lowered, raw_fields, FUZZY_CUTOFF) {
            let matched = &kb.records()[idx].raw_keywords;
            if let Some(record) = kb.records().iter().find(|r| &r.raw_keywords == matched) {
                debug!(keywords = %record.raw_keywords, score, "Fuzzy keyword match");
                return self.answer(record, text);
            }
        }

        MatchResult::NoMatch
    }

    fn answer(&self, record: &KbRecord, text: &str) -> MatchResult {
        let lang = self.language.detect(text);
        let answer = record.answer_for(&lang);
        if answer.is_empty() {
            debug!(keywords = %record.raw_keywords, lang = %lang, "Matched record has no answer");
            return MatchResult::NoMatch;
        }
        MatchResult::KnowledgeBase {
            answer: answer.to_string(),
        }
    }
}
