//! Channel rules: canned replies for specific channels.
//!
//! Checked before the knowledge base: when a message in a configured channel
//! matches any of that channel's patterns, the bot answers with the channel's
//! template and pings the people responsible for it.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::config::RoutingConfig;
use crate::error::ConfigError;

/// A channel's patterns, reply and responsible parties.
#[derive(Debug, Clone)]
pub struct ChannelRule {
    pub channel_id: String,
    /// Display label for logs.
    pub label: String,
    /// Compiled case-insensitive patterns.
    pub patterns: Vec<Regex>,
    /// Reply with an unfilled `{user}` placeholder.
    pub response_template: String,
    /// Platform ids to notify.
    pub notify: Vec<String>,
}

impl ChannelRule {
    /// Compile a rule. Patterns are case-insensitive.
    pub fn new(
        channel_id: impl Into<String>,
        patterns: &[impl AsRef<str>],
        response_template: impl Into<String>,
        notify: Vec<String>,
    ) -> Result<Self, regex::Error> {
        let channel_id = channel_id.into();
        let patterns = patterns
            .iter()
            .map(|p| RegexBuilder::new(p.as_ref()).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            label: channel_id.clone(),
            channel_id,
            patterns,
            response_template: response_template.into(),
            notify,
        })
    }

    /// Whether any pattern matches anywhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// Channel id → rule.
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    rules: HashMap<String, ChannelRule>,
}

impl PatternTable {
    /// Build and validate the table from routing configuration.
    pub fn from_config(config: &RoutingConfig) -> Result<Self, ConfigError> {
        let mut table = Self::default();

        for (i, entry) in config.channels.iter().enumerate() {
            let invalid = |message: String| ConfigError::InvalidValue {
                key: format!("channels[{i}] ({})", entry.channel_id),
                message,
            };

            if entry.channel_id.trim().is_empty() {
                return Err(invalid("empty channel_id".into()));
            }
            if entry.patterns.is_empty() {
                return Err(invalid("no patterns".into()));
            }
            if table.rules.contains_key(&entry.channel_id) {
                return Err(invalid("duplicate channel_id".into()));
            }

            let notify = entry
                .notify
                .iter()
                .map(|n| config.resolve_recipient(n))
                .collect();
            let mut rule = ChannelRule::new(&entry.channel_id, &entry.patterns, &entry.response, notify)
                .map_err(|e| invalid(format!("invalid pattern: {e}")))?;
            if let Some(ref name) = entry.name {
                rule.label = name.clone();
            }
            table.insert(rule);
        }

        Ok(table)
    }

    /// Add or replace a rule.
    pub fn insert(&mut self, rule: ChannelRule) {
        self.rules.insert(rule.channel_id.clone(), rule);
    }

    /// Rule configured for a channel, if any.
    pub fn lookup(&self, channel_id: &str) -> Option<&ChannelRule> {
        self.rules.get(channel_id)
    }

    /// Rule for `channel_id` if one exists and matches `text`.
    pub fn evaluate(&self, channel_id: &str, text: &str) -> Option<&ChannelRule> {
        let rule = self.lookup(channel_id)?;
        if rule.is_match(text) {
            debug!(channel = %rule.label, "Message matched channel rule");
            Some(rule)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelRuleConfig;

    fn default_table() -> PatternTable {
        PatternTable::from_config(&RoutingConfig::default()).unwrap()
    }

    #[test]
    fn default_table_loads() {
        let table = default_table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.lookup("C05KM25RM5W").unwrap().label, "#flow-errors");
        assert_eq!(
            table.lookup("CFT8WFLGY").unwrap().notify,
            vec!["D07KG19EDHN", "D08PN9Z42LS", "D06KQK7GXME"]
        );
    }

    #[test]
    fn renewal_patterns_match_english_and_spanish() {
        let table = default_table();
        assert!(table.evaluate("CFT8WFLGY", "I need a renewal").is_some());
        assert!(table.evaluate("CFT8WFLGY", "Two RENEWALS pending").is_some());
        assert!(table.evaluate("CFT8WFLGY", "tengo una solicitud de cambio").is_some());
        assert!(table.evaluate("CFT8WFLGY", "which opportunities are open").is_some());
    }

    #[test]
    fn patterns_are_unanchored() {
        let table = default_table();
        assert!(table.evaluate("C05KM25RM5W", "hey team, seeing a flow error since monday").is_some());
    }

    #[test]
    fn word_boundaries_are_respected() {
        let table = default_table();
        // "bugs?" must not fire inside "debugging".
        assert!(table.evaluate("C05KM25RM5W", "debugging my report").is_none());
    }

    #[test]
    fn unknown_channel_never_matches() {
        let table = default_table();
        assert!(table.lookup("CUNKNOWN").is_none());
        assert!(table.evaluate("CUNKNOWN", "I need a renewal").is_none());
    }

    #[test]
    fn rule_from_other_channel_does_not_leak() {
        let table = default_table();
        assert!(table.evaluate("C05KM25RM5W", "I need a renewal").is_none());
    }

    fn routing_with(entry: ChannelRuleConfig) -> RoutingConfig {
        let mut routing = RoutingConfig::default();
        routing.channels = vec![entry];
        routing
    }

    fn entry(channel_id: &str, patterns: &[&str]) -> ChannelRuleConfig {
        ChannelRuleConfig {
            channel_id: channel_id.into(),
            name: None,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            response: "Hi <@{user}>".into(),
            notify: vec!["ana".into(), "U0RAW".into()],
        }
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = PatternTable::from_config(&routing_with(entry("C1", &["(unclosed"]))).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, message } => {
                assert!(key.contains("C1"));
                assert!(message.contains("invalid pattern"));
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn empty_patterns_rejected() {
        assert!(PatternTable::from_config(&routing_with(entry("C1", &[]))).is_err());
    }

    #[test]
    fn duplicate_channel_rejected() {
        let mut routing = routing_with(entry("C1", &["a"]));
        routing.channels.push(entry("C1", &["b"]));
        assert!(PatternTable::from_config(&routing).is_err());
    }

    #[test]
    fn notify_names_resolve_to_ids() {
        let table = PatternTable::from_config(&routing_with(entry("C1", &["billing"]))).unwrap();
        assert_eq!(table.lookup("C1").unwrap().notify, vec!["D08PN9Z42LS", "U0RAW"]);
        assert_eq!(table.lookup("C1").unwrap().label, "C1");
    }
}
