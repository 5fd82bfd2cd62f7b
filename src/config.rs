//! Configuration types.
//!
//! Everything is read once at startup: connection settings from the
//! environment, routing (channel rules, people, reply templates) from an
//! optional JSON file with built-in defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::channels::slack::SlackConfig;
use crate::error::ConfigError;

// ── Environment ─────────────────────────────────────────────────────

/// Which chat platform to connect to.
#[derive(Debug, Clone)]
pub enum PlatformConfig {
    Slack(SlackConfig),
    /// Local stdin/stdout session posting into one channel id.
    Cli { channel_id: String },
}

/// Where knowledge base rows come from.
#[derive(Debug, Clone)]
pub enum KbSourceConfig {
    GoogleSheet {
        sheet_id: String,
        sheet_name: String,
        credentials_path: PathBuf,
    },
    File { path: PathBuf },
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub platform: PlatformConfig,
    pub kb_source: KbSourceConfig,
    /// Scratch directory for OCR temp files.
    pub scratch_dir: PathBuf,
    /// Timeout for attachment downloads and OCR.
    pub io_timeout: Duration,
    pub tesseract_bin: String,
    /// Language used when detection fails.
    pub default_language: String,
    /// JSON routing file; built-in defaults when absent.
    pub routing_path: Option<PathBuf>,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_required(key: &str) -> Result<String, ConfigError> {
    env_opt(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

impl Config {
    /// Read configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let io_timeout = match env_opt("FIXBUDDY_OCR_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "FIXBUDDY_OCR_TIMEOUT_SECS".into(),
                    message: format!("expected whole seconds, got '{raw}'"),
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(10),
        };

        let platform_name = env_opt("FIXBUDDY_PLATFORM").unwrap_or_else(|| "slack".to_string());
        let platform = match platform_name.as_str() {
            "slack" => PlatformConfig::Slack(SlackConfig {
                bot_token: SecretString::from(env_required("SLACK_BOT_TOKEN")?),
                app_token: SecretString::from(env_required("SLACK_APP_TOKEN")?),
                http_timeout: io_timeout,
            }),
            "cli" => PlatformConfig::Cli {
                channel_id: env_opt("FIXBUDDY_CLI_CHANNEL").unwrap_or_else(|| "cli".to_string()),
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "FIXBUDDY_PLATFORM".into(),
                    message: format!("expected 'slack' or 'cli', got '{other}'"),
                });
            }
        };

        let kb_source = match env_opt("FIXBUDDY_KB_FILE") {
            Some(path) => KbSourceConfig::File { path: path.into() },
            None => KbSourceConfig::GoogleSheet {
                sheet_id: env_required("GSHEET_ID")?,
                sheet_name: env_opt("SHEET_NAME").unwrap_or_else(|| "KB".to_string()),
                credentials_path: env_opt("GOOGLE_SA_CREDS")
                    .unwrap_or_else(|| "service_account.json".to_string())
                    .into(),
            },
        };

        Ok(Self {
            platform,
            kb_source,
            scratch_dir: env_opt("TEMP_DIR").unwrap_or_else(|| "tmp".to_string()).into(),
            io_timeout,
            tesseract_bin: env_opt("TESSERACT_BIN").unwrap_or_else(|| "tesseract".to_string()),
            default_language: env_opt("FIXBUDDY_DEFAULT_LANG")
                .unwrap_or_else(|| crate::lang::DEFAULT_LANGUAGE.to_string()),
            routing_path: env_opt("FIXBUDDY_ROUTING_FILE").map(PathBuf::from),
        })
    }
}

// ── Routing ─────────────────────────────────────────────────────────

/// One channel's canned-reply rule as written in the routing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRuleConfig {
    pub channel_id: String,
    /// Display name for logs, e.g. `#flow-errors`.
    #[serde(default)]
    pub name: Option<String>,
    /// Regexes, matched case-insensitively anywhere in the message.
    pub patterns: Vec<String>,
    /// Reply text; `{user}` is replaced with the author id.
    pub response: String,
    /// People to notify: names from `people`, or raw platform ids.
    #[serde(default)]
    pub notify: Vec<String>,
}

/// Fixed reply texts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTemplates {
    /// Prefix for knowledge base answers.
    pub kb_banner: String,
    /// Reply when nothing matched; `{user}` is replaced.
    pub fallback: String,
    /// Direct message to responsible parties; `{channel}` and `{link}` are replaced.
    pub notify: String,
}

/// Channel rules, people directory and reply templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Lowercase name → platform user id.
    #[serde(default)]
    pub people: BTreeMap<String, String>,
    #[serde(default)]
    pub channels: Vec<ChannelRuleConfig>,
    pub templates: ResponseTemplates,
}

const EN_RENEWALS: &[&str] = &[
    r"\brenewals?\b",
    r"\bchange request\b",
    r"\baccounts?\b",
    r"\bopportunit(?:y|ies)\b",
    r"\brates?\b",
];
const ES_RENEWALS: &[&str] = &[
    r"\brenovaciones?\b",
    r"\bsolicitud(?:es)? de cambio\b",
    r"\bcuentas?\b",
    r"\boportunidades?\b",
    r"\btarifas?\b",
];
const EN_FLOW: &[&str] = &[r"\bflow errors?\b", r"\bvalidation rules?\b", r"\bbugs?\b"];
const ES_FLOW: &[&str] = &[
    r"\berrores? de flujo\b",
    r"\breglas? de validación\b",
    r"\bvalidación(?:es)?\b",
    r"\bfallos?\b",
];

const SUGGESTION: &str =
    "Please upload a screenshot of the error, the record link, or both — whatever you have handy!";

impl RoutingConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::ParseError(format!("routing config: {e}")))
    }

    /// Platform mention for a person: `<@ID>` when known, the plain name otherwise.
    pub fn mention(&self, name: &str) -> String {
        match self.people.get(&name.to_lowercase()) {
            Some(id) => format!("<@{id}>"),
            None => name.to_string(),
        }
    }

    /// Resolve a notify entry to a platform id.
    pub fn resolve_recipient(&self, entry: &str) -> String {
        self.people
            .get(&entry.to_lowercase())
            .cloned()
            .unwrap_or_else(|| entry.to_string())
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        let people: BTreeMap<String, String> = [
            ("alex", "D07KG19EDHN"),
            ("ana", "D08PN9Z42LS"),
            ("francisco", "D06KQK7GXME"),
            ("montse", "D06FENAK5CZ"),
            ("martin", "D08J2FXTW86"),
        ]
        .into_iter()
        .map(|(name, id)| (name.to_string(), id.to_string()))
        .collect();

        let mut config = Self {
            people,
            channels: Vec::new(),
            templates: ResponseTemplates {
                kb_banner: "🛠️ *Pasos sugeridos:*".to_string(),
                fallback: String::new(),
                notify: "👀 *Heads-up!* Hay una nueva consulta en <#{channel}> → {link}".to_string(),
            },
        };

        let renewal_reply = format!(
            "Hi, <@{{user}}>, {}, {}, or {} will review your request ASAP!\n{SUGGESTION}",
            config.mention("alex"),
            config.mention("ana"),
            config.mention("francisco"),
        );
        let flow_reply = format!(
            "Hi, <@{{user}}>, {} or {} will review your request ASAP! :alert:\n{SUGGESTION}",
            config.mention("montse"),
            config.mention("martin"),
        );
        config.templates.fallback = format!(
            "Hi, <@{{user}}>, we couldn't detect your problem in our quick-reply catalog. \
             {}, {} or {} can guide you further.",
            config.mention("alex"),
            config.mention("montse"),
            config.mention("martin"),
        );

        let renewal_patterns: Vec<String> =
            EN_RENEWALS.iter().chain(ES_RENEWALS).map(|p| p.to_string()).collect();
        let flow_patterns: Vec<String> = EN_FLOW.iter().chain(ES_FLOW).map(|p| p.to_string()).collect();
        let renewal_team = vec!["alex".to_string(), "ana".to_string(), "francisco".to_string()];

        for (channel_id, name) in [
            ("CFT8WFLGY", "#renewals-latam"),
            ("C01LXQN2D0C", "#renewals-emea"),
            ("C07261Q282Z", "#renewals-apac"),
        ] {
            config.channels.push(ChannelRuleConfig {
                channel_id: channel_id.to_string(),
                name: Some(name.to_string()),
                patterns: renewal_patterns.clone(),
                response: renewal_reply.clone(),
                notify: renewal_team.clone(),
            });
        }
        config.channels.push(ChannelRuleConfig {
            channel_id: "C05KM25RM5W".to_string(),
            name: Some("#flow-errors".to_string()),
            patterns: flow_patterns,
            response: flow_reply,
            notify: vec!["montse".to_string(), "martin".to_string()],
        });

        config
    }
}
