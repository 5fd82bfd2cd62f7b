use std::sync::Arc;

use fixbuddy::bot::Bot;
use fixbuddy::channels::{Channel, CliChannel, SlackChannel};
use fixbuddy::config::{Config, KbSourceConfig, PlatformConfig, RoutingConfig};
use fixbuddy::kb::{GoogleSheetsSource, JsonFileSource, KnowledgeBaseStore, SheetSource, SheetsAuth};
use fixbuddy::lang::{LanguageSelector, WhatlangDetector};
use fixbuddy::ocr::TesseractExtractor;
use fixbuddy::pipeline::{Dispatcher, Matcher, PatternTable};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("Error: failed to install rustls crypto provider");
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("  export SLACK_BOT_TOKEN=xoxb-... SLACK_APP_TOKEN=xapp-... GSHEET_ID=...");
        std::process::exit(1);
    });

    let routing = match config.routing_path {
        Some(ref path) => RoutingConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("Error: failed to load routing file {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => RoutingConfig::default(),
    };
    let rules = PatternTable::from_config(&routing).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    eprintln!("🛠️  FixBuddy v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel rules: {}", rules.len());

    // ── Knowledge base ──────────────────────────────────────────────────
    let source: Arc<dyn SheetSource> = match config.kb_source {
        KbSourceConfig::GoogleSheet {
            ref sheet_id,
            ref sheet_name,
            ref credentials_path,
        } => {
            let auth = SheetsAuth::from_file(credentials_path).unwrap_or_else(|e| {
                eprintln!("Error: credentials {}: {}", credentials_path.display(), e);
                std::process::exit(1);
            });
            Arc::new(GoogleSheetsSource::new(sheet_id, sheet_name, auth).with_timeout(config.io_timeout))
        }
        KbSourceConfig::File { ref path } => Arc::new(JsonFileSource::new(path)),
    };
    eprintln!("   Knowledge base: {}", source.name());

    let kb = Arc::new(KnowledgeBaseStore::new(source));
    match kb.reload().await {
        Ok(table) => eprintln!("   Knowledge base rows: {}", table.len()),
        Err(e) => {
            tracing::warn!(error = %e, "Starting with an empty knowledge base");
            eprintln!("   Knowledge base: unavailable, starting empty");
        }
    }

    // ── Collaborators ───────────────────────────────────────────────────
    let extractor = Arc::new(
        TesseractExtractor::new(&config.scratch_dir)
            .with_binary(&config.tesseract_bin)
            .with_timeout(config.io_timeout),
    );
    eprintln!("   OCR: {} (scratch {})", config.tesseract_bin, config.scratch_dir.display());

    let language = LanguageSelector::new(Arc::new(WhatlangDetector::new()), &config.default_language);
    eprintln!("   Default language: {}", language.default_code());

    let channel: Arc<dyn Channel> = match config.platform {
        PlatformConfig::Slack(slack) => Arc::new(SlackChannel::new(slack)),
        PlatformConfig::Cli { channel_id } => {
            eprintln!("   Type a message and press Enter. /reloadkb reloads, /quit exits.\n");
            Arc::new(CliChannel::new(channel_id))
        }
    };
    eprintln!("   Platform: {}", channel.name());

    let matcher = Matcher::new(rules, Arc::clone(&kb), language);
    let dispatcher = Dispatcher::new(
        Arc::clone(&channel),
        matcher,
        extractor,
        Arc::clone(&kb),
        routing.templates,
    );

    Bot::new(channel, dispatcher).run().await?;
    Ok(())
}
