use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser};
use tokio::{io::BufReader, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use watch_core::{
    analyst_cli,
    config::Config,
    geocoder::Geocoder,
    listener::{run_processing_worker, ChannelListener, ConsoleSink, QueueSink},
    pipeline::{AnalystPipeline, ProcessingPipeline},
    ports::{GeocodingBackend, LanguageModel, MessageSink},
    preferences::PreferencesStore,
    samples,
    schemas::default_channels,
    store::IncidentStore,
};
use watch_gemini::{GeminiClient, GoogleMapsClient};
use watch_listener::ListenerOptions;

const BANNER: &str = "
 👁️  THE WATCH
 Real-time safety intelligence: monitoring, processing, analysis
";

#[derive(Debug, Parser)]
#[command(
    name = "watch",
    about = "The Watch: safety intelligence from Telegram channels",
    group(ArgGroup::new("mode").args(["listener_only", "bot", "analyst_cli", "test_pipeline"]))
)]
struct Command {
    /// Listen to channels and print messages without processing them
    #[arg(long)]
    listener_only: bool,
    /// Run the Telegram bot
    #[arg(long)]
    bot: bool,
    /// Interactive analyst queries on stdin
    #[arg(long)]
    analyst_cli: bool,
    /// Process the bundled sample messages, no Telegram needed
    #[arg(long)]
    test_pipeline: bool,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Full,
    ListenerOnly,
    Bot,
    AnalystCli,
    TestPipeline,
}

impl Command {
    fn mode(&self) -> Mode {
        if self.listener_only {
            Mode::ListenerOnly
        } else if self.bot {
            Mode::Bot
        } else if self.analyst_cli {
            Mode::AnalystCli
        } else if self.test_pipeline {
            Mode::TestPipeline
        } else {
            Mode::Full
        }
    }
}

/// Shared services every mode draws from.
struct Services {
    cfg: Arc<Config>,
    model: Arc<dyn LanguageModel>,
    analyst: Arc<AnalystPipeline>,
    processing: Arc<ProcessingPipeline>,
}

impl Services {
    fn build(cfg: Arc<Config>) -> anyhow::Result<Self> {
        let gemini = Arc::new(GeminiClient::new(
            cfg.google_api_key.clone(),
            cfg.gemini_model.clone(),
            cfg.gemini_embedding_model.clone(),
            cfg.http_timeout,
        )?);
        let maps: Arc<dyn GeocodingBackend> = Arc::new(GoogleMapsClient::new(
            cfg.google_api_key.clone(),
            cfg.http_timeout,
        )?);
        let geocoder = Arc::new(Geocoder::new(Some(maps)));
        let store = Arc::new(
            IncidentStore::open(&cfg.persist_directory, &cfg.collection_name, gemini.clone())
                .context("failed to open incident store")?,
        );

        let model: Arc<dyn LanguageModel> = gemini;
        let analyst = Arc::new(AnalystPipeline::new(
            model.clone(),
            geocoder.clone(),
            store.clone(),
        ));
        let processing = Arc::new(
            ProcessingPipeline::new(model.clone(), geocoder, store)
                .with_temperature(cfg.extraction_temperature),
        );
        info!(model = %cfg.gemini_model, "services ready");

        Ok(Self {
            cfg,
            model,
            analyst,
            processing,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Command::parse();
    println!("{BANNER}");

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            eprintln!("❌ {e}");
            eprintln!("Please set GOOGLE_API_KEY in your environment or a .env file.");
            std::process::exit(1);
        }
    };
    for (var, purpose) in cfg.missing_optional() {
        println!("⚠️  {var} not set ({purpose})");
    }

    watch_core::logging::init("watch", opts.debug)?;

    let services = Services::build(cfg)?;
    match opts.mode() {
        Mode::Full => run_full(&services).await,
        Mode::ListenerOnly => run_listener_only(&services).await,
        Mode::Bot => run_bot(&services).await,
        Mode::AnalystCli => run_analyst_cli(&services).await,
        Mode::TestPipeline => run_test_pipeline(&services).await,
    }
}

/// Cancel `token` on Ctrl+C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            token.cancel();
        }
    });
}

async fn listen(services: &Services, sink: Arc<dyn MessageSink>) -> anyhow::Result<()> {
    let opts = ListenerOptions::from_config(&services.cfg)?;
    let listener = Arc::new(ChannelListener::new(default_channels(), sink));
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    watch_listener::run(opts, listener, cancel).await?;
    Ok(())
}

async fn run_full(services: &Services) -> anyhow::Result<()> {
    if !services.cfg.has_listener_credentials() {
        warn!("Telegram credentials not configured, running in demo mode");
        println!("⚠️  Running in DEMO MODE (no Telegram credentials)");
        println!("   Set TELEGRAM_API_ID and TELEGRAM_API_HASH to enable the listener.\n");
        return run_analyst_cli(services).await;
    }

    info!("starting full system (listener + processing)");
    let (tx, rx) = mpsc::channel(services.cfg.queue_capacity.max(1));
    let worker = tokio::spawn(run_processing_worker(rx, services.processing.clone()));

    // The sink owns the only sender; once the listener is gone the worker
    // drains what is queued and returns.
    let result = listen(services, Arc::new(QueueSink::new(tx))).await;

    match worker.await {
        Ok(summary) => info!(
            stored = summary.stored,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            failed = summary.failed,
            "full system stopped"
        ),
        Err(e) => warn!("processing worker panicked: {e}"),
    }
    result
}

async fn run_listener_only(services: &Services) -> anyhow::Result<()> {
    info!("starting listener only, messages are printed and not processed");
    listen(services, Arc::new(ConsoleSink)).await
}

async fn run_bot(services: &Services) -> anyhow::Result<()> {
    let prefs = Arc::new(PreferencesStore::open(&services.cfg.preferences_file));
    watch_telegram::router::run_polling(
        services.cfg.clone(),
        services.analyst.clone(),
        services.model.clone(),
        prefs,
    )
    .await
    .context("telegram bot failed")
}

async fn run_analyst_cli(services: &Services) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    analyst_cli::run(&services.analyst, stdin, tokio::io::stdout()).await?;
    Ok(())
}

async fn run_test_pipeline(services: &Services) -> anyhow::Result<()> {
    samples::run_sample_pipeline(&services.processing, &services.analyst, tokio::io::stdout())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Command, clap::Error> {
        Command::try_parse_from(std::iter::once("watch").chain(args.iter().copied()))
    }

    #[test]
    fn no_flags_runs_full_system() {
        let cmd = parse(&[]).unwrap();
        assert_eq!(cmd.mode(), Mode::Full);
        assert!(!cmd.debug);
    }

    #[test]
    fn each_flag_selects_its_mode() {
        assert_eq!(parse(&["--listener-only"]).unwrap().mode(), Mode::ListenerOnly);
        assert_eq!(parse(&["--bot"]).unwrap().mode(), Mode::Bot);
        assert_eq!(parse(&["--analyst-cli"]).unwrap().mode(), Mode::AnalystCli);
        let cmd = parse(&["--test-pipeline", "--debug"]).unwrap();
        assert_eq!(cmd.mode(), Mode::TestPipeline);
        assert!(cmd.debug);
    }

    #[test]
    fn two_modes_are_rejected() {
        let err = parse(&["--bot", "--analyst-cli"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn command_definition_is_consistent() {
        use clap::CommandFactory;
        Command::command().debug_assert();
    }
}
