use std::future::Future;
use std::sync::Arc;

use analysis_orchestrator::{
    AnalysisOrchestrator, AnalysisPhase, AnalysisResult, TrainingOrchestrator, TrainingPhase,
    TrainingSnapshot,
};
use anyhow::{bail, Result};
use backend_client::{BackendConfig, HttpTaskBackend};
use clap::{Parser, Subcommand};
use predictions_normalizer::{
    dedupe_by_date, is_bullish, latest_price, sort_chronologically, ChartSeries, Horizon,
};
use task_core::{SessionIdentity, TaskBackend};

/// Run analysis and model training jobs against the task API and follow them
/// until they finish.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Overrides TASK_API_URL
    #[arg(long)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze a ticker, waiting out model training if the backend needs it
    Analyze {
        ticker: String,
        /// Forecast window to print: week, month or quarter
        #[arg(long, default_value = "week")]
        horizon: Horizon,
        /// Reuse a session (thread) id instead of generating one
        #[arg(long)]
        session: Option<String>,
    },
    /// Train the parent (market-wide) model
    TrainParent,
    /// Train the child model of one ticker
    TrainChild { ticker: String },
    /// Check that the task API is reachable
    Health,
}

fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = BackendConfig::from_env()?;
    if let Some(url) = cli.api_url {
        config.base_url = url;
    }
    tracing::info!("Task API: {}", config.base_url);

    let http = HttpTaskBackend::from_config(&config)?;
    if let Command::Health = cli.command {
        if http.client().health().await? {
            println!("{} is healthy", config.base_url);
            return Ok(());
        }
        bail!("{} is not healthy", config.base_url);
    }

    let backend: Arc<dyn TaskBackend> = Arc::new(http);
    match cli.command {
        Command::Analyze {
            ticker,
            horizon,
            session,
        } => {
            let session = session
                .map(SessionIdentity::from)
                .unwrap_or_else(SessionIdentity::generate);
            let orchestrator =
                AnalysisOrchestrator::with_options(backend, session, config.poll_interval);
            run_analysis(&orchestrator, &ticker.to_uppercase(), horizon).await
        }
        Command::TrainParent => {
            let orchestrator = TrainingOrchestrator::with_poll_interval(backend, config.poll_interval);
            run_training(orchestrator.train_parent(), &orchestrator).await
        }
        Command::TrainChild { ticker } => {
            let orchestrator = TrainingOrchestrator::with_poll_interval(backend, config.poll_interval);
            run_training(orchestrator.train_child(ticker.to_uppercase()), &orchestrator).await
        }
        Command::Health => Ok(()),
    }
}

async fn run_analysis(
    orchestrator: &AnalysisOrchestrator,
    ticker: &str,
    horizon: Horizon,
) -> Result<()> {
    let mut updates = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snap = updates.borrow_and_update().clone();
            if let Some(stage) = snap.stage() {
                tracing::info!(
                    "Training {}: {:.0}% {} ({:.0}s)",
                    snap.task_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
                    snap.progress,
                    stage,
                    snap.elapsed_seconds
                );
            }
        }
    });

    tracing::info!(
        "Analyzing {} (session {})",
        ticker,
        orchestrator.session().short()
    );
    orchestrator.analyze(ticker).await;
    let snap = orchestrator.settled().await;
    reporter.abort();

    match (snap.phase, snap.result) {
        (AnalysisPhase::Done, Some(result)) => {
            print_result(ticker, &result, horizon);
            Ok(())
        }
        _ => bail!(
            "Analysis of {} failed: {}",
            ticker,
            snap.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn print_result(ticker: &str, result: &AnalysisResult, horizon: Horizon) {
    let report = &result.report;
    let recommendation = report.recommendation_text();
    let forecast = dedupe_by_date(&sort_chronologically(&result.forecast));
    let history = dedupe_by_date(&sort_chronologically(&result.history));

    println!("=== {} ===", ticker);
    println!(
        "Recommendation: {} ({})",
        recommendation,
        if is_bullish(&recommendation) { "bullish" } else { "not bullish" }
    );
    println!("Confidence: {}", report.confidence_text());
    match latest_price(&history, &forecast) {
        Some(price) => println!("Latest price: ${:.2}", price),
        None => println!("Latest price: N/A"),
    }

    let chart = ChartSeries::build(&forecast, &history);
    println!(
        "Chart: {} historical points, {} forecast points",
        chart.history.len(),
        chart.forecast.len()
    );

    let window = horizon.window(&forecast);
    if !window.is_empty() {
        println!("Forecast ({}):", horizon.label());
        for point in window {
            println!("  {}  {:>10.2}", point.date, point.close);
        }
    }

    let text = report.report_text();
    if !text.is_empty() {
        println!();
        println!("{}", text);
    }
}

async fn run_training(
    request: impl Future<Output = TrainingSnapshot>,
    orchestrator: &TrainingOrchestrator,
) -> Result<()> {
    let mut updates = orchestrator.subscribe();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snap = updates.borrow_and_update().clone();
            if let Some(stage) = snap.stage() {
                tracing::info!("{:.0}% {} ({:.0}s)", snap.progress, stage, snap.elapsed_seconds);
            }
        }
    });

    request.await;
    let snap = orchestrator.settled().await;
    reporter.abort();

    println!("{}", snap.message);
    match snap.phase {
        TrainingPhase::Completed => Ok(()),
        _ => bail!("training did not complete"),
    }
}
