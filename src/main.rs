use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::Arc;

use fxport::broker::{BrokerAdapter, OandaClient, SimBroker};
use fxport::config::Settings;
use fxport::data::{CsvBarProvider, DataProvider};
use fxport::journal::JournalStore;
use fxport::models::Bar;
use fxport::notify::{DiscordNotifier, NoopNotifier, Notifier};
use fxport::portfolio::PortfolioEngine;
use fxport::reconcile::ReconcileEngine;
use fxport::risk::compute_budgets;
use fxport::Result;

#[derive(Parser)]
#[command(name = "fxport", about = "Multi-strategy FX portfolio paper-trading engine")]
struct Cli {
    /// Path to a TOML config file (environment overrides always apply)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay historical bars through the portfolio engine
    Replay {
        /// Days of history to replay
        #[arg(long, default_value_t = 30)]
        days: u32,
        /// Mirror trades to the simulated broker during replay
        #[arg(long)]
        mirror: bool,
    },
    /// Reconcile broker state against the journal and exit
    Reconcile,
    /// Print the computed risk budgets and exit
    Budgets,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Command::Replay { days, mirror } => run_replay(settings, days, mirror).await,
        Command::Reconcile => run_reconcile(settings).await,
        Command::Budgets => run_budgets(settings),
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fxport=info".into()),
        )
        .init();
}

fn load_history(settings: &Settings, days: u32) -> Result<HashMap<String, Vec<Bar>>> {
    let provider = CsvBarProvider::new(&settings.data_dir);
    let mut history = HashMap::new();
    for symbol in &settings.symbols {
        let bars = provider.get_intraday(symbol, &settings.interval, days)?;
        tracing::info!(symbol = %symbol, bars = bars.len(), "loaded history");
        history.insert(symbol.clone(), bars);
    }
    Ok(history)
}

fn notifier_from(settings: &Settings) -> Arc<dyn Notifier> {
    match &settings.notify.discord_webhook {
        Some(url) => Arc::new(DiscordNotifier::new(url.clone())),
        None => Arc::new(NoopNotifier),
    }
}

fn oanda_from_env(settings: &Settings) -> Result<OandaClient> {
    let api_key = std::env::var("OANDA_API_KEY")
        .map_err(|_| "OANDA_API_KEY not set but broker mirroring is enabled")?;
    let account_id = std::env::var("OANDA_ACCOUNT_ID")
        .map_err(|_| "OANDA_ACCOUNT_ID not set but broker mirroring is enabled")?;
    Ok(OandaClient::new(
        api_key,
        account_id,
        &settings.broker.env,
        settings.broker.tag_lookback_hours,
    )?)
}

async fn run_replay(settings: Settings, days: u32, mirror: bool) -> Result<()> {
    let all_history = load_history(&settings, days + settings.warmup_days)?;

    // Split warmup from the bars actually replayed
    let mut warmup: HashMap<String, Vec<Bar>> = HashMap::new();
    let mut replay: HashMap<String, Vec<Bar>> = HashMap::new();
    for (symbol, bars) in all_history {
        let cutoff = bars
            .last()
            .map(|b| b.timestamp - chrono::Duration::days(days as i64));
        match cutoff {
            Some(cutoff) => {
                let (before, after): (Vec<Bar>, Vec<Bar>) =
                    bars.into_iter().partition(|b| b.timestamp < cutoff);
                warmup.insert(symbol.clone(), before);
                replay.insert(symbol, after);
            }
            None => {
                warmup.insert(symbol.clone(), Vec::new());
                replay.insert(symbol, bars);
            }
        }
    }

    let journal = Arc::new(JournalStore::new(&settings.journal_url).await?);
    let broker: Option<Arc<dyn BrokerAdapter>> = if mirror {
        Some(Arc::new(SimBroker::new()))
    } else {
        None
    };
    let notifier = notifier_from(&settings);

    let mut portfolio = PortfolioEngine::new(settings, journal, broker, notifier)?;
    portfolio.prepare(&warmup);
    let stats = portfolio.run_replay(replay).await?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn run_reconcile(settings: Settings) -> Result<()> {
    let journal = Arc::new(JournalStore::new(&settings.journal_url).await?);
    let broker: Arc<dyn BrokerAdapter> = Arc::new(oanda_from_env(&settings)?);

    let engine = ReconcileEngine::new(
        broker,
        journal,
        settings.broker.flatten_on_conflict,
        settings.broker.tag_lookback_hours,
    );
    let summary = engine.on_start().await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_budgets(settings: Settings) -> Result<()> {
    let budgets = compute_budgets(
        &settings.strategies,
        settings.equity_usd,
        settings.risk.daily_risk_fraction,
        settings.risk.per_trade_fraction,
    );
    println!("{}", serde_json::to_string_pretty(&budgets)?);
    Ok(())
}
