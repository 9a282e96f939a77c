mod console;

use std::env;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use sanad_agents::{
    AgentSession, Capabilities, GuardianEvent, GuardianHandle, GuardianRuntime,
    HybridOrchestrator, LocationProvider, MonotonicClock, NoLocation,
};
use sanad_core::{env_pairs, EngineConfig, FallState, GeoPoint};
use sanad_ml::{KeywordBackend, ModelBackend};
use sanad_observability::{init_tracing, AppMetrics};
use sanad_storage::{SettingsRepository, Store};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::info;

use crate::console::{ConsoleDispatcher, ConsoleNotifier, ConsoleSpeech, FixedLocation};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "sanad")]
#[command(about = "Sanad voice command engine CLI")]
struct Cli {
    /// Attach the offline keyword model as the fallback classifier.
    #[arg(long, global = true)]
    keyword_model: bool,

    /// Per-run setting override, e.g. `--set escalation.wellness_check_ms=2000`.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve one utterance and print the decision.
    Resolve { text: String },
    Chat {
        #[arg(long)]
        senior: bool,
    },
    /// Feed synthetic impact magnitudes through the guardian runtime.
    SimulateFall {
        #[arg(long, value_delimiter = ',', required = true)]
        magnitudes: Vec<f32>,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
        /// Scripted spoken replies, consumed in order.
        #[arg(long)]
        reply: Vec<String>,
        #[arg(long, requires = "longitude", allow_hyphen_values = true)]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude", allow_hyphen_values = true)]
        longitude: Option<f64>,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    List,
    Set { key: String, value: String },
    Delete { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("sanad_cli");
    let cli = Cli::parse();

    let store = open_store().await?;
    let metrics = AppMetrics::shared();

    match cli.command {
        Command::Resolve { text } => {
            let config = load_config(&store, &cli.overrides).await?;
            let orchestrator = build_orchestrator(&config, cli.keyword_model, metrics);
            let decision = orchestrator.resolve(&text).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Chat { senior } => {
            let config = load_config(&store, &cli.overrides).await?;
            run_chat(&config, cli.keyword_model, senior, metrics).await?;
        }
        Command::SimulateFall {
            magnitudes,
            interval_ms,
            reply,
            latitude,
            longitude,
        } => {
            let config = load_config(&store, &cli.overrides).await?;
            let location: Arc<dyn LocationProvider> = match latitude.zip(longitude) {
                Some((latitude, longitude)) => Arc::new(FixedLocation(GeoPoint {
                    latitude,
                    longitude,
                })),
                None => Arc::new(NoLocation),
            };
            simulate_fall(
                &config,
                &magnitudes,
                Duration::from_millis(interval_ms),
                reply,
                location,
                metrics,
            )
            .await?;
        }
        Command::Settings { command } => match command {
            SettingsCommand::List => {
                let settings = store.load_settings().await?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsCommand::Set { key, value } => {
                EngineConfig::default()
                    .apply(&key, &value)
                    .with_context(|| format!("refusing to store {key}"))?;
                store.put_setting(&key, &value).await?;
                println!("{key} = {value}");
            }
            SettingsCommand::Delete { key } => {
                if store.delete_setting(&key).await? {
                    println!("deleted {key}");
                } else {
                    println!("{key} was not set");
                }
            }
        },
    }

    Ok(())
}

async fn open_store() -> Result<Store> {
    if let Ok(database_url) = env::var("SANAD_DATABASE_URL") {
        Store::sqlite(&database_url).await
    } else {
        Ok(Store::memory())
    }
}

/// Stored settings, then `SANAD_*` variables, then `--set` overrides.
async fn load_config(store: &Store, overrides: &[String]) -> Result<EngineConfig> {
    let mut pairs: Vec<(String, String)> = store
        .load_settings()
        .await?
        .into_iter()
        .map(|entry| (entry.key, entry.value))
        .collect();
    pairs.extend(
        env_pairs()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value)),
    );
    for raw in overrides {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("override {raw:?} is not KEY=VALUE"))?;
        pairs.push((key.to_string(), value.to_string()));
    }
    EngineConfig::from_pairs(pairs).context("invalid engine configuration")
}

fn build_orchestrator(
    config: &EngineConfig,
    keyword_model: bool,
    metrics: Arc<AppMetrics>,
) -> HybridOrchestrator {
    let model: Option<Arc<dyn ModelBackend>> = if keyword_model {
        Some(Arc::new(KeywordBackend))
    } else {
        None
    };
    HybridOrchestrator::new(config, model, metrics)
}

fn build_capabilities(
    config: &EngineConfig,
    speech: Arc<ConsoleSpeech>,
    location: Arc<dyn LocationProvider>,
) -> Capabilities {
    Capabilities {
        speech,
        dispatcher: Arc::new(ConsoleDispatcher::new(config.guardian_contacts.clone())),
        notifier: Arc::new(ConsoleNotifier::new(config.guardian_contacts.clone())),
        location,
    }
}

fn print_events(guardian: &GuardianHandle) -> JoinHandle<()> {
    let mut events = guardian.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => println!("[guardian] skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &GuardianEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("[guardian] {line}"),
        Err(err) => println!("[guardian] unprintable event: {err}"),
    }
}

async fn run_chat(
    config: &EngineConfig,
    keyword_model: bool,
    senior: bool,
    metrics: Arc<AppMetrics>,
) -> Result<()> {
    let speech = Arc::new(ConsoleSpeech::new(Vec::new()));
    let (guardian, guardian_task) = GuardianRuntime::spawn(
        config,
        build_capabilities(config, speech.clone(), Arc::new(NoLocation)),
        metrics.clone(),
        Arc::new(MonotonicClock::new()),
    );
    let printer = print_events(&guardian);

    let session = AgentSession::new(
        config,
        build_orchestrator(config, keyword_model, metrics.clone()),
        speech,
        Some(guardian.clone()),
        metrics.clone(),
    );
    if senior {
        session.set_senior_mode(true);
    }

    println!("Sanad chat mode. type 'exit' to quit, '/help' for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        if let Some(command) = message.strip_prefix('/') {
            run_chat_command(command, &session, &guardian, &metrics).await?;
            continue;
        }

        let outcome = session.handle_utterance(message).await;
        println!("\n{}\n", serde_json::to_string_pretty(&outcome)?);
    }

    guardian.shutdown().await?;
    guardian_task.await?;
    drop(guardian);
    printer.abort();
    println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    Ok(())
}

async fn run_chat_command(
    command: &str,
    session: &AgentSession,
    guardian: &GuardianHandle,
    metrics: &AppMetrics,
) -> Result<()> {
    match command.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["senior", "on"] => session.set_senior_mode(true),
        ["senior", "off"] => session.set_senior_mode(false),
        ["cancel"] => guardian.cancel_emergency().await?,
        ["status"] => println!("{}", serde_json::to_string_pretty(&guardian.snapshot().await?)?),
        ["metrics"] => println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?),
        _ => println!("commands: /senior on|off, /cancel, /status, /metrics"),
    }
    Ok(())
}

async fn simulate_fall(
    config: &EngineConfig,
    magnitudes: &[f32],
    interval: Duration,
    replies: Vec<String>,
    location: Arc<dyn LocationProvider>,
    metrics: Arc<AppMetrics>,
) -> Result<()> {
    if magnitudes.iter().any(|magnitude| !magnitude.is_finite()) {
        bail!("magnitudes must be finite numbers");
    }

    let speech = Arc::new(ConsoleSpeech::new(replies));
    let (guardian, guardian_task) = GuardianRuntime::spawn(
        config,
        build_capabilities(config, speech, location),
        metrics.clone(),
        Arc::new(MonotonicClock::new()),
    );
    let printer = print_events(&guardian);

    guardian.start_monitoring().await?;
    for magnitude in magnitudes {
        guardian
            .push_reading(0.0, 0.0, config.fall.gravity + magnitude)
            .await?;
        tokio::time::sleep(interval).await;
    }

    let budget = simulation_budget(config);
    match tokio::time::timeout(budget, wait_until_settled(&guardian)).await {
        Ok(settled) => settled?,
        Err(_) => info!(budget_ms = budget.as_millis() as u64, "simulation budget exhausted"),
    }

    let snapshot = guardian.snapshot().await?;
    guardian.shutdown().await?;
    guardian_task.await?;
    drop(guardian);
    let _ = tokio::time::timeout(POLL_INTERVAL, printer).await;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    Ok(())
}

/// Longest a simulated fall can take to play out: the confirmation window,
/// every escalation round and a capability call per effect.
fn simulation_budget(config: &EngineConfig) -> Duration {
    let windows_ms = [
        config.fall.confirmation_window_ms,
        config.escalation.wellness_check_ms,
        config.escalation.confirmation_timeout_ms,
        config.escalation.location_timeout_ms,
    ]
    .into_iter()
    .fold(0_u64, |total, window| total.saturating_add(window.max(0) as u64));
    Duration::from_millis(windows_ms.saturating_add(config.capability_timeout_ms.saturating_mul(4)))
}

async fn wait_until_settled(guardian: &GuardianHandle) -> Result<()> {
    loop {
        let snapshot = guardian.snapshot().await?;
        let pending_fall = snapshot.fall_state == FallState::Suspected;
        if snapshot.escalation.is_none() && !pending_fall && snapshot.pending_deadlines == 0 {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
