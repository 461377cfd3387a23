// Keymapper CLI
// Validates key map configurations and replays event scripts against them

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;

use keymapper_core::detection::compile_key_maps;
use keymapper_core::event::{load_script, run_script, ScriptStep};
use keymapper_core::{
    ActionData, ActionExecutor, Config, EventWorker, InputEventType, KeyEvent, KeyMapController,
    PerformError, RecordingExecutor, SettingsConstraintGate,
};

/// Key map trigger recognition engine
#[derive(Parser, Debug)]
#[command(name = "keymapper")]
#[command(version)]
#[command(about = "Recognizes key map triggers and runs their actions", long_about = None)]
struct Args {
    /// TOML configuration file (defaults to ~/.config/keymapper/config.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate and compile the config, print a summary and exit
    #[arg(long)]
    check_config: bool,

    /// Event script to replay through the recognizer
    #[arg(long, value_name = "SCRIPT")]
    replay: Option<PathBuf>,

    /// How long to let running actions finish after the last scripted event
    #[arg(long, value_name = "MS", default_value_t = 1500)]
    settle_ms: u64,
}

/// Prints every performed action with its time since startup
struct ConsoleExecutor {
    record: RecordingExecutor,
    start: Instant,
}

impl ConsoleExecutor {
    fn new() -> Self {
        Self {
            record: RecordingExecutor::new(),
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

impl ActionExecutor for ConsoleExecutor {
    fn perform(
        &self,
        action: &ActionData,
        input: InputEventType,
        meta_state: u32,
    ) -> Result<(), PerformError> {
        self.record.perform(action, input, meta_state)?;
        println!("{:>6}ms  perform  {:<8} {}", self.elapsed_ms(), input, action);
        Ok(())
    }

    fn imitate(&self, event: &KeyEvent, input: InputEventType) -> Result<(), PerformError> {
        self.record.imitate(event, input)?;
        println!("{:>6}ms  imitate  {:<8} {}", self.elapsed_ms(), input, event.key);
        Ok(())
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

fn load_config(args: &Args) -> Result<Config> {
    let path = match args.config.clone().or_else(Config::default_path) {
        Some(path) => path,
        None => bail!("--config is required when no config directory is available"),
    };
    log::debug!("Loading configuration from {}", path.display());
    Config::from_toml_path(&path).with_context(|| format!("Failed to load {}", path.display()))
}

fn check_config(config: &Config) {
    let compiled = compile_key_maps(&config.key_maps, config.settings.timing());

    println!("Configuration is valid");
    println!(
        "  {} key maps, {} will be matched",
        config.key_maps.len(),
        compiled.len()
    );
    for entry in &compiled {
        let key_map = &entry.key_map;
        println!(
            "  - {} [{}] {} -> {} action(s), {} nodes",
            key_map.uid,
            entry.mode,
            key_map.trigger,
            key_map.actions.len(),
            entry.tree.len()
        );
    }
    for key_map in &config.key_maps {
        if !compiled.iter().any(|c| c.key_map.uid == key_map.uid) {
            println!("  - {} skipped", key_map.uid);
        }
    }
}

async fn replay(config: Config, steps: Vec<ScriptStep>, settle: Duration) -> Result<()> {
    let timing = *config.settings.timing();
    let gate = SettingsConstraintGate::new(Arc::new(RwLock::new(config.settings.clone())));
    let executor = Arc::new(ConsoleExecutor::new());
    let controller = KeyMapController::new(timing, executor.clone(), Arc::new(gate));

    let (_key_maps, snapshots) = watch::channel(config.key_maps);
    let worker = EventWorker::spawn(controller, snapshots);
    let matched = worker.compiled_key_maps().borrow().len();
    log::info!("Replaying {} events against {} key maps", steps.len(), matched);

    let outcomes = run_script(&worker, &steps).await.context("Replay failed")?;
    tokio::time::sleep(settle).await;
    worker.shutdown().await.context("Event worker failed")?;

    let consumed = outcomes.iter().filter(|o| o.consumed).count();
    println!(
        "{} events replayed, {} consumed, {} actions performed, {} imitated",
        outcomes.len(),
        consumed,
        executor.record.performed().len() - executor.record.imitated().len(),
        executor.record.imitated().len()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;

    if args.check_config {
        check_config(&config);
        return Ok(());
    }

    let Some(script_path) = args.replay.as_ref() else {
        bail!("Nothing to do: pass --check-config or --replay SCRIPT");
    };
    let steps = load_script(script_path)
        .with_context(|| format!("Failed to read script {}", script_path.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(replay(config, steps, Duration::from_millis(args.settle_ms)))
}
