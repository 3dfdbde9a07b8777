use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use biominer::calibration::CalibrationState;
use biominer::config::AppConfig;
use biominer::coordinator::{Command, CommandOutcome, FeedbackCoordinator};
use biominer::events::{CoreEvent, EventBus};
use biominer::mining::{Difficulty, MiningConfig, MiningEngine, OptimizationStrategy};
use biominer::CalibrationFactor;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug)]
#[command(
    name = "biominer_cli",
    about = "Bio-feedback mining harness running against the simulated electrode array"
)]
struct Cli {
    /// Configuration file (defaults to config/biominer.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log verbosity
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full feedback loop and print events as JSON lines
    Simulate {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Mine continuously with auto-retargeting instead of one run per idle tick
        #[arg(long)]
        continuous: bool,
        #[arg(long, value_enum, default_value_t = StrategyArg::CalibratedStride)]
        strategy: StrategyArg,
        #[arg(long, default_value_t = 1 << 20)]
        max_attempts: u64,
        /// Include every electrode frame in the output
        #[arg(long)]
        frames: bool,
    },
    /// Run a single mining run and print the result
    Mine {
        #[arg(long, default_value_t = 1 << 12)]
        difficulty: u64,
        #[arg(long, default_value_t = 1 << 20)]
        max_attempts: u64,
        #[arg(long, default_value_t = 1)]
        threads: usize,
        #[arg(long, default_value_t = 0.5)]
        factor: f64,
        #[arg(long, default_value_t = 0.5)]
        signal_weight: f64,
        #[arg(long, value_enum, default_value_t = StrategyArg::Sequential)]
        strategy: StrategyArg,
    },
    /// Acquire frames, run one calibration cycle, optionally save the state
    Calibrate {
        #[arg(long, default_value_t = 256)]
        frames: usize,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print a saved calibration file
    Inspect { path: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Sequential,
    CalibratedOffset,
    CalibratedStride,
}

impl From<StrategyArg> for OptimizationStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Sequential => OptimizationStrategy::Sequential,
            StrategyArg::CalibratedOffset => OptimizationStrategy::CalibratedOffset,
            StrategyArg::CalibratedStride => OptimizationStrategy::CalibratedStride,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    biominer::init_logging(cli.log_level);

    let config = cli
        .config
        .map(AppConfig::load_from_file)
        .unwrap_or_else(AppConfig::load);

    match cli.command {
        Commands::Simulate {
            seconds,
            continuous,
            strategy,
            max_attempts,
            frames,
        } => run_simulate(
            config,
            Duration::from_secs(seconds),
            continuous,
            MiningConfig {
                max_attempts,
                strategy: strategy.into(),
                ..MiningConfig::default()
            },
            frames,
        ),
        Commands::Mine {
            difficulty,
            max_attempts,
            threads,
            factor,
            signal_weight,
            strategy,
        } => run_mine(
            config,
            difficulty,
            MiningConfig {
                max_attempts,
                thread_count: threads,
                signal_weight,
                strategy: strategy.into(),
                ..MiningConfig::default()
            },
            CalibrationFactor::new(factor),
        ),
        Commands::Calibrate { frames, output } => run_calibrate(config, frames, output),
        Commands::Inspect { path } => run_inspect(&path),
    }
}

fn run_simulate(
    config: AppConfig,
    duration: Duration,
    continuous: bool,
    mining: MiningConfig,
    include_frames: bool,
) -> Result<ExitCode> {
    let coordinator = FeedbackCoordinator::new(config);
    let handle = coordinator.spawn()?;
    let mut events = handle.subscribe();

    handle.execute(Command::Connect(None))?;
    handle.execute(Command::StartAcquisition)?;
    handle.execute(Command::StartLearning)?;
    handle.execute(Command::ConfigureMining(mining))?;
    if continuous {
        handle.execute(Command::StartContinuousMining {
            auto_retarget: true,
        })?;
    } else {
        handle.execute(Command::SetAutoMining(true))?;
    }

    let deadline = Instant::now() + duration;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        let Some(envelope) = events.recv_timeout(remaining.min(Duration::from_millis(100))) else {
            continue;
        };
        if !include_frames && matches!(envelope.event, CoreEvent::SignalsReceived(_)) {
            continue;
        }
        println!("{}", serde_json::to_string(&envelope)?);
    }

    let stats = match handle.execute(Command::GetStatistics)? {
        CommandOutcome::Statistics(stats) => stats,
        other => bail!("unexpected reply to GetStatistics: {:?}", other),
    };
    handle.shutdown()?;

    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    if events.lagged() > 0 {
        eprintln!("Skipped {} events (consumer lagged)", events.lagged());
    }
    Ok(ExitCode::from(0))
}

fn run_mine(
    config: AppConfig,
    difficulty: u64,
    mining: MiningConfig,
    factor: CalibrationFactor,
) -> Result<ExitCode> {
    let difficulty =
        Difficulty::new(difficulty).ok_or_else(|| anyhow!("difficulty must be at least 1"))?;
    let bus = EventBus::new(config.coordinator.event_capacity);
    let mut events = bus.subscribe();
    let engine = MiningEngine::new(config.mining, bus);

    engine.adjust_difficulty(difficulty)?;
    let run = engine.start(mining, factor)?;

    loop {
        let Some(envelope) = events.recv_timeout(Duration::from_millis(500)) else {
            if !engine.is_running() {
                bail!("run {} ended without a result", run.run_id());
            }
            continue;
        };
        match envelope.event {
            CoreEvent::MiningComplete(result) => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(ExitCode::from(if result.success { 0 } else { 2 }));
            }
            CoreEvent::Error { message, .. } => bail!("mining failed: {}", message),
            event => {
                tracing::debug!("{}", event.label());
            }
        }
    }
}

fn run_calibrate(config: AppConfig, frames: usize, output: Option<PathBuf>) -> Result<ExitCode> {
    let mut coordinator = FeedbackCoordinator::new(config);
    coordinator.connect(None)?;
    coordinator.start_acquisition()?;

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut received = 0;
    while received < frames {
        if Instant::now() > deadline {
            bail!("timed out after {} of {} frames", received, frames);
        }
        coordinator.tick();
        received = coordinator.statistics().frames_processed as usize;
        std::thread::sleep(Duration::from_millis(5));
    }

    let factor = coordinator.calibrate()?;
    let frames_used = coordinator.window_len();
    if let Some(path) = &output {
        coordinator
            .save_calibration(path)
            .with_context(|| format!("saving {}", path.display()))?;
    }
    coordinator.shutdown();

    let report = CalibrationReport {
        frames_used,
        factor: factor.value(),
        qualities: &coordinator.filter().state().last_qualities,
        saved_to: output.as_ref().map(|p| p.display().to_string()),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::from(0))
}

fn run_inspect(path: &PathBuf) -> Result<ExitCode> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let state: CalibrationState = serde_json::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;
    if let Err(reason) = state.validate() {
        eprintln!("Invalid calibration state: {reason}");
        return Ok(ExitCode::from(2));
    }
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(ExitCode::from(0))
}

#[derive(Serialize)]
struct CalibrationReport<'a> {
    frames_used: usize,
    factor: f64,
    qualities: &'a [f64],
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<String>,
}
