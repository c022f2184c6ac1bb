use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use pulseloop_analysis::{make_scheduler, worker_process_main, DEFAULT_POLL_INTERVAL_MS};
use pulseloop_audio::{CaptureConfig, CaptureStream, RollingAudioBuffer, DEFAULT_PULL_INTERVAL_MS};
use pulseloop_domain::{Algorithm, AppConfig, PlaybackCommand};
use pulseloop_tracker::{PlayerctlIdentitySource, TempoController, TrackIdentitySource};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Keep a looping visual locked to the ambient tempo",
    long_about = None
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Internal: run one estimation job against stdin audio. Spawned by the
    /// process-backed scheduler; not for interactive use.
    #[command(name = "bpm-worker", hide = true)]
    BpmWorker {
        algorithm: String,
        sample_rate: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(Mode::BpmWorker {
        algorithm,
        sample_rate,
    }) = cli.mode
    {
        // Child side of the process scheduler. No logging init here so
        // stdout stays clean for the JSON result.
        return worker_process_main(algorithm.parse::<Algorithm>()?, sample_rate);
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = load_config(cli.config.as_deref());
    run(config)
}

fn load_config(path: Option<&Path>) -> AppConfig {
    let Some(path) = path else {
        return AppConfig::default();
    };
    match AppConfig::load(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(%err, ?path, "config unreadable; using defaults");
            AppConfig::default()
        }
    }
}

fn run(config: AppConfig) -> Result<()> {
    info!(
        algorithm = ?config.algorithm,
        separate_process = config.use_separate_process,
        reference_loop_bpm = config.reference_loop_bpm,
        "starting pulseloop"
    );
    if config.preview_enabled {
        debug!(
            screen_index = config.screen_index,
            "preview is rendered by the playback frontend"
        );
    }

    let mut capture = CaptureStream::open(&CaptureConfig {
        preferred_source: config.default_audio_source.clone(),
        ..CaptureConfig::default()
    })?;
    let mut rolling = RollingAudioBuffer::default();
    let scheduler = make_scheduler(
        config.algorithm,
        capture.sample_rate(),
        config.use_separate_process,
    )?;
    let identity = PlayerctlIdentitySource;
    let mut controller = TempoController::from_config(&config);
    let commands = stdin_commands();

    let pull_interval = Duration::from_millis(DEFAULT_PULL_INTERVAL_MS);
    let poll_interval = Duration::from_millis(DEFAULT_POLL_INTERVAL_MS);
    let mut next_pull = Instant::now();

    loop {
        if Instant::now() >= next_pull {
            if let Some(window) = capture.drain_into(&mut rolling) {
                debug!(bytes = window.len(), "window submitted for estimation");
                scheduler.submit(window);
            }
            next_pull += pull_interval;
        }

        if let Some(estimate) = scheduler.poll() {
            let track = identity.current();
            if let Some(command) = controller.on_estimate(estimate, track) {
                apply(&command);
            }
        }

        while let Ok(line) = commands.try_recv() {
            handle_command(&mut controller, line.trim());
        }

        thread::sleep(poll_interval);
    }
}

/// Stand-ins for the GUI's spinbox and lock checkbox: one command per stdin
/// line — a bpm number, `lock`, or `unlock`.
fn handle_command(controller: &mut TempoController, line: &str) {
    match line {
        "" => {}
        "lock" => controller.set_locked(true),
        "unlock" => controller.set_locked(false),
        entry => match controller.manual_entry(entry) {
            Ok(Some(command)) => apply(&command),
            Ok(None) => {}
            Err(err) => warn!(%err, "manual entry rejected"),
        },
    }
}

/// Playback collaborator seam: the loop frontend consumes these lines.
fn apply(command: &PlaybackCommand) {
    info!(
        rate_ratio = command.rate_ratio,
        seek_adjustment_ms = command.seek_adjustment_ms,
        "playback command"
    );
    println!(
        "rate={:.3} seek+={:.1}ms",
        command.rate_ratio, command.seek_adjustment_ms
    );
}

fn stdin_commands() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new().name("stdin".into()).spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    if let Err(err) = spawned {
        warn!(%err, "stdin command thread unavailable");
    }
    rx
}
