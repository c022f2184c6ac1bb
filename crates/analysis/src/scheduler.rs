use std::io::{Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use anyhow::{bail, Context, Result};
use tracing::debug;

use pulseloop_audio::AudioWindow;
use pulseloop_domain::{Algorithm, TempoEstimate};

use crate::extractor::{make_analyzer, TempoAnalyzer};

/// How often `poll` is expected to be called when the process-backed variant
/// is in use; completed results simply wait in the slot between ticks.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Hidden subcommand the worker process is started with.
pub const WORKER_MODE_ARG: &str = "bpm-worker";

/// Runs estimation off the capture path. Exactly one job executes at a
/// time; a submitted window that has not started yet is replaced by any
/// newer one, since only the freshest window reflects "now".
pub trait EstimationScheduler: Send {
    /// Fire-and-forget. Never blocks on a running job.
    fn submit(&self, window: AudioWindow);
    /// Latest completed estimate, if one arrived since the last call.
    /// Never blocks.
    fn poll(&self) -> Option<TempoEstimate>;
}

/// Deployment-time choice between the two execution strategies; the
/// consumer of estimates cannot tell them apart.
pub fn make_scheduler(
    algorithm: Algorithm,
    sample_rate: u32,
    use_separate_process: bool,
) -> Result<Box<dyn EstimationScheduler>> {
    if use_separate_process {
        Ok(Box::new(WorkerProcessScheduler::spawn(algorithm, sample_rate)?))
    } else {
        Ok(Box::new(WorkerThreadScheduler::spawn(make_analyzer(
            algorithm,
            sample_rate,
        ))?))
    }
}

struct SharedSlots {
    /// Depth-1 queue of not-yet-started work; a newer window overwrites.
    pending: Mutex<Option<AudioWindow>>,
    wake: Condvar,
    /// Most recently completed result, replaced on each completion.
    result: Mutex<Option<TempoEstimate>>,
    shutdown: AtomicBool,
}

impl SharedSlots {
    fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            wake: Condvar::new(),
            result: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    fn submit(&self, window: AudioWindow) {
        lock(&self.pending).replace(window);
        self.wake.notify_one();
    }

    fn poll(&self) -> Option<TempoEstimate> {
        lock(&self.result).take()
    }

    /// Blocks until a window is pending or shutdown is requested.
    fn next_window(&self) -> Option<AudioWindow> {
        let mut pending = lock(&self.pending);
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(window) = pending.take() {
                return Some(window);
            }
            pending = self
                .wake
                .wait(pending)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn store(&self, estimate: TempoEstimate) {
        lock(&self.result).replace(estimate);
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake.notify_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Estimation on a dedicated worker thread within this process.
pub struct WorkerThreadScheduler {
    slots: Arc<SharedSlots>,
    worker: Option<thread::JoinHandle<()>>,
}

impl WorkerThreadScheduler {
    pub fn spawn(analyzer: Box<dyn TempoAnalyzer>) -> Result<Self> {
        let slots = Arc::new(SharedSlots::new());
        let worker_slots = Arc::clone(&slots);
        let worker = thread::Builder::new()
            .name("bpm-worker".into())
            .spawn(move || {
                while let Some(window) = worker_slots.next_window() {
                    match analyzer.analyze(&window) {
                        Ok(estimate) => worker_slots.store(estimate),
                        // No estimate this cycle; the next window retries.
                        Err(err) => debug!(%err, "estimation skipped"),
                    }
                }
            })
            .context("spawn bpm worker thread")?;
        Ok(Self {
            slots,
            worker: Some(worker),
        })
    }
}

impl EstimationScheduler for WorkerThreadScheduler {
    fn submit(&self, window: AudioWindow) {
        self.slots.submit(window);
    }

    fn poll(&self) -> Option<TempoEstimate> {
        self.slots.poll()
    }
}

impl Drop for WorkerThreadScheduler {
    fn drop(&mut self) {
        self.slots.request_shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Estimation in a separate OS process, one child per job. A supervisor
/// thread owns all the blocking I/O with the child so `submit` and `poll`
/// stay non-blocking for the caller.
pub struct WorkerProcessScheduler {
    slots: Arc<SharedSlots>,
    supervisor: Option<thread::JoinHandle<()>>,
}

impl WorkerProcessScheduler {
    pub fn spawn(algorithm: Algorithm, sample_rate: u32) -> Result<Self> {
        let exe = std::env::current_exe().context("locate worker executable")?;
        let slots = Arc::new(SharedSlots::new());
        let supervisor_slots = Arc::clone(&slots);
        let supervisor = thread::Builder::new()
            .name("bpm-supervisor".into())
            .spawn(move || {
                while let Some(window) = supervisor_slots.next_window() {
                    match run_worker_once(&exe, algorithm, sample_rate, &window) {
                        Ok(estimate) => supervisor_slots.store(estimate),
                        Err(err) => debug!(%err, "worker process estimation skipped"),
                    }
                }
            })
            .context("spawn bpm supervisor thread")?;
        Ok(Self {
            slots,
            supervisor: Some(supervisor),
        })
    }
}

impl EstimationScheduler for WorkerProcessScheduler {
    fn submit(&self, window: AudioWindow) {
        self.slots.submit(window);
    }

    fn poll(&self) -> Option<TempoEstimate> {
        self.slots.poll()
    }
}

impl Drop for WorkerProcessScheduler {
    fn drop(&mut self) {
        self.slots.request_shutdown();
        if let Some(supervisor) = self.supervisor.take() {
            let _ = supervisor.join();
        }
    }
}

fn run_worker_once(
    exe: &Path,
    algorithm: Algorithm,
    sample_rate: u32,
    window: &AudioWindow,
) -> Result<TempoEstimate> {
    let mut child = Command::new(exe)
        .arg(WORKER_MODE_ARG)
        .arg(algorithm.as_str())
        .arg(sample_rate.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .context("spawn bpm worker process")?;
    {
        let mut stdin = child.stdin.take().context("worker stdin missing")?;
        stdin
            .write_all(window.bytes())
            .context("write window to worker")?;
        // Dropping stdin closes the pipe; the worker reads to EOF.
    }
    let output = child.wait_with_output().context("wait for worker")?;
    if !output.status.success() {
        bail!("worker exited with {}", output.status);
    }
    serde_json::from_slice(&output.stdout).context("parse worker output")
}

/// Child side of the process-backed scheduler: reads one window of raw bytes
/// from stdin, writes one JSON estimate to stdout. Wired into the binary's
/// hidden worker mode so `current_exe` re-entry works.
pub fn worker_process_main(algorithm: Algorithm, sample_rate: u32) -> Result<()> {
    let mut bytes = Vec::new();
    std::io::stdin()
        .lock()
        .read_to_end(&mut bytes)
        .context("read window from stdin")?;
    let analyzer = make_analyzer(algorithm, sample_rate);
    let estimate = analyzer.analyze(&AudioWindow::from_bytes(bytes))?;
    println!("{}", serde_json::to_string(&estimate)?);
    Ok(())
}
