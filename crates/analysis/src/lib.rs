pub mod extractor;
pub mod scheduler;

pub use extractor::{make_analyzer, OnsetAutocorrelation, TempoAnalyzer};
pub use scheduler::{
    make_scheduler, worker_process_main, EstimationScheduler, WorkerProcessScheduler,
    WorkerThreadScheduler, DEFAULT_POLL_INTERVAL_MS, WORKER_MODE_ARG,
};
