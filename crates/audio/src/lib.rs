pub mod capture;
pub mod rolling;

pub use capture::{CaptureConfig, CapturePipe, CaptureStream, DEFAULT_PULL_INTERVAL_MS};
pub use rolling::{AudioWindow, RollingAudioBuffer, DEFAULT_WINDOW_BYTES};
