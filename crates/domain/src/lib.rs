pub mod command;
pub mod config;
pub mod error;
pub mod tempo;

pub use crate::command::{PlaybackCommand, TrackToken};
pub use crate::config::AppConfig;
pub use crate::error::TempoError;
pub use crate::tempo::{
    epoch_millis, Algorithm, TempoEstimate, DEFAULT_CONFIDENCE_FLOOR, DEFAULT_MAX_TEMPO,
    DEFAULT_MIN_TEMPO, OCTAVE_TOLERANCE, TEMPO_SANITY_CEILING,
};
