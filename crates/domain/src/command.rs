use serde::{Deserialize, Serialize};

/// Opaque identity of whatever the media session reports as currently
/// playing. Only compared for equality; the contents carry no meaning here.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackToken(String);

impl TrackToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Instruction for the playback collaborator, derived from the accepted
/// tempo. Recomputed whenever the tempo changes; never stored.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlaybackCommand {
    /// Playback speed relative to the loop's natural rate.
    pub rate_ratio: f32,
    /// Nudge past the current position, applied at the moment the rate
    /// changes.
    pub seek_adjustment_ms: f32,
}
