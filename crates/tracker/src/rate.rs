use tracing::debug;

use pulseloop_domain::PlaybackCommand;

/// Maps an accepted tempo to a playback-speed command for the loop backend.
///
/// Emits only when the target actually changed; some backends stutter
/// visibly on redundant rate calls. Every emitted command also nudges the
/// position forward by `position_skip_ms * rate_ratio`: a bare rate change
/// plays back irregularly right after the switch, and the nudge works around
/// that. It is applied on every backend to keep behavior uniform.
pub struct RateMapper {
    reference_bpm: f32,
    position_skip_ms: f32,
    last_bpm: Option<f32>,
}

impl RateMapper {
    pub fn new(reference_bpm: f32, position_skip_ms: f32) -> Self {
        Self {
            reference_bpm,
            position_skip_ms,
            last_bpm: None,
        }
    }

    pub fn reference_bpm(&self) -> f32 {
        self.reference_bpm
    }

    pub fn map(&mut self, target_bpm: f32) -> Option<PlaybackCommand> {
        if self.last_bpm == Some(target_bpm) {
            return None;
        }
        self.last_bpm = Some(target_bpm);
        let rate_ratio = target_bpm / self.reference_bpm;
        debug!(target_bpm, rate_ratio, "playback rate updated");
        Some(PlaybackCommand {
            rate_ratio,
            seek_adjustment_ms: self.position_skip_ms * rate_ratio,
        })
    }
}
