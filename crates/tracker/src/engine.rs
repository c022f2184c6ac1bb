use tracing::{debug, info};

use pulseloop_domain::{
    AppConfig, PlaybackCommand, TempoError, TempoEstimate, TrackToken, DEFAULT_CONFIDENCE_FLOOR,
    OCTAVE_TOLERANCE, TEMPO_SANITY_CEILING,
};

use crate::rate::RateMapper;

/// Cap on fold doublings/halvings; any sane band is reached long before
/// this, and a degenerate band must not spin.
const MAX_FOLD_STEPS: u32 = 32;

/// Long-lived tempo state. Single-writer: mutated only by
/// [`TempoController`] accept/reject decisions.
#[derive(Clone, Debug)]
pub struct ControlState {
    pub current_bpm: f32,
    /// Manual override: while set, raw estimates are ignored entirely.
    pub manual_lock: bool,
    /// Octave-normalization band, when enabled.
    pub range_fold: Option<(f32, f32)>,
    /// Identity recorded at the last automatic acceptance.
    pub last_track: Option<TrackToken>,
    pub reference_loop_bpm: f32,
}

/// The tempo control engine: filters, folds, and stabilizes raw estimates
/// before they reach playback-rate selection.
pub struct TempoController {
    state: ControlState,
    mapper: RateMapper,
    confidence_floor: f32,
    sanity_ceiling: f32,
    octave_tolerance: f32,
}

impl TempoController {
    pub fn new(
        reference_loop_bpm: f32,
        position_skip_ms: f32,
        range_fold: Option<(f32, f32)>,
    ) -> Self {
        Self {
            state: ControlState {
                current_bpm: reference_loop_bpm,
                manual_lock: false,
                range_fold,
                last_track: None,
                reference_loop_bpm,
            },
            mapper: RateMapper::new(reference_loop_bpm, position_skip_ms),
            confidence_floor: DEFAULT_CONFIDENCE_FLOOR,
            sanity_ceiling: TEMPO_SANITY_CEILING,
            octave_tolerance: OCTAVE_TOLERANCE,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.reference_loop_bpm,
            config.position_skip_ms,
            config.fold_range(),
        )
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn locked(&self) -> bool {
        self.state.manual_lock
    }

    /// Toggled only by explicit user action.
    pub fn set_locked(&mut self, locked: bool) {
        self.state.manual_lock = locked;
        info!(locked, "manual lock toggled");
    }

    /// Runs a raw estimate through the acceptance pipeline: confidence gate,
    /// sanity gate, range fold, octave-flicker suppression, rounding,
    /// commit. Returns the playback command when the tempo changed.
    pub fn on_estimate(
        &mut self,
        estimate: TempoEstimate,
        track: Option<TrackToken>,
    ) -> Option<PlaybackCommand> {
        if self.state.manual_lock {
            debug!(bpm = estimate.bpm, "locked; estimate ignored");
            return None;
        }
        if estimate.algorithm.reports_confidence() && estimate.confidence <= self.confidence_floor {
            debug!(
                bpm = estimate.bpm,
                confidence = estimate.confidence,
                "estimate below confidence floor"
            );
            return None;
        }
        if estimate.bpm <= 0.0 || estimate.bpm >= self.sanity_ceiling {
            // Near-silence makes the extractor read far outside musical
            // range (~738 bpm observed).
            debug!(bpm = estimate.bpm, "estimate outside musical range");
            return None;
        }

        let bpm = match self.state.range_fold {
            Some((low, high)) => fold_into_range(estimate.bpm, low, high),
            None => {
                if self.is_octave_flicker(estimate.bpm, track.as_ref()) {
                    debug!(
                        current = self.state.current_bpm,
                        candidate = estimate.bpm,
                        "octave flicker suppressed"
                    );
                    return None;
                }
                estimate.bpm
            }
        };

        let bpm = bpm.round_ties_even();
        if bpm == self.state.current_bpm {
            return None;
        }
        self.state.current_bpm = bpm;
        self.state.last_track = track;
        info!(bpm, "tempo accepted");
        self.mapper.map(bpm)
    }

    /// Manual entry from free text. Manual intent is authoritative: no
    /// gating, no rounding, works even while locked.
    pub fn manual_entry(&mut self, input: &str) -> Result<Option<PlaybackCommand>, TempoError> {
        let bpm: f32 = input.trim().parse().map_err(|_| {
            TempoError::invalid_manual_input(format!("not a number: {input:?}"))
        })?;
        self.set_manual_bpm(bpm)
    }

    pub fn set_manual_bpm(&mut self, bpm: f32) -> Result<Option<PlaybackCommand>, TempoError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(TempoError::invalid_manual_input(format!(
                "tempo must be positive, got {bpm}"
            )));
        }
        let bpm = match self.state.range_fold {
            Some((low, high)) => fold_into_range(bpm, low, high),
            None => bpm,
        };
        if bpm == self.state.current_bpm {
            return Ok(None);
        }
        self.state.current_bpm = bpm;
        info!(bpm, manual = true, "tempo accepted");
        Ok(self.mapper.map(bpm))
    }

    /// Half/double readings are acoustically indistinguishable, so within
    /// one track a candidate near an octave partner of the current tempo is
    /// noise. A changed or unknown identity means a genuine tempo change is
    /// plausible and the candidate stands. Only consulted while folding is
    /// disabled; folding already pins the octave.
    fn is_octave_flicker(&self, candidate: f32, track: Option<&TrackToken>) -> bool {
        let same_track = match (track, self.state.last_track.as_ref()) {
            (Some(now), Some(last)) => now == last,
            _ => false,
        };
        if !same_track {
            return false;
        }
        let current = self.state.current_bpm;
        near(candidate, current * 2.0, self.octave_tolerance)
            || near(candidate, current / 2.0, self.octave_tolerance)
    }
}

fn near(value: f32, target: f32, relative_tolerance: f32) -> bool {
    (value - target).abs() <= target.abs() * relative_tolerance
}

/// Doubles below the band and halves above it until the value lands inside,
/// iteration-capped.
fn fold_into_range(bpm: f32, low: f32, high: f32) -> f32 {
    if low <= 0.0 || high < low {
        return bpm;
    }
    let mut folded = bpm;
    let mut steps = 0;
    while folded < low && steps < MAX_FOLD_STEPS {
        folded *= 2.0;
        steps += 1;
    }
    while folded > high && steps < MAX_FOLD_STEPS {
        folded /= 2.0;
        steps += 1;
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pulseloop_domain::Algorithm;

    fn accurate(bpm: f32, confidence: f32) -> TempoEstimate {
        TempoEstimate::new(bpm, confidence, Algorithm::Accurate).unwrap()
    }

    fn fast(bpm: f32) -> TempoEstimate {
        TempoEstimate::new(bpm, 0.0, Algorithm::Fast).unwrap()
    }

    fn token(raw: &str) -> Option<TrackToken> {
        Some(TrackToken::new(raw))
    }

    #[test]
    fn confidence_floor_is_exclusive() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        assert!(controller.on_estimate(accurate(100.0, 2.5), None).is_none());
        assert_eq!(controller.state().current_bpm, 60.0);
        let command = controller.on_estimate(accurate(100.0, 2.6), None).unwrap();
        assert_eq!(controller.state().current_bpm, 100.0);
        assert_relative_eq!(command.rate_ratio, 100.0 / 60.0);
    }

    #[test]
    fn fast_estimates_are_never_confidence_gated() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        assert!(controller.on_estimate(fast(100.0), None).is_some());
        assert_eq!(controller.state().current_bpm, 100.0);
    }

    #[test]
    fn silence_readings_are_rejected() {
        // The extractor reads around 738 bpm when nothing is playing.
        let mut controller = TempoController::new(60.0, 0.0, None);
        assert!(controller.on_estimate(fast(738.0), None).is_none());
        assert!(controller.on_estimate(fast(300.0), None).is_none());
        assert!(controller.on_estimate(fast(0.0), None).is_none());
        assert!(controller.on_estimate(fast(-10.0), None).is_none());
        assert_eq!(controller.state().current_bpm, 60.0);
        assert!(controller.on_estimate(fast(299.0), None).is_some());
    }

    #[test]
    fn folding_normalizes_octaves() {
        assert_eq!(fold_into_range(45.0, 60.0, 120.0), 90.0);
        assert_eq!(fold_into_range(200.0, 60.0, 120.0), 100.0);
        assert_eq!(fold_into_range(80.0, 60.0, 120.0), 80.0);
    }

    #[test]
    fn folding_terminates_on_a_degenerate_band() {
        // No power of two lands 50 inside [60, 70]; the cap stops the spin.
        let folded = fold_into_range(50.0, 60.0, 70.0);
        assert!(folded.is_finite());
    }

    #[test]
    fn folded_estimates_land_in_the_band() {
        let mut controller = TempoController::new(60.0, 0.0, Some((60.0, 120.0)));
        controller.on_estimate(fast(45.0), None).unwrap();
        assert_eq!(controller.state().current_bpm, 90.0);
        controller.on_estimate(fast(200.0), None).unwrap();
        assert_eq!(controller.state().current_bpm, 100.0);
    }

    #[test]
    fn octave_flicker_is_suppressed_within_a_track() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        controller.on_estimate(fast(100.0), token("track-a")).unwrap();
        assert_eq!(controller.state().current_bpm, 100.0);

        // 50.5 is within 3% of half the current tempo; same track, so noise.
        assert!(controller
            .on_estimate(fast(50.5), token("track-a"))
            .is_none());
        assert_eq!(controller.state().current_bpm, 100.0);
        assert!(controller
            .on_estimate(fast(201.0), token("track-a"))
            .is_none());
        assert_eq!(controller.state().current_bpm, 100.0);
    }

    #[test]
    fn a_new_track_accepts_the_octave_candidate() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        controller.on_estimate(fast(100.0), token("track-a")).unwrap();
        let command = controller.on_estimate(fast(50.5), token("track-b")).unwrap();
        assert_eq!(controller.state().current_bpm, 50.0);
        assert_relative_eq!(command.rate_ratio, 50.0 / 60.0);
    }

    #[test]
    fn unknown_identity_accepts_the_octave_candidate() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        controller.on_estimate(fast(100.0), token("track-a")).unwrap();
        assert!(controller.on_estimate(fast(50.5), None).is_some());
        assert_eq!(controller.state().current_bpm, 50.0);
    }

    #[test]
    fn suppression_is_bypassed_while_folding() {
        let mut controller = TempoController::new(60.0, 0.0, Some((40.0, 160.0)));
        controller.on_estimate(fast(100.0), token("track-a")).unwrap();
        // Same track and an exact half, but folding is enabled.
        assert!(controller
            .on_estimate(fast(50.0), token("track-a"))
            .is_some());
        assert_eq!(controller.state().current_bpm, 50.0);
    }

    #[test]
    fn non_octave_changes_pass_within_a_track() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        controller.on_estimate(fast(100.0), token("track-a")).unwrap();
        assert!(controller
            .on_estimate(fast(120.0), token("track-a"))
            .is_some());
        assert_eq!(controller.state().current_bpm, 120.0);
    }

    #[test]
    fn equal_candidate_is_a_no_op() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        assert!(controller.on_estimate(fast(90.0), None).is_some());
        assert!(controller.on_estimate(fast(90.0), None).is_none());
        assert!(controller.on_estimate(fast(90.4), None).is_none());
    }

    #[test]
    fn lock_ignores_estimates_until_released() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        controller.set_locked(true);
        assert!(controller.on_estimate(fast(140.0), None).is_none());
        assert_eq!(controller.state().current_bpm, 60.0);
        controller.set_locked(false);
        assert!(controller.on_estimate(fast(140.0), None).is_some());
        assert_eq!(controller.state().current_bpm, 140.0);
    }

    #[test]
    fn manual_entry_works_while_locked_and_is_not_rounded() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        controller.set_locked(true);
        let command = controller.manual_entry("72.5").unwrap().unwrap();
        assert_eq!(controller.state().current_bpm, 72.5);
        assert_relative_eq!(command.rate_ratio, 72.5 / 60.0);
    }

    #[test]
    fn manual_entry_is_folded_when_folding_is_enabled() {
        let mut controller = TempoController::new(60.0, 0.0, Some((60.0, 120.0)));
        controller.manual_entry("45").unwrap().unwrap();
        assert_eq!(controller.state().current_bpm, 90.0);
    }

    #[test]
    fn malformed_manual_entries_leave_state_unchanged() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        assert!(matches!(
            controller.manual_entry("not-a-bpm"),
            Err(TempoError::InvalidManualInput(_))
        ));
        assert!(matches!(
            controller.manual_entry("-3"),
            Err(TempoError::InvalidManualInput(_))
        ));
        assert!(matches!(
            controller.manual_entry("0"),
            Err(TempoError::InvalidManualInput(_))
        ));
        assert_eq!(controller.state().current_bpm, 60.0);
    }

    #[test]
    fn accepted_tempo_drives_the_playback_ratio() {
        let mut controller = TempoController::new(60.0, 0.0, None);
        let command = controller.on_estimate(fast(90.0), None).unwrap();
        assert_relative_eq!(command.rate_ratio, 1.5);
        let command = controller.set_manual_bpm(60.0).unwrap().unwrap();
        assert_relative_eq!(command.rate_ratio, 1.0);
        // Already at 60; nothing to re-emit.
        assert!(controller.on_estimate(fast(60.0), None).is_none());
    }

    #[test]
    fn stale_estimates_are_judged_like_any_other() {
        // Delivery order carries no meaning; a stale result is simply run
        // through the same gates.
        let mut controller = TempoController::new(60.0, 0.0, None);
        let older = fast(90.0);
        let newer = fast(120.0);
        assert!(controller.on_estimate(newer, None).is_some());
        assert!(controller.on_estimate(older, None).is_some());
        assert_eq!(controller.state().current_bpm, 90.0);
    }
}
