use std::process::Command;

use tracing::debug;

use pulseloop_domain::TrackToken;

/// Read-only view of "what is currently playing". An unavailable or failing
/// source is an unknown identity, never an error.
pub trait TrackIdentitySource {
    fn current(&self) -> Option<TrackToken>;
}

/// Always-unknown source for deployments without a media session to query.
pub struct NullIdentitySource;

impl TrackIdentitySource for NullIdentitySource {
    fn current(&self) -> Option<TrackToken> {
        None
    }
}

/// Queries the `playerctl` CLI for the active player's track identity.
pub struct PlayerctlIdentitySource;

impl TrackIdentitySource for PlayerctlIdentitySource {
    fn current(&self) -> Option<TrackToken> {
        let output = Command::new("playerctl")
            .args(["metadata", "--format", "{{playerName}}:{{mpris:trackid}}"])
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(status = %output.status, "identity source unavailable");
            return None;
        }
        let raw = String::from_utf8(output.stdout).ok()?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(TrackToken::new(trimmed))
        }
    }
}
