pub mod engine;
pub mod identity;
pub mod rate;

pub use engine::{ControlState, TempoController};
pub use identity::{NullIdentitySource, PlayerctlIdentitySource, TrackIdentitySource};
pub use rate::RateMapper;
