use thiserror::Error;

#[derive(Debug, Error)]
pub enum TempoError {
    #[error("capture fault: {0}")]
    Capture(String),
    #[error("estimation failed: {0}")]
    Estimation(String),
    #[error("invalid manual tempo: {0}")]
    InvalidManualInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TempoError {
    pub fn capture<T: Into<String>>(message: T) -> Self {
        Self::Capture(message.into())
    }

    pub fn estimation<T: Into<String>>(message: T) -> Self {
        Self::Estimation(message.into())
    }

    pub fn invalid_manual_input<T: Into<String>>(message: T) -> Self {
        Self::InvalidManualInput(message.into())
    }

    pub fn config<T: Into<String>>(message: T) -> Self {
        Self::Config(message.into())
    }
}
