use artisan_core::error::ErrorKind;

/// Why synthesis produced no usable script.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// The service could not be reached, timed out or answered non-2xx.
    #[error("Synthesis service unavailable: {0}")]
    Unavailable(String),

    /// The service answered, but not with a usable script.
    #[error("Invalid synthesis output: {0}")]
    InvalidOutput(String),
}

impl SynthesisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::SynthesisUnavailable,
            Self::InvalidOutput(_) => ErrorKind::InvalidSynthesisOutput,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
