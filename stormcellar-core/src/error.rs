use thiserror::Error;

/// Failures of a single poll/resolve/publish cycle, plus the fatal startup case.
///
/// Everything except [`Error::Configuration`] is recoverable: the scheduler logs it
/// and the next hourly tick proceeds as usual.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure, non-success status or undecodable body from the provider.
    #[error("Failed to fetch forecast: {0}")]
    Fetch(String),

    /// Neither the hourly blocks nor the current block carried a usable condition.
    #[error("No weather data available in forecast")]
    NoDataAvailable,

    /// The broker rejected the message or the client could not queue it.
    #[error("Failed to publish condition: {0}")]
    Publish(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// Wrap an `anyhow` chain as a fetch failure, keeping every context layer.
    pub(crate) fn fetch(err: anyhow::Error) -> Self {
        Error::Fetch(format!("{err:#}"))
    }

    /// Whether the process should give up rather than wait for the next cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
