use thiserror::Error;

#[derive(Error, Debug)]
pub enum TripwireError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No Tokio runtime available: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, TripwireError>;
