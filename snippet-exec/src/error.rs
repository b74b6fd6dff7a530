use thiserror::Error;

/// Infrastructure faults raised while preparing or supervising a guest.
///
/// Nothing the guest program does is reported through this type; guest
/// problems always end up as a [`crate::Verdict::Failure`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to spawn interpreter: {0}")]
    Spawn(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
