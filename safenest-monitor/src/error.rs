//! Crate-wide error type.
//!
//! Boundary-specific failures (sensor, timer, alert delivery, configuration,
//! preferences) have their own enums next to the code that raises them and
//! are handled where they occur. This type covers what crosses the session
//! and server boundaries: listener I/O and a session that is no longer
//! running.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("monitoring session has shut down")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
