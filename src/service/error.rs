use std::io::{self, ErrorKind};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("accept error: {0}")]
    Accept(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid consume: requested {requested} bytes but only {buffered} buffered")]
    InvalidConsume { requested: usize, buffered: usize },

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),
}

impl AppError {
    /// Whether this error is a disconnect the peer or a local shutdown caused.
    /// Such errors drive a session toward `Closing` but are never surfaced as
    /// failures to the application.
    pub fn is_benign_disconnect(&self) -> bool {
        match self {
            AppError::Io(e) => is_benign_disconnect(e),
            _ => false,
        }
    }
}

/// Disconnect-class socket errors that are expected during normal peer
/// churn or shutdown. Everything else is a fatal local error.
pub fn is_benign_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_class_errors_are_benign() {
        let reset = io::Error::new(ErrorKind::ConnectionReset, "reset");
        assert!(is_benign_disconnect(&reset));
        assert!(AppError::from(reset).is_benign_disconnect());

        let denied = io::Error::new(ErrorKind::PermissionDenied, "denied");
        assert!(!is_benign_disconnect(&denied));
    }

    #[test]
    fn non_io_errors_are_never_benign() {
        assert!(!AppError::MalformedFrame("bad".into()).is_benign_disconnect());
        assert!(!AppError::InvalidConsume {
            requested: 10,
            buffered: 4
        }
        .is_benign_disconnect());
    }
}
