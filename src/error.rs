use std::fmt;

use thiserror::Error;

/// Which ingress stream a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Inertial,
    Scan,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Inertial => write!(f, "inertial"),
            Stream::Scan => write!(f, "scan"),
        }
    }
}

/// Deskew pipeline error types
#[derive(Error, Debug)]
pub enum DeskewError {
    /// A group without inertial data (or without a scan) reached a consumer
    /// that requires one. The synchronizer is supposed to make this impossible.
    #[error("precursor violated: {0}")]
    Precursor(String),

    #[error("{stream} loop back: {current:.6} < {previous:.6}")]
    LoopBack {
        stream: Stream,
        previous: f64,
        current: f64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel error: {0}")]
    Channel(String),
}

impl DeskewError {
    pub fn precursor(reason: impl Into<String>) -> Self {
        Self::Precursor(reason.into())
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, DeskewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_back_message_names_stream() {
        let err = DeskewError::LoopBack { stream: Stream::Inertial, previous: 2.0, current: 1.5 };
        let msg = err.to_string();
        assert!(msg.contains("inertial loop back"));
        assert!(msg.contains("1.500000"));
    }

    #[test]
    fn test_precursor_message() {
        let err = DeskewError::precursor("empty inertial sequence");
        assert!(err.to_string().contains("empty inertial sequence"));
    }
}
