use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Step of a round's exchange with the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Greeting,
    Write,
    Response,
}

impl Stage {
    /// Wrap an I/O failure that happened during this step.
    pub fn failure(self, addr: String, source: io::Error) -> Error {
        match self {
            Stage::Connect => Error::Connect { addr, source },
            stage => Error::Io {
                addr,
                stage,
                source,
            },
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Connect => "connect",
            Stage::Greeting => "greeting read",
            Stage::Write => "write",
            Stage::Response => "response read",
        })
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("buffer is {actual} bytes, message width is {expected}")]
    Length { expected: usize, actual: usize },

    #[error("resume index {index} is past the end of the {width}-byte space")]
    ResumePastEnd { index: u128, width: usize },

    #[error("width must be at least one byte ({what})")]
    InvalidWidth { what: &'static str },

    #[error("message width {message} != register width {register} + memory width {memory}")]
    WidthMismatch {
        message: usize,
        register: usize,
        memory: usize,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("{stage} on {addr} timed out after {after:?}")]
    Timeout {
        addr: String,
        stage: Stage,
        after: Duration,
    },

    #[error("{stage} on {addr} failed: {source}")]
    Io {
        addr: String,
        stage: Stage,
        #[source]
        source: io::Error,
    },

    #[error("giving up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to save winning sample: {0}")]
    Sample(String),
}

impl Error {
    /// Transport failures that say nothing about the submitted buffer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::Timeout { .. } | Error::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        let refused = Error::Connect {
            addr: "127.0.0.1:1".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let timeout = Error::Timeout {
            addr: "127.0.0.1:1".into(),
            stage: Stage::Greeting,
            after: Duration::from_millis(10),
        };
        assert!(refused.is_retryable());
        assert!(timeout.is_retryable());
    }

    #[test]
    fn stage_picks_the_error_variant() {
        let refused = Stage::Connect.failure(
            "127.0.0.1:1".into(),
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert!(matches!(refused, Error::Connect { .. }));

        for stage in [Stage::Greeting, Stage::Write, Stage::Response] {
            let err = stage.failure(
                "127.0.0.1:1".into(),
                io::Error::from(io::ErrorKind::ConnectionReset),
            );
            assert!(matches!(err, Error::Io { stage: s, .. } if s == stage));
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn stage_names_show_up_in_messages() {
        let err = Error::Timeout {
            addr: "localhost:8000".into(),
            stage: Stage::Response,
            after: Duration::from_secs(1),
        };
        assert_eq!(
            err.to_string(),
            "response read on localhost:8000 timed out after 1s"
        );
    }

    #[test]
    fn protocol_errors_are_not_retryable() {
        let length = Error::Length {
            expected: 10,
            actual: 9,
        };
        assert!(!length.is_retryable());

        let exhausted = Error::RetriesExhausted {
            attempts: 3,
            source: Box::new(Error::Connect {
                addr: "127.0.0.1:1".into(),
                source: io::Error::from(io::ErrorKind::ConnectionReset),
            }),
        };
        assert!(!exhausted.is_retryable());
    }
}
