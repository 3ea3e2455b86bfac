use std::fmt;
use thiserror::Error;

/// Failure reported by a host-bridge collaborator call.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Which half of a restart failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPhase {
    Stopping,
    Starting,
}

impl fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPhase::Stopping => f.write_str("stopping"),
            RestartPhase::Starting => f.write_str("starting"),
        }
    }
}

/// Why no control-API endpoint could be derived from the active profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointIssue {
    /// No active profile, or its content could not be read.
    NoActiveProfile(String),
    /// The profile was inspected and has no `experimental.clash_api.external_controller`.
    Absent,
    /// The field exists but is not a usable `host:port`, or the document is not JSON.
    Malformed(String),
}

impl fmt::Display for EndpointIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointIssue::NoActiveProfile(cause) => write!(f, "no active profile ({cause})"),
            EndpointIssue::Absent => f.write_str(
                "active profile has no experimental.clash_api.external_controller",
            ),
            EndpointIssue::Malformed(cause) => write!(f, "malformed controller address: {cause}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{op} failed: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: BridgeError,
    },

    #[error("control API error: {0}")]
    Upstream(String),

    #[error("no control endpoint configured: {0}")]
    NoEndpoint(EndpointIssue),

    #[error("restart failed while {phase}: {source}")]
    Restart {
        phase: RestartPhase,
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    pub fn transport(op: &'static str) -> impl FnOnce(BridgeError) -> CoreError {
        move |source| CoreError::Transport { op, source }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
