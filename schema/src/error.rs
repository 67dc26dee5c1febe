//! Agent error taxonomy

use std::fmt;
use thiserror::Error;

/// Shared `Result` alias for the agent.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Why the adapter gate refused to let a run proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The link-state probe could not be executed at all
    ProbeUnavailable,
    /// No BSSID reported by the adapter
    NotAssociated,
    /// No address, or a link-local (169.254.0.0/16) one
    NoValidIp,
    /// The external name used as health check did not resolve
    DnsFailing,
}

impl AbortReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbortReason::ProbeUnavailable => "probe unavailable",
            AbortReason::NotAssociated => "not associated",
            AbortReason::NoValidIp => "no valid IP",
            AbortReason::DnsFailing => "DNS failing",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    /// Remote sink unreachable, throttled, or returned a malformed acknowledgment
    #[error("transport failure during {operation}: {reason}")]
    Transport {
        operation: &'static str,
        reason: String,
    },

    /// An OS command failed or produced unparseable output
    #[error("probe unavailable ({probe}): {details}")]
    ProbeUnavailable {
        probe: &'static str,
        details: String,
    },

    #[error("link down: {0}")]
    LinkDown(AbortReason),

    /// A configured ping target failed syntax validation
    #[error("invalid ping target {target:?} in slot {slot}")]
    Validation { slot: usize, target: String },

    /// Local database open/write/delete failure
    #[error("storage failure during {context}: {details}")]
    Storage {
        context: &'static str,
        details: String,
    },
}

impl AgentError {
    pub fn transport(operation: &'static str, reason: impl Into<String>) -> Self {
        AgentError::Transport {
            operation,
            reason: reason.into(),
        }
    }

    pub fn probe(probe: &'static str, details: impl Into<String>) -> Self {
        AgentError::ProbeUnavailable {
            probe,
            details: details.into(),
        }
    }

    pub fn storage(context: &'static str, details: impl fmt::Display) -> Self {
        AgentError::Storage {
            context,
            details: details.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reason_messages() {
        assert_eq!(AbortReason::NotAssociated.to_string(), "not associated");
        assert_eq!(AbortReason::NoValidIp.to_string(), "no valid IP");
        assert_eq!(AbortReason::DnsFailing.to_string(), "DNS failing");
        assert_eq!(
            AgentError::LinkDown(AbortReason::ProbeUnavailable).to_string(),
            "link down: probe unavailable"
        );
    }
}
