//! RPC fault taxonomy.
//!
//! Every failure that crosses an invoker boundary is an [`RpcError`] with a
//! closed [`RpcErrorKind`]. Classification happens once, as close to the
//! origin as possible; only [`RpcErrorKind::Unknown`] may be upgraded to a
//! more specific kind afterwards.

use std::fmt;

/// Closed classification of RPC faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorKind {
    /// No adapter-specific rule matched. The only kind that may be upgraded.
    Unknown,
    /// The call did not complete within its deadline.
    Timeout,
    /// Connection establishment or transport failure.
    Network,
    /// Encoding or decoding of a message failed.
    Serialization,
    /// An executor refused the task (resource exhaustion).
    Rejection,
    /// No merger, merge function or handler exists for the request.
    Unsupported,
    /// The call was rejected by policy.
    Forbidden,
    /// Local setup/configuration failure (e.g. unreadable rule file). Fatal,
    /// never retried.
    Config,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcErrorKind::Unknown => "unknown",
            RpcErrorKind::Timeout => "timeout",
            RpcErrorKind::Network => "network",
            RpcErrorKind::Serialization => "serialization",
            RpcErrorKind::Rejection => "rejection",
            RpcErrorKind::Unsupported => "unsupported",
            RpcErrorKind::Forbidden => "forbidden",
            RpcErrorKind::Config => "config",
        };
        f.write_str(name)
    }
}

/// Structured RPC fault.
#[derive(Debug, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct RpcError {
    kind: RpcErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: RpcErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Unknown, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Timeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Network, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Serialization, message)
    }

    pub fn rejection(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Rejection, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Unsupported, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Config, message)
    }

    pub fn kind(&self) -> RpcErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Upgrade an unclassified fault. A specific kind is sticky: upgrading
    /// anything other than [`RpcErrorKind::Unknown`] is a no-op.
    pub fn upgraded(mut self, kind: RpcErrorKind) -> Self {
        if self.kind == RpcErrorKind::Unknown {
            self.kind = kind;
        }
        self
    }
}

/// Result alias for fallible RPC operations.
pub type Result<T, E = RpcError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_is_upgradable() {
        let err = RpcError::unknown("connection reset").upgraded(RpcErrorKind::Network);
        assert_eq!(err.kind(), RpcErrorKind::Network);
    }

    #[test]
    fn specific_kind_is_sticky() {
        let err = RpcError::timeout("deadline exceeded").upgraded(RpcErrorKind::Network);
        assert_eq!(err.kind(), RpcErrorKind::Timeout);
    }
}
