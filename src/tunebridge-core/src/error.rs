use thiserror::Error;

/// Failure categories surfaced by every bridge operation.
///
/// Nothing in the bridge retries: each variant is reported to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The backend channel itself could not be started or talked to.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The host understood the request but reported a failure.
    #[error("host error: {message}")]
    Host { message: String },
    /// A protocol line or property value did not have the expected shape.
    #[error("decode error: {message}")]
    Decode { message: String },
    #[error("not found: {entity}")]
    NotFound { entity: String },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("operation not supported: {operation}")]
    Unsupported { operation: String },
    /// The handle has started (or finished) closing and accepts no new work.
    #[error("{label} is closed")]
    Closed { label: String },
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn host(message: impl Into<String>) -> Self {
        Self::Host {
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_error_keeps_message_verbatim() {
        let err = BridgeError::host("execution error: no such track (-1728)");
        assert_eq!(
            err.to_string(),
            "host error: execution error: no such track (-1728)"
        );
    }

    #[test]
    fn not_found_is_detectable() {
        assert!(BridgeError::not_found("track 1A").is_not_found());
        assert!(!BridgeError::decode("bad").is_not_found());
    }
}
