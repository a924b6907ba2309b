use std::fmt;

/// Main error type for the ringcom coordination layer
#[derive(Debug)]
pub enum ComError {
    /// Configuration or CLI argument errors
    Config(String),

    /// A destination or source name absent from the name table
    UnknownPeer(String),

    /// Protocol misuse (e.g. releasing a critical section that is not held)
    Protocol(String),

    /// Publish/subscribe transport errors
    Transport(String),

    /// Operation attempted on a coordinator that has been stopped
    Stopped(String),

    /// Payload serialization/deserialization errors
    Serialization(serde_json::Error),

    /// System I/O errors
    Io(std::io::Error),
}

impl fmt::Display for ComError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ComError::UnknownPeer(name) => write!(f, "Unknown peer: {}", name),
            ComError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            ComError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ComError::Stopped(name) => write!(f, "Coordinator {} is stopped", name),
            ComError::Serialization(err) => write!(f, "Serialization error: {}", err),
            ComError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for ComError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ComError::Io(err) => Some(err),
            ComError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, ComError>;

impl ComError {
    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            ComError::Config(_) => "configuration_error",
            ComError::UnknownPeer(_) => "unknown_peer",
            ComError::Protocol(_) => "protocol_error",
            ComError::Transport(_) => "transport_error",
            ComError::Stopped(_) => "stopped",
            ComError::Serialization(_) => "serialization_error",
            ComError::Io(_) => "io_error",
        }
    }

    /// Errors that leave the coordinator usable: the call had no effect
    /// and the caller may simply carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ComError::UnknownPeer(_) | ComError::Protocol(_) | ComError::Serialization(_)
        )
    }
}

// Conversions from common error types
impl From<std::io::Error> for ComError {
    fn from(err: std::io::Error) -> Self {
        ComError::Io(err)
    }
}

impl From<serde_json::Error> for ComError {
    fn from(err: serde_json::Error) -> Self {
        ComError::Serialization(err)
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::ComError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ComError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! peer_error {
    ($name:expr) => {
        $crate::error::ComError::UnknownPeer($name.to_string())
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr) => {
        $crate::error::ComError::Protocol($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ComError::Protocol(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! transport_error {
    ($msg:expr) => {
        $crate::error::ComError::Transport($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::ComError::Transport(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let config_err = ComError::Config("process count must be positive".to_string());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: process count must be positive"
        );

        let peer_err = ComError::UnknownPeer("P9".to_string());
        assert_eq!(peer_err.to_string(), "Unknown peer: P9");

        let io_err = ComError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ));
        assert!(io_err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let com_err: ComError = io_err.into();

        assert!(matches!(com_err, ComError::Io(_)));
        assert_eq!(com_err.error_type(), "io_error");
    }

    #[test]
    fn test_recoverable() {
        assert!(ComError::UnknownPeer("P4".into()).is_recoverable());
        assert!(!ComError::Stopped("P0".into()).is_recoverable());
        assert!(!ComError::Transport("closed".into()).is_recoverable());
    }

    #[test]
    fn test_macros() {
        let err = config_error!("Process count {} is invalid", 0);
        assert_eq!(err.to_string(), "Configuration error: Process count 0 is invalid");

        let err = peer_error!("P7");
        assert!(matches!(err, ComError::UnknownPeer(ref name) if name == "P7"));
        assert_eq!(err.to_string(), "Unknown peer: P7");

        let err = protocol_error!("critical section not held");
        assert_eq!(err.to_string(), "Protocol error: critical section not held");

        let err = transport_error!("bus is shut down");
        assert_eq!(err.to_string(), "Transport error: bus is shut down");
    }
}
