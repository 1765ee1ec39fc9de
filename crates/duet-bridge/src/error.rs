//! Error types for the bridge crate.

use std::fmt;

use thiserror::Error;

/// Coarse classification of a [`BridgeError`], stable for diagnostics and
/// exit-status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A module failed binary validation
    InvalidModule,
    /// Guest imports could not be satisfied by the provider
    Link,
    /// A stdio channel could not be created, written, read or released
    Channel,
    /// The sandbox trapped or exited with a non-zero status
    SandboxFault,
    /// The guest returned normally but reported an error on stderr
    Application,
    /// The execution deadline expired
    Timeout,
    /// Engine or store configuration failed
    Engine,
    /// Configuration could not be loaded
    Config,
    /// Host I/O outside the channels (reading module files)
    Io,
}

impl ErrorKind {
    /// Stable snake_case name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidModule => "invalid_module",
            ErrorKind::Link => "link_error",
            ErrorKind::Channel => "channel_error",
            ErrorKind::SandboxFault => "sandbox_fault",
            ErrorKind::Application => "application_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Engine => "engine_error",
            ErrorKind::Config => "config_error",
            ErrorKind::Io => "io_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Module bytes failed validation or compilation
    #[error("invalid module '{name}': {reason}")]
    InvalidModule {
        /// Module name
        name: String,
        /// Validator message
        reason: String,
    },

    /// Guest imports do not match the provider
    #[error("link error: {0}")]
    LinkError(String),

    /// Channel creation, write, read or release failed
    #[error("channel error: {context}: {source}")]
    ChannelError {
        /// What the bridge was doing
        context: String,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The sandbox trapped or exited with a non-zero status
    #[error("sandbox fault: {}", fault_text(.message, .detail))]
    SandboxFault {
        /// Trimmed contents of the error channel, if the guest wrote any
        message: Option<String>,
        /// Trap description or exit status
        detail: String,
    },

    /// The guest completed normally but wrote to its error channel
    #[error("application error: {0}")]
    ApplicationError(String),

    /// Execution exceeded the configured deadline
    #[error("execution timed out after {0} ms")]
    Timeout(u64),

    /// Engine or store setup error
    #[error("engine error: {0}")]
    Engine(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Taxonomy tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidModule { .. } => ErrorKind::InvalidModule,
            BridgeError::LinkError(_) => ErrorKind::Link,
            BridgeError::ChannelError { .. } => ErrorKind::Channel,
            BridgeError::SandboxFault { .. } => ErrorKind::SandboxFault,
            BridgeError::ApplicationError(_) => ErrorKind::Application,
            BridgeError::Timeout(_) => ErrorKind::Timeout,
            BridgeError::Engine(_) => ErrorKind::Engine,
            BridgeError::Config(_) => ErrorKind::Config,
            BridgeError::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn channel(context: impl Into<String>, source: std::io::Error) -> Self {
        BridgeError::ChannelError {
            context: context.into(),
            source,
        }
    }
}

fn fault_text<'a>(message: &'a Option<String>, detail: &'a str) -> &'a str {
    message.as_deref().unwrap_or(detail)
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display_prefers_message() {
        let err = BridgeError::SandboxFault {
            message: Some("ReferenceError: x is not defined".to_string()),
            detail: "wasm trap: unreachable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "sandbox fault: ReferenceError: x is not defined"
        );

        let err = BridgeError::SandboxFault {
            message: None,
            detail: "exit status 3".to_string(),
        };
        assert_eq!(err.to_string(), "sandbox fault: exit status 3");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::Link.as_str(), "link_error");
        assert_eq!(
            BridgeError::ApplicationError("boom".into()).kind(),
            ErrorKind::Application
        );
        assert_eq!(BridgeError::Timeout(10).kind().to_string(), "timeout");
    }
}
