use crate::permissions::PermissionScope;
use crate::types::ConnectionState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangingError {
    #[error("Permission denied: {0}")]
    PermissionDenied(PermissionScope),

    #[error("Bluetooth radio is disabled")]
    RadioDisabled,

    #[error("Host does not support BLE channel sounding")]
    ChannelSoundingUnavailable,

    #[error("Invalid Bluetooth address: {0}")]
    InvalidAddress(String),

    #[error("Scan timed out")]
    ScanTimeout,

    #[error("Scan failed with code {0}")]
    ScanFailure(i32),

    #[error("Connection failed: {0}")]
    ConnectFailure(String),

    #[error("Service discovery failed: {0}")]
    ServiceDiscoveryFailure(String),

    #[error("Ranging service or control point not found")]
    ServiceNotFound,

    #[error("Link lost")]
    LinkLost,

    #[error("Pairing trigger write failed: {0}")]
    WriteFailure(String),

    #[error("Ranging unsupported: {0}")]
    RangingUnsupported(String),

    #[error("Ranging session creation failed: {0}")]
    SessionCreateFailure(String),

    #[error("Ranging session open failed: {0}")]
    SessionOpenFailure(String),

    #[error("Ranging session closed unexpectedly: {0}")]
    SessionClosedUnexpectedly(i32),

    #[error("No target peripheral")]
    NoTarget,

    #[error("Platform error: {0}")]
    Platform(String),
}

pub type Result<T> = std::result::Result<T, RangingError>;

/// Failure reason carried by [`ConnectionState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    PermissionDenied,
    RadioDisabled,
    ChannelSoundingUnavailable,
    InvalidAddress,
    ScanTimeout,
    ScanFailure,
    ConnectFailure,
    ServiceDiscoveryFailure,
    ServiceNotFound,
    LinkLost,
    WriteFailure,
    RangingUnsupported,
    SessionCreateFailure,
    SessionOpenFailure,
    SessionClosedUnexpectedly,
    NoTarget,
    Platform,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::PermissionDenied => write!(f, "permission denied"),
            FailureKind::RadioDisabled => write!(f, "radio disabled"),
            FailureKind::ChannelSoundingUnavailable => write!(f, "channel sounding unavailable"),
            FailureKind::InvalidAddress => write!(f, "invalid address"),
            FailureKind::ScanTimeout => write!(f, "scan timeout"),
            FailureKind::ScanFailure => write!(f, "scan failure"),
            FailureKind::ConnectFailure => write!(f, "connect failure"),
            FailureKind::ServiceDiscoveryFailure => write!(f, "service discovery failure"),
            FailureKind::ServiceNotFound => write!(f, "service not found"),
            FailureKind::LinkLost => write!(f, "link lost"),
            FailureKind::WriteFailure => write!(f, "write failure"),
            FailureKind::RangingUnsupported => write!(f, "ranging unsupported"),
            FailureKind::SessionCreateFailure => write!(f, "session create failure"),
            FailureKind::SessionOpenFailure => write!(f, "session open failure"),
            FailureKind::SessionClosedUnexpectedly => write!(f, "session closed"),
            FailureKind::NoTarget => write!(f, "no target"),
            FailureKind::Platform => write!(f, "platform error"),
        }
    }
}

/// Context for error logging
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub peripheral: Option<String>,
    pub state: Option<ConnectionState>,
    pub operation: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peripheral(mut self, peripheral: String) -> Self {
        self.peripheral = Some(peripheral);
        self
    }

    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

impl RangingError {
    /// Log error with structured context
    pub fn log_with_context(&self, context: &ErrorContext) {
        error!(
            error = %self,
            kind = %self.kind(),
            peripheral = ?context.peripheral,
            state = ?context.state,
            operation = ?context.operation,
            timestamp = %chrono::Utc::now(),
            "Ranging workflow error occurred"
        );
    }

    /// Status line shown to the user. Every error maps to exactly one message.
    pub fn user_message(&self) -> String {
        match self {
            RangingError::PermissionDenied(scope) => format!("Missing {} permission", scope),
            RangingError::RadioDisabled => "Bluetooth is disabled".to_string(),
            RangingError::ChannelSoundingUnavailable => {
                "Channel Sounding not supported on this device".to_string()
            }
            RangingError::InvalidAddress(_) => "Invalid Bluetooth address".to_string(),
            RangingError::ScanTimeout => "Scan timeout".to_string(),
            RangingError::ScanFailure(code) => format!("Scan failed: {}", code),
            RangingError::ConnectFailure(details) => format!("Connection failed: {}", details),
            RangingError::ServiceDiscoveryFailure(details) => {
                format!("Service discovery failed: {}", details)
            }
            RangingError::ServiceNotFound => "RAS Control Point not found".to_string(),
            RangingError::LinkLost => "GATT disconnected".to_string(),
            RangingError::WriteFailure(details) => {
                format!("Pairing trigger failed: {}", details)
            }
            RangingError::RangingUnsupported(details) => details.clone(),
            RangingError::SessionCreateFailure(_) => "Ranging session creation failed".to_string(),
            RangingError::SessionOpenFailure(reason) => format!("Ranging open failed: {}", reason),
            RangingError::SessionClosedUnexpectedly(reason) => {
                format!("Ranging closed: {}", reason)
            }
            RangingError::NoTarget => "No device. Press Start first.".to_string(),
            RangingError::Platform(details) => format!("Bluetooth error: {}", details),
        }
    }

    /// Failures after which an established link is kept until the next start or shutdown
    pub fn retains_link(&self) -> bool {
        matches!(
            self,
            RangingError::ServiceNotFound | RangingError::RangingUnsupported(_)
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            RangingError::PermissionDenied(_) => FailureKind::PermissionDenied,
            RangingError::RadioDisabled => FailureKind::RadioDisabled,
            RangingError::ChannelSoundingUnavailable => FailureKind::ChannelSoundingUnavailable,
            RangingError::InvalidAddress(_) => FailureKind::InvalidAddress,
            RangingError::ScanTimeout => FailureKind::ScanTimeout,
            RangingError::ScanFailure(_) => FailureKind::ScanFailure,
            RangingError::ConnectFailure(_) => FailureKind::ConnectFailure,
            RangingError::ServiceDiscoveryFailure(_) => FailureKind::ServiceDiscoveryFailure,
            RangingError::ServiceNotFound => FailureKind::ServiceNotFound,
            RangingError::LinkLost => FailureKind::LinkLost,
            RangingError::WriteFailure(_) => FailureKind::WriteFailure,
            RangingError::RangingUnsupported(_) => FailureKind::RangingUnsupported,
            RangingError::SessionCreateFailure(_) => FailureKind::SessionCreateFailure,
            RangingError::SessionOpenFailure(_) => FailureKind::SessionOpenFailure,
            RangingError::SessionClosedUnexpectedly(_) => FailureKind::SessionClosedUnexpectedly,
            RangingError::NoTarget => FailureKind::NoTarget,
            RangingError::Platform(_) => FailureKind::Platform,
        }
    }
}
