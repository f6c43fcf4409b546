use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum UsbError {
    #[error("Property error [{key}]: {reason}")]
    Property { key: String, reason: String },

    #[error("Debug bridge not initialized")]
    DebugBridgeUnavailable,

    #[error("Coordinator is shut down")]
    CoordinatorClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, UsbError>;
