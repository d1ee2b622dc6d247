use thiserror::Error;

/// Errors raised by reader enumeration, card sessions and the clone operation
#[derive(Debug, Error)]
pub enum CardError {
    #[error("No smart card reader found{}", detail_suffix(.0))]
    NoReaderFound(Option<String>),

    #[error("Failed to connect to reader '{reader}': {reason}")]
    Connection { reader: String, reason: String },

    #[error("Transmission failed: {0}")]
    Transmission(String),

    #[error("{operation} at offset {offset:04X} returned status {sw1:02X} {sw2:02X}")]
    UnexpectedStatus {
        operation: &'static str,
        offset: u16,
        sw1: u8,
        sw2: u8,
        /// Bytes successfully processed before the failing block
        completed: usize,
    },

    #[error("Destination holds {available} bytes but {required} are required")]
    InsufficientCapacity { required: usize, available: usize },

    #[error("Invalid card region: {0}")]
    InvalidRegion(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(": {d}"))
        .unwrap_or_default()
}

impl CardError {
    pub fn connection(reader: &str, reason: impl Into<String>) -> Self {
        CardError::Connection {
            reader: reader.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error happened while establishing the session
    pub fn is_connection(&self) -> bool {
        matches!(self, CardError::Connection { .. })
    }

    /// Whether the error happened while exchanging APDUs
    pub fn is_transmission(&self) -> bool {
        matches!(self, CardError::Transmission(_))
    }
}

pub type CardResult<T> = std::result::Result<T, CardError>;
