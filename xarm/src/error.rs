/*!
Common error types for the xArm driver.
*/

use thiserror::Error;

/// Common result type used throughout the driver
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure a controller operation can surface
#[derive(Error, Debug)]
pub enum Error {
    /// Unrecognized transport designator
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The designated device could not be opened
    #[error("Failed to open device: {0}")]
    DeviceOpen(String),

    /// Argument outside its allowed domain; nothing was sent
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// No matching reply arrived within the timeout
    #[error("Receive error: {0}")]
    Receive(String),

    /// Payload does not fit a frame
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// I/O errors while talking to the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new device open error
    pub fn device_open(msg: impl Into<String>) -> Self {
        Self::DeviceOpen(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new receive error
    pub fn receive(msg: impl Into<String>) -> Self {
        Self::Receive(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// True when the operation was rejected before any I/O took place
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::receive("Function 'get_position' recv error");
        assert_eq!(err.to_string(), "Receive error: Function 'get_position' recv error");

        let err = Error::validation("position 1001 outside 0..=1000");
        assert!(err.is_validation());
        assert!(!Error::configuration("LPT1").is_validation());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "unplugged");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
