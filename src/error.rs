use image::error::ImageError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("{name} failed: {reason}")]
    ExternalProcess { name: String, reason: String },
    #[error("Required tool is not available: {0}")]
    MissingTool(String),
    #[error("Algorithm failed: {0}")]
    Algorithm(String),
    #[error("Invalid argument provided: {0}")]
    InvalidArgument(String),
    #[error("Interrupted by user")]
    Cancelled,
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Failed to process image: {0}")]
    Image(#[from] ImageError),
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn external(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ExternalProcess { name: name.into(), reason: reason.into() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_exits_with_two() {
        assert_eq!(Error::Cancelled.exit_code(), 2);
        assert!(Error::Cancelled.is_cancelled());
    }

    #[test]
    fn other_errors_exit_with_one() {
        assert_eq!(Error::InvalidInput("missing".into()).exit_code(), 1);
        assert_eq!(Error::external("ffmpeg", "exit status 1").exit_code(), 1);
        assert_eq!(Error::Invariant("slot 3 written twice".into()).exit_code(), 1);
    }

    #[test]
    fn external_process_message_names_the_process() {
        let error = Error::external("decoder", "exit status: 1");
        assert_eq!(error.to_string(), "decoder failed: exit status: 1");
    }
}
