//! Error types for building and querying line indexes

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    /// Read, write, seek or rename failure against the filesystem
    #[error("I/O fault: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("No lines to index")]
    EmptyInput,

    #[error("Unsorted input: {0}")]
    UnsortedInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl IndexError {
    /// Stable identifier for the error class
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::Io(_) => "IO_FAULT",
            IndexError::CorruptIndex(_) => "CORRUPT_INDEX",
            IndexError::InvalidOptions(_) => "INVALID_OPTIONS",
            IndexError::EmptyInput => "EMPTY_INPUT",
            IndexError::UnsortedInput(_) => "UNSORTED_INPUT",
            IndexError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        IndexError::CorruptIndex(msg.into())
    }
}
