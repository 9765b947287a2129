use thiserror::Error;

use crate::driver::DriverError;

/// Coarse classification used by hosts to pick how a failure is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    NotFound,
    Driver,
    Validation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("{0}")]
    Connection(String),
    #[error("not connected")]
    NotConnected,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Driver(String),
    #[error("{0}")]
    Validation(String),
}

impl DbError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) | Self::NotConnected => ErrorKind::Connection,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Driver(_) => ErrorKind::Driver,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn connection(error: &DriverError) -> Self {
        Self::Connection(error.message().to_string())
    }
}

impl From<DriverError> for DbError {
    fn from(error: DriverError) -> Self {
        Self::Driver(error.message().to_string())
    }
}
