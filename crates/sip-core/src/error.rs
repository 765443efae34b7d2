use sip_types::header::HeaderError;
use sip_types::Code;
use std::error::Error as StdError;
use std::{fmt, io};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[macro_export]
macro_rules! bail_status {
    ($status:expr) => {
        return Err($crate::Error::new($status))
    };
}

/// Error of any endpoint operation, carrying the status code an
/// equivalent peer would have answered with
#[derive(Debug)]
pub struct Error {
    pub status: Code,
    pub error: Option<anyhow::Error>,
}

impl Error {
    pub fn new(status: Code) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn new_error<E>(status: Code, error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            status,
            error: Some(anyhow::Error::new(error)),
        }
    }

    /// The request timed out waiting for a final response
    pub fn request_timed_out() -> Self {
        Self::new(Code::REQUEST_TIMEOUT)
    }

    /// The transport failed below the transaction
    pub fn transport_failed() -> Self {
        Self {
            status: Code::SERVICE_UNAVAILABLE,
            error: Some(anyhow::anyhow!("transport failed")),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status == Code::REQUEST_TIMEOUT
    }
}

impl StdError for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status={}", self.status)?;

        if let Some(text) = self.status.text() {
            write!(f, " ({})", text)?;
        }

        if let Some(error) = &self.error {
            write!(f, " {}", error)?;
        }

        Ok(())
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self {
            status: Code::SERVICE_UNAVAILABLE,
            error: Some(anyhow::Error::new(error)),
        }
    }
}

impl From<HeaderError> for Error {
    fn from(error: HeaderError) -> Self {
        Self {
            status: Code::BAD_REQUEST,
            error: Some(anyhow::Error::new(error)),
        }
    }
}

/// Attach a status code to the error side of a result
pub trait WithStatus<T> {
    fn status(self, status: Code) -> Result<T, Error>;
}

impl<T> WithStatus<T> for Option<T> {
    fn status(self, status: Code) -> Result<T, Error> {
        self.ok_or(Error {
            status,
            error: None,
        })
    }
}

impl<T> WithStatus<T> for Result<T, Error> {
    fn status(self, status: Code) -> Result<T, Error> {
        self.map_err(|error| Error { status, ..error })
    }
}
