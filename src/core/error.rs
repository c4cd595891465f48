use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Usage,
    InvalidIdentifier,
    InvalidCursor,
    Connect,
    Io,
    Encoding,
    MalformedResponse,
    NonHttpResponse,
    RequestFailed,
    MissingContentLength,
    TruncatedResponse,
}

impl ErrorKind {
    /// True for failures raised before any network I/O happens.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            ErrorKind::Usage
                | ErrorKind::InvalidIdentifier
                | ErrorKind::InvalidCursor
                | ErrorKind::Encoding
        )
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    endpoint: Option<String>,
    status: Option<u16>,
    lengths: Option<(u64, u64)>,
    detail: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            endpoint: None,
            status: None,
            lengths: None,
            detail: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Declared and received body lengths of a truncated response.
    pub fn lengths(&self) -> Option<(u64, u64)> {
        self.lengths
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_endpoint(mut self, host: &str, port: u16) -> Self {
        self.endpoint = Some(format!("{host}:{port}"));
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_lengths(mut self, declared: u64, actual: u64) -> Self {
        self.lengths = Some((declared, actual));
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(endpoint) = &self.endpoint {
            write!(f, " (endpoint: {endpoint})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {status})")?;
        }
        if let Some((declared, actual)) = self.lengths {
            write!(f, " (declared: {declared}, received: {actual})")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        if let Some(detail) = &self.detail {
            if !detail.is_empty() {
                write!(f, "\n{detail}")?;
            }
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind};
    use std::error::Error as _;
    use std::io;

    #[test]
    fn display_includes_context_fields() {
        let err = Error::new(ErrorKind::RequestFailed)
            .with_message("request failed: 404 Not Found")
            .with_endpoint("127.0.0.1", 10010)
            .with_status(404)
            .with_detail("no such handler");
        let text = err.to_string();
        assert!(text.starts_with("RequestFailed: request failed: 404 Not Found"));
        assert!(text.contains("(endpoint: 127.0.0.1:10010)"));
        assert!(text.contains("(status: 404)"));
        assert!(text.ends_with("\nno such handler"));
    }

    #[test]
    fn source_is_exposed() {
        let err = Error::new(ErrorKind::Io)
            .with_message("failed to read response")
            .with_source(io::Error::new(io::ErrorKind::TimedOut, "slow broker"));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "slow broker");
        assert!(err.to_string().ends_with(": slow broker"));
    }

    #[test]
    fn validation_kinds_are_pre_network() {
        assert!(ErrorKind::InvalidIdentifier.is_validation());
        assert!(ErrorKind::InvalidCursor.is_validation());
        assert!(!ErrorKind::Connect.is_validation());
        assert!(!ErrorKind::TruncatedResponse.is_validation());
    }
}
