use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Boxed error returned by user-supplied service handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to the WebSocket transport or the connection state
    WebSocket,
    /// The bridge sent a message that does not follow the protocol
    Protocol,
    /// A service call was rejected, either by the bridge or by the remote handler
    Service,
    /// An operation did not complete before its deadline
    Timeout,
    /// Error related to invalid input within rosbridge-client
    Validation,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn protocol<S: Into<String>>(reason: S) -> Self {
        ProtocolViolation {
            reason: reason.into(),
        }
        .into()
    }

    pub fn service<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        ServiceFailure {
            service: service.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn timeout<S: Into<String>>(operation: S, after: Duration) -> Self {
        Timeout {
            operation: operation.into(),
            after,
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// A message from the bridge was malformed or missing a required field.
#[non_exhaustive]
#[derive(Debug)]
pub struct ProtocolViolation {
    pub reason: String,
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol violation: {}", self.reason)
    }
}

impl StdError for ProtocolViolation {}

/// A service call completed with `result: false`.
#[non_exhaustive]
#[derive(Debug)]
pub struct ServiceFailure {
    /// Name of the service that was called
    pub service: String,
    /// Error text reported by the bridge, or a generic description
    pub message: String,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for ServiceFailure {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Timeout {
    /// Human readable description of what timed out
    pub operation: String,
    /// Deadline that elapsed
    pub after: Duration,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} timeout after {}ms",
            self.operation,
            self.after.as_millis()
        )
    }
}

impl StdError for Timeout {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<ProtocolViolation> for Error {
    fn from(err: ProtocolViolation) -> Self {
        Error::with_source(Kind::Protocol, err)
    }
}

impl From<ServiceFailure> for Error {
    fn from(err: ServiceFailure) -> Self {
        Error::with_source(Kind::Service, err)
    }
}

impl From<Timeout> for Error {
    fn from(err: Timeout) -> Self {
        Error::with_source(Kind::Timeout, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_failure_displays_remote_text() {
        let error = Error::service("/add_two_ints", "bad arguments");

        assert_eq!(error.kind(), Kind::Service);
        assert_eq!(error.to_string(), "Service: bad arguments");

        let failure = error.downcast_ref::<ServiceFailure>().unwrap();
        assert_eq!(failure.service, "/add_two_ints");
    }

    #[test]
    fn timeout_display_should_succeed() {
        let timeout = Timeout {
            operation: "Service call /rosapi/get_time".to_owned(),
            after: Duration::from_millis(250),
        };

        assert_eq!(
            timeout.to_string(),
            "Service call /rosapi/get_time timeout after 250ms"
        );
    }

    #[test]
    fn protocol_into_error_should_succeed() {
        let error: Error = ProtocolViolation {
            reason: "Invalid service response".to_owned(),
        }
        .into();

        assert_eq!(error.kind(), Kind::Protocol);
        assert!(error.to_string().contains("Invalid service response"));
    }
}
