use backtrace::Backtrace;
use serde::{de, ser};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic, ReadExecutor};

/// Error kinds for Opal operations.
///
/// Each kind describes a specific category of failure, enabling precise
/// error handling at call sites.
///
/// # Examples
///
/// ```rust,ignore
/// use opal::errors::{OpalError, ErrorKind, OpalResult};
///
/// fn example() -> OpalResult<()> {
///     Err(OpalError::new("Index not found", ErrorKind::IndexNotFound))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Validation errors - bad argument type or shape
    /// Invalid data type for operation
    InvalidDataType,
    /// Generic validation error
    ValidationError,
    /// Invalid field name
    InvalidFieldName,

    // State errors - operation not valid for the current document/collection state
    /// The operation is not valid in the current context (document already in a
    /// collection, update target missing an id, and so on)
    IllegalState,
    /// The requested document was not found
    DocumentNotFound,

    // Constraint violation errors
    /// A unique constraint was violated
    UniqueConstraintViolation,

    // Configuration errors
    /// Mutually exclusive or otherwise invalid constructor options
    InvalidConfiguration,

    // Indexing errors
    /// Generic indexing error
    IndexingError,
    /// Index does not exist
    IndexNotFound,
    /// Index data diverges from its sorted invariant
    IndexCorrupted,

    // Event errors
    /// Error in event processing
    EventError,

    // Data encoding errors
    /// Error encoding or decoding data
    EncodingError,

    // Generic/internal errors - used as fallback
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidDataType => write!(f, "Invalid data type"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::InvalidFieldName => write!(f, "Invalid field name"),
            ErrorKind::IllegalState => write!(f, "Illegal state"),
            ErrorKind::DocumentNotFound => write!(f, "Document not found"),
            ErrorKind::UniqueConstraintViolation => write!(f, "Unique constraint violation"),
            ErrorKind::InvalidConfiguration => write!(f, "Invalid configuration"),
            ErrorKind::IndexingError => write!(f, "Indexing error"),
            ErrorKind::IndexNotFound => write!(f, "Index not found"),
            ErrorKind::IndexCorrupted => write!(f, "Index corrupted"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom Opal error type.
///
/// `OpalError` encapsulates the error message, kind, and an optional cause.
/// It supports error chaining and backtraces for debugging.
///
/// # Examples
///
/// ```rust,ignore
/// use opal::errors::{OpalError, ErrorKind};
///
/// let err = OpalError::new("Index not found", ErrorKind::IndexNotFound);
///
/// let cause = OpalError::new("bad comparator", ErrorKind::InternalError);
/// let err = OpalError::new_with_cause("Index rebuild failed", ErrorKind::IndexingError, cause);
/// ```
#[derive(Clone)]
pub struct OpalError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<OpalError>>,
    backtrace: Atomic<Backtrace>,
}

impl OpalError {
    /// Creates a new `OpalError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        OpalError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `OpalError` with a cause error, preserving the chain for
    /// debugging.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: OpalError) -> Self {
        OpalError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&OpalError> {
        self.cause.as_deref()
    }
}

impl Display for OpalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for OpalError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{}", self.message, self.backtrace.read_with(|b| format!("{:?}", b))),
        }
    }
}

impl Error for OpalError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for Opal operations.
///
/// `OpalResult<T>` is shorthand for `Result<T, OpalError>`. All fallible Opal
/// operations return this type.
pub type OpalResult<T> = Result<T, OpalError>;

impl de::Error for OpalError {
    fn custom<T: Display>(msg: T) -> Self {
        OpalError::new(&msg.to_string(), ErrorKind::EncodingError)
    }
}

impl ser::Error for OpalError {
    fn custom<T: Display>(msg: T) -> Self {
        OpalError::new(&msg.to_string(), ErrorKind::EncodingError)
    }
}

// From trait implementations for automatic error conversion
impl From<serde_json::Error> for OpalError {
    fn from(err: serde_json::Error) -> Self {
        OpalError::new(&format!("JSON error: {}", err), ErrorKind::EncodingError)
    }
}

impl From<std::num::ParseIntError> for OpalError {
    fn from(err: std::num::ParseIntError) -> Self {
        OpalError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::InvalidDataType,
        )
    }
}

impl From<std::num::ParseFloatError> for OpalError {
    fn from(err: std::num::ParseFloatError) -> Self {
        OpalError::new(
            &format!("Float parsing error: {}", err),
            ErrorKind::InvalidDataType,
        )
    }
}

impl From<String> for OpalError {
    fn from(msg: String) -> Self {
        OpalError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for OpalError {
    fn from(msg: &str) -> Self {
        OpalError::new(msg, ErrorKind::InternalError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opal_error_new_creates_error() {
        let error = OpalError::new("An error occurred", ErrorKind::IllegalState);
        assert_eq!(error.message(), "An error occurred");
        assert_eq!(error.kind(), &ErrorKind::IllegalState);
        assert!(error.cause().is_none());
    }

    #[test]
    fn opal_error_new_with_cause_creates_error() {
        let cause = OpalError::new("root cause", ErrorKind::InternalError);
        let error =
            OpalError::new_with_cause("An error occurred", ErrorKind::IndexingError, cause);
        assert_eq!(error.message(), "An error occurred");
        assert_eq!(error.kind(), &ErrorKind::IndexingError);
        assert!(error.cause().is_some());
    }

    #[test]
    fn opal_error_display_formats_correctly() {
        let error = OpalError::new("An error occurred", ErrorKind::IllegalState);
        assert_eq!(format!("{}", error), "An error occurred");
    }

    #[test]
    fn opal_error_debug_formats_with_cause() {
        let cause = OpalError::new("root cause", ErrorKind::InternalError);
        let error = OpalError::new_with_cause("outer", ErrorKind::IndexingError, cause);
        let formatted = format!("{:?}", error);
        assert!(formatted.contains("outer"));
        assert!(formatted.contains("Caused by:"));
    }

    #[test]
    fn opal_error_source_returns_cause() {
        let cause = OpalError::new("root cause", ErrorKind::InternalError);
        let error = OpalError::new_with_cause("outer", ErrorKind::IndexingError, cause);
        assert!(error.source().is_some());

        let error = OpalError::new("no cause", ErrorKind::InternalError);
        assert!(error.source().is_none());
    }

    #[test]
    fn test_error_chain_with_different_kinds() {
        let root_cause = OpalError::new("index values out of order", ErrorKind::IndexCorrupted);
        let top_level =
            OpalError::new_with_cause("Cannot run range query", ErrorKind::IndexingError, root_cause);

        assert_eq!(top_level.kind(), &ErrorKind::IndexingError);
        assert_eq!(
            top_level.cause().map(|c| c.kind().clone()),
            Some(ErrorKind::IndexCorrupted)
        );
    }

    #[test]
    fn test_from_parse_int_error() {
        let parse_err = "not_a_number".parse::<i32>().unwrap_err();
        let opal_err: OpalError = parse_err.into();
        assert_eq!(opal_err.kind(), &ErrorKind::InvalidDataType);
    }

    #[test]
    fn test_from_parse_float_error() {
        let parse_err = "not_a_float".parse::<f64>().unwrap_err();
        let opal_err: OpalError = parse_err.into();
        assert_eq!(opal_err.kind(), &ErrorKind::InvalidDataType);
    }

    #[test]
    fn test_from_str_and_string() {
        let str_err: OpalError = "string error".into();
        assert_eq!(str_err.kind(), &ErrorKind::InternalError);

        let string_err: OpalError = String::from("owned error").into();
        assert_eq!(string_err.message(), "owned error");
    }

    #[test]
    fn test_question_mark_operator_with_from() {
        fn parse_number_operation() -> OpalResult<i32> {
            let num: i32 = "12345".parse()?;
            Ok(num)
        }

        assert_eq!(parse_number_operation().unwrap(), 12345);
    }

    #[test]
    fn test_error_kind_equality() {
        let error1 = OpalError::new("Error 1", ErrorKind::IndexNotFound);
        let error2 = OpalError::new("Error 2", ErrorKind::IndexNotFound);
        let error3 = OpalError::new("Error 3", ErrorKind::DocumentNotFound);

        assert_eq!(error1.kind(), error2.kind());
        assert_ne!(error1.kind(), error3.kind());
    }
}
