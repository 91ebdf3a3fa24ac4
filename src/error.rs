//! Error types for the container, the property store and the application runtime.

use std::path::PathBuf;

/// Boxed error returned by user code (constructors, hooks, runners, servers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by springlet.
///
/// Errors carry a chain of context. Wrapping an error with
/// [`ErrorContext::context`] produces `outer: inner`, so the top-level
/// message shows the full causal path.
///
/// # Examples
///
/// ```rust
/// use springlet::{Error, ErrorContext};
///
/// let inner: Result<(), Error> = Err(Error::msg("condition error"));
/// let err = inner.context("resolve bean error").unwrap_err();
/// assert_eq!(err.to_string(), "resolve bean error: condition error");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Free-form error message
    #[error("{0}")]
    Message(String),
    /// Context wrapped around an inner error
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
    /// A referenced property has no value and no default
    #[error("property \"{0}\" not exist")]
    PropertyNotExist(String),
    /// Two sources disagree on the shape of a property path
    #[error("property conflict at path {0}")]
    PropertyConflict(String),
    /// Reading a configuration source failed
    #[error("read file {} error: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A configuration source could not be parsed
    #[error("parse {path} error: {message}")]
    Parse { path: String, message: String },
    /// A property subtree could not be bound to the target type
    #[error("bind {path} error: {message}")]
    Bind { path: String, message: String },
    /// Two active beans share an identity
    #[error("found duplicate beans [{0}] [{1}]")]
    DuplicateBean(String, String),
    /// Constructor dependencies form a cycle
    #[error("found circular references: {}", .0.join(" -> "))]
    Circular(Vec<String>),
    /// No bean matched a required selector
    #[error("can't find bean, selector={0}")]
    BeanNotFound(String),
    /// Expression parse or evaluation failure
    #[error("expression error: {0}")]
    Expression(String),
    /// A server gave up before every server reported ready
    #[error("server intercepted")]
    ServerIntercepted,
    /// Returned by servers that were stopped gracefully
    #[error("server closed")]
    ServerClosed,
    /// Error raised by user code
    #[error(transparent)]
    User(BoxError),
}

impl Error {
    /// Creates a message error.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    /// Wraps a user error.
    pub fn user<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::User(err.into())
    }

    /// Wraps this error with an outer context message.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error of a context chain.
    pub fn root_cause(&self) -> &Error {
        let mut e = self;
        while let Error::Context { source, .. } = e {
            e = source;
        }
        e
    }

    /// Returns true if the chain ends in a missing-file error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }

    /// Returns true if the chain ends in [`Error::ServerClosed`].
    pub fn is_server_closed(&self) -> bool {
        matches!(self.root_cause(), Error::ServerClosed)
    }
}

/// Adds context to `Result`s.
pub trait ErrorContext<T> {
    /// Wraps the error, if any, with a fixed message.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wraps the error, if any, with a lazily built message.
    fn with_context<S, F>(self, f: F) -> Result<T>
    where
        S: Into<String>,
        F: FnOnce() -> S;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.wrap(context))
    }

    fn with_context<S, F>(self, f: F) -> Result<T>
    where
        S: Into<String>,
        F: FnOnce() -> S,
    {
        self.map_err(|e| e.wrap(f()))
    }
}

/// Result type used throughout springlet.
///
/// ```rust
/// use springlet::{Result, Error};
///
/// fn lookup(found: bool) -> Result<&'static str> {
///     if found { Ok("bean") } else { Err(Error::BeanNotFound("{Name:a}".into())) }
/// }
///
/// assert!(lookup(true).is_ok());
/// assert_eq!(lookup(false).unwrap_err().to_string(), "can't find bean, selector={Name:a}");
/// ```
pub type Result<T> = std::result::Result<T, Error>;
