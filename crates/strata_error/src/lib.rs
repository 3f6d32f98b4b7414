use std::error::Error;
use std::fmt;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Return a "not implemented" error for a construct the planner declines to
/// support.
///
/// The message is surfaced verbatim to the caller.
#[macro_export]
macro_rules! not_implemented {
    ($($arg:tt)*) => {
        return Err($crate::DbError::not_implemented(std::format!($($arg)*)))
    };
}

/// Create an internal error.
///
/// Internal errors indicate an invariant the planner maintains itself was
/// violated.
#[macro_export]
macro_rules! internal {
    ($($arg:tt)*) => {
        $crate::DbError::internal(std::format!($($arg)*))
    };
}

/// Broad category of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The statement uses a construct that isn't supported.
    NotImplemented,
    /// Planner invariant violated.
    Internal,
    /// Error coming from semantic analysis, passed through unmodified.
    Analysis,
    /// Invalid configuration value.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotImplemented => write!(f, "not implemented"),
            Self::Internal => write!(f, "internal"),
            Self::Analysis => write!(f, "analysis"),
            Self::Config => write!(f, "config"),
        }
    }
}

#[derive(Debug)]
pub struct DbError {
    inner: Box<DbErrorInner>,
}

#[derive(Debug)]
struct DbErrorInner {
    kind: ErrorKind,
    msg: String,
    source: Option<Box<dyn Error + Send + Sync>>,
    fields: Vec<(String, String)>,
}

impl DbError {
    /// Create a new internal error.
    pub fn new(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    pub fn with_kind(kind: ErrorKind, msg: impl Into<String>) -> Self {
        DbError {
            inner: Box::new(DbErrorInner {
                kind,
                msg: msg.into(),
                source: None,
                fields: Vec::new(),
            }),
        }
    }

    pub fn with_source(msg: impl Into<String>, source: Box<dyn Error + Send + Sync>) -> Self {
        let mut err = Self::new(msg);
        err.inner.source = Some(source);
        err
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::NotImplemented, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Internal, msg)
    }

    /// Wrap an error produced during semantic analysis.
    ///
    /// The message is kept as is.
    pub fn analysis(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Analysis, msg)
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Config, msg)
    }

    /// Attach an additional key/value pair to the error.
    pub fn with_field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.inner.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    pub fn message(&self) -> &str {
        &self.inner.msg
    }

    pub fn is_not_implemented(&self) -> bool {
        self.inner.kind == ErrorKind::NotImplemented
    }

    pub fn is_internal(&self) -> bool {
        self.inner.kind == ErrorKind::Internal
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.msg)?;
        for (k, v) in &self.inner.fields {
            write!(f, "\n{k}: {v}")?;
        }
        if let Some(source) = &self.inner.source {
            write!(f, "\nError source: {source}")?;
        }
        Ok(())
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source.as_ref().map(|e| e.as_ref() as _)
    }
}

pub trait ResultExt<T, E> {
    /// Wrap an error with some context.
    fn context(self, msg: &'static str) -> Result<T>;

    /// Wrap an error with lazily computed context.
    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| DbError::with_source(msg, Box::new(e)))
    }

    fn context_fn<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| DbError::with_source(f(), Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsupported() -> Result<()> {
        not_implemented!("ORDER BY without LIMIT currently not supported")
    }

    #[test]
    fn not_implemented_macro_keeps_message() {
        let err = unsupported().unwrap_err();
        assert!(err.is_not_implemented());
        assert_eq!("ORDER BY without LIMIT currently not supported", err.to_string());
    }

    #[test]
    fn internal_with_fields() {
        let err = internal!("unassigned conjuncts").with_field("count", 2);
        assert!(err.is_internal());
        assert_eq!("unassigned conjuncts\ncount: 2", err.to_string());
    }

    #[test]
    fn analysis_errors_pass_through() {
        let err = DbError::analysis("Column 'x' not found");
        assert_eq!(ErrorKind::Analysis, err.kind());
        assert_eq!("Column 'x' not found", err.message());
    }

    #[test]
    fn context_wraps_source() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("failed to write explain").unwrap_err();
        assert!(err.source().is_some());
    }
}
