use thiserror::Error;

/// A specialized `Result` type for fallible library-internal operations.
///
/// Per the core's error-handling policy, this type is never returned from the
/// instrumentation-facing API (`txn_*` / `segment_*` functions): those report
/// failure through a `bool`/`Option` return and a Supportability metric
/// instead, and never panic. `TraceCoreError` exists for the narrower set of
/// constructor-time misuse that is reasonable to surface as a `Result` from
/// internal helpers, such as building an `App` or a bounded heap.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceCoreError {
    /// A bounded collection (metric table, segment heap) was asked to be
    /// created with an invalid capacity.
    #[error("invalid capacity {0}: capacity must be 0 (unbounded) or >= 2")]
    InvalidCapacity(i64),

    /// A configured trusted-account-key string was empty or otherwise unusable.
    #[error("invalid trusted account key")]
    InvalidTrustedAccountKey,

    /// Other errors that do not warrant their own variant.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<String> for TraceCoreError {
    fn from(msg: String) -> Self {
        TraceCoreError::Other(msg.into())
    }
}

impl From<&'static str> for TraceCoreError {
    fn from(msg: &'static str) -> Self {
        TraceCoreError::Other(Box::new(Custom(msg.into())))
    }
}

#[derive(Error, Debug)]
#[error("{0}")]
struct Custom(String);

/// A specialized `Result` type for fallible library-internal operations.
pub type TraceCoreResult<T> = Result<T, TraceCoreError>;
