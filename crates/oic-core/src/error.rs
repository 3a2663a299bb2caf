use thiserror::Error;

/// Synchronous error type shared by the representation model and the
/// server/client API surface.
///
/// Network outcomes never use this type; they travel through request
/// completions instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OicError {
    /// Invalid caller input, rejected before any I/O.
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),
    /// Operation not permitted for the platform's configured mode.
    #[error("invalid mode: {0}")]
    InvalidMode(&'static str),
    /// Attribute lookup on a key that is not present.
    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),
    /// Attribute present but stored with a different type.
    #[error("type mismatch for '{key}': expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
    /// Resource handle does not name a registered resource.
    #[error("no such resource")]
    NoResource,
    /// Notification requested for a resource without observers.
    #[error("resource has no registered observers")]
    NoObservers,
}
