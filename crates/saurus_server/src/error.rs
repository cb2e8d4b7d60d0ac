//! Error types for the relay server.

/// Enumeration of possible server errors.
///
/// Channel-level failures stay inside `multisocket::Error` and are reported
/// to the peer; this type is for failures the embedding application handles.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or lost connections
    #[error("Network error: {0}")]
    Network(String),

    /// Errors bubbled up from the multiplexing layer
    #[error(transparent)]
    Socket(#[from] multisocket::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}
