//! Hub error types
//!
//! Only ingress failures are errors. A subscriber that falls behind or
//! disconnects is removed, never reported to the publisher.

/// Error type for hub ingress operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    /// The hub has been stopped (or its event loop is gone)
    Stopped,
    /// The ingress queue is full (non-blocking calls only)
    QueueFull,
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::Stopped => write!(f, "Hub is stopped"),
            HubError::QueueFull => write!(f, "Hub ingress queue is full"),
        }
    }
}

impl std::error::Error for HubError {}
