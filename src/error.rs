use thiserror::Error;

/// Errors the core can actually recover from or report. Precondition
/// violations are asserts, missing chunk data is `NotLoaded`, and neither
/// goes through here.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("entity bounding box is outside the active area")]
    OutOfArea,

    #[error("work queue disconnected")]
    QueueDisconnected,

    #[error("invalid configuration: {0}")]
    Config(String),
}
