use thiserror::Error;

/// Custom error types for the quiz server
///
/// Every variant is recoverable at the connection boundary: the handler
/// maps it to a named error event sent back to the originating client.
#[derive(Debug, Error)]
pub enum QuizError {
    /// Room and quiz lookup errors
    #[error("Quiz not found")]
    QuizNotFound(String),

    #[error("Room does not exist")]
    RoomNotFound(String),

    #[error("Quiz already started. Cannot join this room.")]
    AlreadyStarted,

    /// Answer acceptance errors
    #[error("Answer already submitted for this question")]
    DuplicateAnswer,

    #[error("Cannot submit answer at this time")]
    NotActive,

    /// Host-only operations attempted by someone else
    #[error("Not authorized to {0}")]
    NotAuthorized(&'static str),

    /// History archive is write-once per room code
    #[error("History entry {0} already recorded")]
    HistoryConflict(String),

    /// Quiz definition errors surfaced while loading the catalog
    #[error("Invalid quiz definition: {0}")]
    InvalidQuizSet(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using QuizError
pub type Result<T> = std::result::Result<T, QuizError>;

impl QuizError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        QuizError::Internal(msg.into())
    }
}
