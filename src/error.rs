/// Error types for talkscribe
///
/// Uses thiserror for ergonomic error handling with proper Display implementations.
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("No audio stream in video")]
    NoAudioStream,

    #[error("Media pipeline error: {0}")]
    Media(String),

    #[error("Media pipeline timeout after {0}s")]
    MediaTimeout(u64),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Transcription timeout")]
    AsrTimeout,

    #[error("Transcription service error: {0}")]
    AsrProvider(String),

    #[error("Chunked transcription failed: {0} of {1} chunks errored")]
    ChunkedAsrFailed(usize, usize),

    #[error("Transcription empty")]
    TranscriptionEmpty,

    #[error("No speech recognized")]
    NoSpeech,

    #[error("LLM service error: {0}")]
    Llm(String),

    #[error("Chat API error: {0}")]
    Chat(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Insufficient balance: need {needed} min, have {available} min")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("Balance update conflict persisted after retries for user {0}")]
    BalanceCasExhausted(i64),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// True for errors that fail the job but are an expected part of the
    /// contract rather than an infrastructure fault.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::UnsupportedFormat(_)
                | AppError::NoAudioStream
                | AppError::InsufficientBalance { .. }
                | AppError::TranscriptionEmpty
                | AppError::NoSpeech
        )
    }

    /// Map an error onto the short user-visible message.
    ///
    /// Matching is substring-based over the error text, mirroring how the
    /// chat surface routes provider errors it cannot classify structurally.
    pub fn user_message(&self) -> &'static str {
        let text = self.to_string().to_lowercase();
        if text.contains("invalidparameter") || text.contains("duration") {
            "Аудио слишком длинное для обработки. Попробуйте отправить файл короче 60 минут."
        } else if text.contains("timeout") {
            "Обработка заняла слишком много времени. Попробуйте файл поменьше."
        } else if text.contains("transcription empty") || text.contains("no speech") {
            "Не удалось распознать речь. Проверьте качество аудио."
        } else {
            "Произошла ошибка при обработке аудио. Попробуйте позже."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_routing() {
        let too_long = AppError::AsrProvider("InvalidParameter: file too big".to_string());
        assert!(too_long.user_message().contains("длинное"));

        let timeout = AppError::AsrTimeout;
        assert!(timeout.user_message().contains("времени"));

        let empty = AppError::TranscriptionEmpty;
        assert!(empty.user_message().contains("распознать"));

        let generic = AppError::Other("boom".to_string());
        assert!(generic.user_message().contains("позже"));
    }

    #[test]
    fn test_user_facing_classification() {
        assert!(AppError::NoSpeech.is_user_facing());
        assert!(AppError::InsufficientBalance {
            needed: 5,
            available: 1
        }
        .is_user_facing());
        assert!(!AppError::Queue("down".to_string()).is_user_facing());
    }
}
