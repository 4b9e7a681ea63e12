use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Task store error: {0}")]
    Store(String),

    #[error("Transcription error: {0}")]
    Transcribe(String),

    #[error("Text transform error: {0}")]
    Transform(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task queue is full, try again later")]
    Capacity,

    #[error("Task already exists: {0}")]
    TaskExists(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, SubflowError>;
