// Speech-to-text abstraction
//
// Tasks pick a model from a small fixed catalog; anything else is rejected
// at submission time, before a worker touches the file.

pub mod whisper_cli;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use whisper_cli::WhisperCliTranscriber;

use crate::config::TranscriberConfig;
use crate::error::{Result, SubflowError};

/// One entry of the transcription model catalog.
#[derive(Debug, Clone, Copy)]
pub struct ModelInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Supported whisper models, ordered smallest to largest.
pub const AVAILABLE_MODELS: [ModelInfo; 6] = [
    ModelInfo {
        name: "tiny",
        description: "Smallest model, fastest, lowest accuracy",
    },
    ModelInfo {
        name: "base",
        description: "Basic model, fast, moderate accuracy",
    },
    ModelInfo {
        name: "small",
        description: "Small model, balanced speed and accuracy",
    },
    ModelInfo {
        name: "medium",
        description: "Medium model, higher accuracy, slower",
    },
    ModelInfo {
        name: "large-v3",
        description: "Large model, highest accuracy, slowest",
    },
    ModelInfo {
        name: "large-v3-turbo",
        description: "Large model tuned for speed while keeping accuracy",
    },
];

pub fn available_models() -> &'static [ModelInfo] {
    &AVAILABLE_MODELS
}

/// Reject model identifiers outside the catalog.
pub fn validate_model(name: &str) -> Result<()> {
    if AVAILABLE_MODELS.iter().any(|model| model.name == name) {
        Ok(())
    } else {
        Err(SubflowError::UnknownModel(name.to_string()))
    }
}

/// Main trait for transcription operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file into an SRT file inside `output_dir`,
    /// returning the path of the generated subtitle file.
    async fn transcribe<'a>(
        &self,
        audio_path: &'a Path,
        output_dir: &'a Path,
        language: Option<&'a str>,
        model: &'a str,
    ) -> Result<PathBuf>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    /// Create the default transcriber implementation (whisper CLI)
    pub fn create(config: TranscriberConfig) -> Arc<dyn Transcriber> {
        Arc::new(WhisperCliTranscriber::new(config))
    }
}
