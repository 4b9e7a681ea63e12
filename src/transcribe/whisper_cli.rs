use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

use super::{validate_model, Transcriber};
use crate::config::TranscriberConfig;
use crate::error::{Result, SubflowError};

/// Transcriber backed by the system whisper command.
pub struct WhisperCliTranscriber {
    config: TranscriberConfig,
}

impl WhisperCliTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe<'a>(
        &self,
        audio_path: &'a Path,
        output_dir: &'a Path,
        language: Option<&'a str>,
        model: &'a str,
    ) -> Result<PathBuf> {
        validate_model(model)?;

        info!(
            "Transcribing {} with model {}",
            audio_path.display(),
            model
        );

        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(audio_path)
            .arg("--model")
            .arg(model)
            .arg("--output_dir")
            .arg(output_dir)
            .arg("--output_format")
            .arg("srt");

        if let Some(lang) = language {
            cmd.arg("--language").arg(lang);
        }

        let output = cmd
            .output()
            .map_err(|e| SubflowError::Transcribe(format!("Failed to execute whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubflowError::Transcribe(format!(
                "Whisper failed: {}",
                stderr
            )));
        }

        let audio_stem = audio_path
            .file_stem()
            .ok_or_else(|| SubflowError::Transcribe("Invalid audio filename".to_string()))?;
        let srt_path = output_dir.join(format!("{}.srt", audio_stem.to_string_lossy()));

        if !srt_path.exists() {
            return Err(SubflowError::Transcribe(format!(
                "Whisper produced no subtitle file at {}",
                srt_path.display()
            )));
        }

        info!("Transcription written to {}", srt_path.display());
        Ok(srt_path)
    }
}
