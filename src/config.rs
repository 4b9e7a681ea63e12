use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, SubflowError};

/// Environment variable consulted for the text-transform API key before the
/// value in the config file.
pub const API_KEY_ENV: &str = "SUBFLOW_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub pipeline: PipelineConfig,
    pub transcriber: TranscriberConfig,
    pub transform: TransformConfig,
    pub media: MediaConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of long-lived task workers
    pub workers: usize,
    /// Queue depth multiplier: max_tasks = workers * queue_factor
    pub queue_factor: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrent scene transforms per pipeline run
    pub max_workers: usize,
    /// Time gap (seconds) treated as a scene boundary
    pub scene_gap: f64,
    /// Maximum subtitles per scene
    pub max_scene_size: usize,
    /// Minimum subtitles per scene
    pub min_scene_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to the whisper binary
    pub binary_path: String,
    /// Model used when a task does not request one
    pub default_model: String,
    /// Source language hint passed to whisper (None lets whisper detect)
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Base URL of an OpenAI-compatible chat-completions endpoint
    pub endpoint: String,
    /// Bearer token for the endpoint
    pub api_key: String,
    /// Chat model used for correction and translation
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding uploaded inputs and generated artifacts
    pub work_dir: PathBuf,
    /// SQLite database holding task state
    pub db_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig {
                workers: 2,
                queue_factor: 3,
            },
            pipeline: PipelineConfig {
                max_workers: 3,
                scene_gap: 2.0,
                max_scene_size: 15,
                min_scene_size: 3,
            },
            transcriber: TranscriberConfig {
                binary_path: "whisper".to_string(),
                default_model: "large-v3-turbo".to_string(),
                language: None,
            },
            transform: TransformConfig {
                endpoint: "https://api.deepseek.com/v1".to_string(),
                api_key: String::new(),
                model: "deepseek-chat".to_string(),
            },
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
            },
            storage: StorageConfig {
                work_dir: PathBuf::from("uploads"),
                db_path: PathBuf::from("tasks.db"),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubflowError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| SubflowError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubflowError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubflowError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Apply environment overrides. The API key from the environment takes
    /// precedence over the config file so secrets stay out of checked-in files.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.transform.api_key = key;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::default();
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.orchestrator.workers, config.orchestrator.workers);
        assert_eq!(loaded.pipeline.max_scene_size, config.pipeline.max_scene_size);
        assert_eq!(loaded.transcriber.default_model, config.transcriber.default_model);
        assert_eq!(loaded.storage.work_dir, config.storage.work_dir);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file("no-such-config.toml").unwrap_err();
        assert!(matches!(err, SubflowError::Config(_)));
    }
}
