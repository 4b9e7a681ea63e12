// LLM-backed text transforms
//
// A single chat client serves both correction and translation; the stage
// types adapt it to the pipeline's transform interface.

pub mod client;
pub mod stages;

use std::sync::Arc;

pub use client::ChatClient;
pub use stages::{CorrectionStage, TranslationStage};

use crate::config::TransformConfig;
use crate::pipeline::TransformStage;

/// Builds transform stages for the orchestrator, so tests can substitute
/// stub stages without a live endpoint.
pub trait StageFactory: Send + Sync {
    fn correction(&self) -> Arc<dyn TransformStage>;
    fn translation(&self, target_lang: &str) -> Arc<dyn TransformStage>;
}

/// Stage factory backed by the chat-completions client.
pub struct ChatStageFactory {
    client: Arc<ChatClient>,
}

impl ChatStageFactory {
    pub fn new(config: TransformConfig) -> Self {
        Self {
            client: Arc::new(ChatClient::new(config)),
        }
    }
}

impl StageFactory for ChatStageFactory {
    fn correction(&self) -> Arc<dyn TransformStage> {
        Arc::new(CorrectionStage::new(self.client.clone()))
    }

    fn translation(&self, target_lang: &str) -> Arc<dyn TransformStage> {
        Arc::new(TranslationStage::new(self.client.clone(), target_lang))
    }
}
