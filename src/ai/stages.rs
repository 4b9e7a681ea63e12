use async_trait::async_trait;
use std::sync::Arc;

use super::ChatClient;
use crate::error::Result;
use crate::pipeline::TransformStage;

/// Correction as a pipeline stage. Context windows are plumbed through the
/// client but the scene pipeline passes whole scenes, so they stay empty.
pub struct CorrectionStage {
    client: Arc<ChatClient>,
}

impl CorrectionStage {
    pub fn new(client: Arc<ChatClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransformStage for CorrectionStage {
    fn label(&self) -> &str {
        "correction"
    }

    fn filename_suffix(&self) -> String {
        "_corrected".to_string()
    }

    async fn transform(&self, text: &str) -> Result<String> {
        self.client.correct(text, &[], &[]).await
    }
}

/// Translation as a pipeline stage.
pub struct TranslationStage {
    client: Arc<ChatClient>,
    target_lang: String,
}

impl TranslationStage {
    pub fn new(client: Arc<ChatClient>, target_lang: &str) -> Self {
        Self {
            client,
            target_lang: target_lang.to_string(),
        }
    }
}

#[async_trait]
impl TransformStage for TranslationStage {
    fn label(&self) -> &str {
        "translation"
    }

    fn filename_suffix(&self) -> String {
        format!("_{}", self.target_lang)
    }

    async fn transform(&self, text: &str) -> Result<String> {
        self.client
            .translate(text, &self.target_lang, &[], &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransformConfig;

    fn client() -> Arc<ChatClient> {
        Arc::new(ChatClient::new(TransformConfig {
            endpoint: "http://localhost:0".to_string(),
            api_key: String::new(),
            model: "test".to_string(),
        }))
    }

    #[test]
    fn test_filename_suffixes() {
        assert_eq!(CorrectionStage::new(client()).filename_suffix(), "_corrected");
        assert_eq!(
            TranslationStage::new(client(), "en").filename_suffix(),
            "_en"
        );
    }
}
