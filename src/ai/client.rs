use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TransformConfig;
use crate::error::{Result, SubflowError};

const CORRECTION_SYSTEM_PROMPT: &str = "You are a professional speech-recognition post-processing assistant. Correct recognition errors so the text reads naturally and stays consistent with its context. Return only the corrected text without any explanation.";

const TRANSLATION_SYSTEM_PROMPT: &str = "You are a professional subtitle translation assistant. You must keep exactly the same line structure as the source text so the subtitle timing stays aligned. Return only the translation without any explanation.";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Client for an OpenAI-compatible chat-completions endpoint, used for both
/// subtitle correction and translation.
pub struct ChatClient {
    client: Client,
    config: TransformConfig,
}

impl ChatClient {
    pub fn new(config: TransformConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(300)) // 5 minute timeout
            .build()
            .expect("HTTP client creation should not fail");

        Self { client, config }
    }

    /// Correct recognition errors in `text`.
    ///
    /// A malformed provider response returns the input unchanged so a flaky
    /// provider cannot fail a whole pipeline run; transport and HTTP errors
    /// still propagate.
    pub async fn correct(
        &self,
        text: &str,
        context_before: &[String],
        context_after: &[String],
    ) -> Result<String> {
        let prompt = build_correction_prompt(text, context_before, context_after);

        match self.send_chat(CORRECTION_SYSTEM_PROMPT, &prompt).await? {
            Some(corrected) => {
                if corrected != text {
                    debug!("Correction changed text:\n{}\n->\n{}", text, corrected);
                }
                Ok(corrected)
            }
            None => {
                warn!("Malformed correction response, keeping original text");
                Ok(text.to_string())
            }
        }
    }

    /// Translate `text` to `target_lang`, asking the provider to preserve the
    /// line structure. Line preservation is advisory; the pipeline's
    /// reassembly step is the mechanical safety net.
    pub async fn translate(
        &self,
        text: &str,
        target_lang: &str,
        context_before: &[String],
        context_after: &[String],
    ) -> Result<String> {
        let prompt = build_translation_prompt(text, target_lang, context_before, context_after);

        match self.send_chat(TRANSLATION_SYSTEM_PROMPT, &prompt).await? {
            Some(translated) => Ok(translated),
            None => Err(SubflowError::Transform(
                "Malformed translation response".to_string(),
            )),
        }
    }

    /// Send one chat exchange. `Ok(None)` means the endpoint answered but the
    /// body was not a usable completion; transport and HTTP-status failures
    /// are errors.
    async fn send_chat(&self, system_prompt: &str, user_prompt: &str) -> Result<Option<String>> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending chat request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SubflowError::Transform(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubflowError::Transform(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(SubflowError::Transform(format!(
                "Chat endpoint error {}: {}",
                status, body
            )));
        }

        match serde_json::from_str::<ChatResponse>(&body) {
            Ok(parsed) => Ok(parsed
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content.trim().to_string())
                .filter(|content| !content.is_empty())),
            Err(e) => {
                debug!("Unparsable chat response ({}): {}", e, body);
                Ok(None)
            }
        }
    }
}

fn build_context_prompt(context_before: &[String], context_after: &[String]) -> String {
    let mut prompt = String::new();
    if !context_before.is_empty() {
        prompt.push_str(&format!("Preceding context:\n{}\n\n", context_before.join("\n")));
    }
    if !context_after.is_empty() {
        prompt.push_str(&format!("Following context:\n{}\n\n", context_after.join("\n")));
    }
    prompt
}

fn build_correction_prompt(
    text: &str,
    context_before: &[String],
    context_after: &[String],
) -> String {
    format!(
        "Correct any speech-recognition errors in the text below. Keep the original meaning and line breaks, and return the text unchanged if it is already correct.\n\n{}Text to correct:\n{}",
        build_context_prompt(context_before, context_after),
        text
    )
}

fn build_translation_prompt(
    text: &str,
    target_lang: &str,
    context_before: &[String],
    context_after: &[String],
) -> String {
    format!(
        "Translate the text below into {}.\n\nRequirements:\n1. Keep exactly the same number of lines as the source; line breaks carry subtitle timing\n2. Keep each line short enough for subtitle display\n3. Preserve the tone and register of the source, including colloquialisms and repetitions\n4. Keep terminology accurate and consistent with the context\n\n{}Text to translate:\n{}",
        target_lang,
        build_context_prompt(context_before, context_after),
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_prompt_includes_context() {
        let before = vec!["earlier line".to_string()];
        let after = vec!["later line".to_string()];
        let prompt = build_correction_prompt("the text", &before, &after);

        assert!(prompt.contains("Preceding context:\nearlier line"));
        assert!(prompt.contains("Following context:\nlater line"));
        assert!(prompt.ends_with("Text to correct:\nthe text"));
    }

    #[test]
    fn test_translation_prompt_names_language() {
        let prompt = build_translation_prompt("line one\nline two", "French", &[], &[]);
        assert!(prompt.contains("into French"));
        assert!(prompt.contains("same number of lines"));
        assert!(prompt.ends_with("Text to translate:\nline one\nline two"));
        assert!(!prompt.contains("Preceding context"));
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":" bonjour \n"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.trim(), "bonjour");
    }
}
