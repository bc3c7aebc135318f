use async_trait::async_trait;
use base64::Engine;
use labelscan::UserProfile;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::config::VisionConfig;

/// What the user sees in place of an analysis when the vision call fails.
pub const ANALYSIS_UNAVAILABLE: &str = "Sorry, I couldn't analyze the image at this time.";

#[derive(thiserror::Error, Debug)]
pub enum AnalysisError {
    #[error("OpenAI API key is not configured")]
    MissingCredentials,
    #[error("Vision request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Vision API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Vision API returned no content")]
    EmptyResponse,
}

impl AnalysisError {
    /// Every failure looks the same to the user; the detail goes to the logs.
    pub fn user_message(&self) -> &'static str {
        ANALYSIS_UNAVAILABLE
    }
}

/// The analysis instruction, with a `{user_context}` slot for the profile.
pub const PROMPT_TEMPLATE: &str = include_str!("../prompts/analyze-label.md");

/// Something that can look at a food photo and describe it for a given user.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Returns the model's raw text, which should be a JSON object but isn't guaranteed to be.
    async fn analyze(&self, image: &[u8], profile: &UserProfile) -> Result<String, AnalysisError>;
}

/// Build the single instruction sent along with the image.
pub fn build_prompt(profile: &UserProfile) -> String {
    let or_none = |field: &Option<String>| {
        field
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or("None")
            .to_string()
    };
    let user_context = format!(
        "Allergies: {}\nChronic Conditions: {}\nDietary Preferences: {}\nMedications: {}\n",
        or_none(&profile.formatted_allergies()),
        or_none(&profile.chronic_conditions),
        or_none(&profile.dietary_preferences),
        or_none(&profile.medications),
    );
    PROMPT_TEMPLATE.replace("{user_context}", &user_context)
}

/// Wrap raw image bytes as a data URL, sniffing the format from the bytes.
pub fn to_data_url(image: &[u8]) -> String {
    let mime = image::guess_format(image)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/jpeg");
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(image)
    )
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// An OpenAI-compatible chat completions endpoint with image input.
pub struct OpenAiVision {
    http: Client,
    config: VisionConfig,
}

impl OpenAiVision {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl VisionAnalyzer for OpenAiVision {
    async fn analyze(&self, image: &[u8], profile: &UserProfile) -> Result<String, AnalysisError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            tracing::error!("OpenAI API key is missing.");
            return Err(AnalysisError::MissingCredentials);
        };
        let prompt = build_prompt(profile);
        tracing::debug!("Prompt: {}", prompt);
        let body = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": to_data_url(image) } },
                ],
            }],
            "max_tokens": self.config.max_tokens,
            "response_format": { "type": "json_object" },
        });
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        tracing::info!(model = %self.config.model, bytes = image.len(), "Analyzing image ..");
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .inspect_err(|e| tracing::error!("OpenAI Vision request error: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("OpenAI Vision error: {} - {}", status, body);
            return Err(AnalysisError::Status { status, body });
        }
        let completion: ChatCompletion = response.json().await?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(AnalysisError::EmptyResponse)?;
        tracing::debug!("OpenAI response: {}", text);
        Ok(text)
    }
}
