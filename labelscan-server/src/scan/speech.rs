use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::config::SpeechConfig;

#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("ElevenLabs credentials missing")]
    MissingCredentials,
    #[error("Speech request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Speech API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}

/// Turns narration text into audio bytes (mp3).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

#[derive(Serialize)]
struct ElevenLabsBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: ElevenLabsVoiceSettings,
}

#[derive(Serialize)]
struct ElevenLabsVoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

pub struct ElevenLabsSpeech {
    http: Client,
    config: SpeechConfig,
}

impl ElevenLabsSpeech {
    pub fn new(config: SpeechConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let (Some(api_key), Some(voice_id)) =
            (self.config.api_key.as_deref(), self.config.voice_id.as_deref())
        else {
            tracing::error!("ElevenLabs credentials missing.");
            return Err(SynthesisError::MissingCredentials);
        };
        let url = format!(
            "{}/v1/text-to-speech/{}",
            self.config.base_url.trim_end_matches('/'),
            voice_id
        );
        let body = ElevenLabsBody {
            text,
            model_id: &self.config.model_id,
            voice_settings: ElevenLabsVoiceSettings {
                stability: self.config.stability,
                similarity_boost: self.config.similarity_boost,
            },
        };
        tracing::info!(voice_id, chars = text.len(), "Synthesizing narration ..");
        let response = self
            .http
            .post(url)
            .header("Accept", "audio/mpeg")
            .header("xi-api-key", api_key)
            .json(&body)
            .send()
            .await
            .inspect_err(|e| tracing::error!("ElevenLabs request error: {}", e))?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("ElevenLabs error: {} - {}", status, body);
            return Err(SynthesisError::Status { status, body });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn needs_both_key_and_voice() {
        for (api_key, voice_id) in [(Some("key"), None), (None, Some("voice")), (None, None)] {
            let speech = ElevenLabsSpeech::new(SpeechConfig {
                base_url: "http://127.0.0.1:9".into(),
                api_key: api_key.map(Into::into),
                voice_id: voice_id.map(Into::into),
                ..Default::default()
            });
            let err = speech.synthesize("hello").await.unwrap_err();
            assert!(matches!(err, SynthesisError::MissingCredentials));
        }
    }
}
