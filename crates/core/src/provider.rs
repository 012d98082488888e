use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart;
use tracing::debug;

use crate::{
    capabilities::{BlobStore, TranscriptionService},
    error::TranscriptionError,
    types::StorageRef,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TranscriptionProvider {
    #[default]
    OpenAi,
    Groq,
}

pub struct ProviderConfig {
    pub api_url: &'static str,
    pub model: &'static str,
    pub env_var: &'static str,
}

impl TranscriptionProvider {
    pub fn config(&self) -> ProviderConfig {
        match self {
            TranscriptionProvider::OpenAi => ProviderConfig {
                api_url: "https://api.openai.com/v1/audio/transcriptions",
                model: "whisper-1",
                env_var: "OPENAI_API_KEY",
            },
            TranscriptionProvider::Groq => ProviderConfig {
                api_url: "https://api.groq.com/openai/v1/audio/transcriptions",
                model: "whisper-large-v3",
                env_var: "GROQ_API_KEY",
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TranscriptionProvider::OpenAi => "OpenAI",
            TranscriptionProvider::Groq => "Groq",
        }
    }

    /// Validate that the API key is set for this provider
    pub fn validate_api_key(&self) -> Result<String, TranscriptionError> {
        let config = self.config();
        std::env::var(config.env_var).map_err(|_| TranscriptionError::MissingApiKey {
            env_var: config.env_var.to_string(),
        })
    }
}

/// Pulls the transcript text out of an OpenAI-compatible JSON response.
pub fn parse_transcription_response(body: &serde_json::Value) -> Result<String, TranscriptionError> {
    body["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| TranscriptionError::InvalidResponse(format!("no text field in {body}")))
}

/// OpenAI-compatible `audio/transcriptions` client. Reads chunk bytes back
/// from the blob store and uploads them as a multipart form.
pub struct HttpTranscriptionService {
    client: reqwest::Client,
    provider: TranscriptionProvider,
    api_key: String,
    store: Arc<dyn BlobStore>,
}

impl HttpTranscriptionService {
    pub fn new(
        provider: TranscriptionProvider,
        store: Arc<dyn BlobStore>,
    ) -> Result<Self, TranscriptionError> {
        let api_key = provider.validate_api_key()?;
        Ok(Self {
            client: reqwest::Client::new(),
            provider,
            api_key,
            store,
        })
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn transcribe(&self, storage_ref: &StorageRef) -> Result<String, TranscriptionError> {
        let config = self.provider.config();
        let bytes = self.store.get(storage_ref).await?;
        let file_name = storage_ref
            .as_str()
            .rsplit('/')
            .next()
            .unwrap_or("chunk")
            .to_string();

        debug!(provider = self.provider.name(), chunk = %storage_ref, bytes = bytes.len(), "sending chunk");

        let form = multipart::Form::new()
            .text("model", config.model)
            .text("response_format", "json")
            .part("file", multipart::Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(config.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Rejected {
                status: status.as_u16(),
                reason,
            });
        }

        let body = response.json::<serde_json::Value>().await?;
        parse_transcription_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_text_field() {
        let body = json!({ "text": "hello there" });
        assert_eq!(parse_transcription_response(&body).unwrap(), "hello there");
    }

    #[test]
    fn missing_text_is_invalid() {
        let body = json!({ "error": { "message": "bad audio" } });
        assert!(matches!(
            parse_transcription_response(&body),
            Err(TranscriptionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn providers_read_their_own_key() {
        assert_eq!(TranscriptionProvider::OpenAi.config().env_var, "OPENAI_API_KEY");
        assert_eq!(TranscriptionProvider::Groq.config().env_var, "GROQ_API_KEY");
    }
}
