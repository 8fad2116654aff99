//! Transcription provider client
//!
//! OpenAI-compatible `/audio/transcriptions` endpoint: multipart upload with
//! `file` and `model` fields, JSON response `{ "text": ... }`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::PipelineError;
use crate::config::PipelineConfig;

/// Turns an audio file into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio at `audio_path`. `job_id` is used for log correlation.
    async fn transcribe(&self, audio_path: &Path, job_id: &str) -> Result<String, PipelineError>;
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// HTTP client for the transcription provider
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranscriber {
    /// Build a client from pipeline configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config
                .api_key
                .as_ref()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            model: config.model.clone(),
        })
    }

    /// Endpoint requests are sent to
    pub fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// MIME type sent for a cached file, by extension
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.to_lowercase().as_str() {
        "ogg" | "oga" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "mp3" | "mpeg" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio_path: &Path, job_id: &str) -> Result<String, PipelineError> {
        let audio = tokio::fs::read(audio_path).await?;
        let extension = audio_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_name = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());

        debug!(job = job_id, bytes = audio.len(), "Sending transcription request to {}", self.api_url);

        let part = Part::bytes(audio)
            .file_name(file_name)
            .mime_str(mime_for_extension(&extension))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let mut request = self.client.post(&self.api_url).multipart(form);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PipelineError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let body: TranscriptionResponse = response.json().await?;
        info!(job = job_id, chars = body.text.len(), "Transcription received");
        Ok(body.text)
    }
}
