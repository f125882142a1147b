//! Remote Whisper transcription over an OpenAI-compatible HTTP API.
//!
//! Samples are encoded as 16-bit PCM WAV in memory and uploaded as a
//! multipart form to `{endpoint}/audio/transcriptions`.

use serde::Deserialize;

use confab_core::error::ConfabError;

use crate::{validate_audio, Segment, TranscriptionResult, TranscriptionService, WhisperConfig};

/// Transcription service backed by a remote Whisper endpoint.
#[derive(Debug, Clone)]
pub struct RemoteWhisperService {
    client: reqwest::Client,
    config: WhisperConfig,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f32,
    end: f32,
    text: String,
}

impl RemoteWhisperService {
    pub fn new(config: WhisperConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.config.endpoint.trim_end_matches('/')
        )
    }
}

impl TranscriptionService for RemoteWhisperService {
    async fn transcribe(
        &self,
        audio_data: &[f32],
        sample_rate: u32,
    ) -> Result<TranscriptionResult, ConfabError> {
        let duration_secs = validate_audio(audio_data, sample_rate)?;
        let wav = encode_wav(audio_data, sample_rate);

        tracing::debug!(
            bytes = wav.len(),
            duration_secs,
            model = %self.config.model,
            "Uploading audio for transcription"
        );

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ConfabError::Transcription(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");
        if self.config.language != "auto" {
            form = form.text("language", self.config.language.clone());
        }

        let response = self
            .client
            .post(self.url())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ConfabError::Transcription(format!("Upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConfabError::Transcription(format!(
                "Transcription endpoint returned {}: {}",
                status, body
            )));
        }

        let parsed: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| ConfabError::Transcription(format!("Invalid response: {}", e)))?;

        tracing::info!(text_len = parsed.text.len(), "Transcription complete");

        Ok(TranscriptionResult {
            text: parsed.text.trim().to_string(),
            segments: parsed
                .segments
                .into_iter()
                .map(|s| Segment {
                    start: s.start,
                    end: s.end,
                    text: s.text.trim().to_string(),
                })
                .collect(),
            language: parsed
                .language
                .unwrap_or_else(|| self.config.language.clone()),
            duration_secs,
        })
    }
}

// ---------------------------------------------------------------------------
// WAV encoding
// ---------------------------------------------------------------------------

/// Encode mono f32 samples as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;

    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_len = (samples.len() * block_align as usize) as u32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
