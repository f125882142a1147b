//! Confab Whisper crate - speech-to-text for voice input.
//!
//! Provides a trait-based abstraction for transcription, a remote
//! implementation that uploads audio to an OpenAI-compatible
//! `/audio/transcriptions` endpoint, and a deterministic stand-in used when
//! no credential is configured.

pub mod remote;

use std::future::Future;

use confab_core::config::VoiceConfig;
use confab_core::error::ConfabError;

pub use remote::RemoteWhisperService;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the transcription engine.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Base URL of the OpenAI-compatible API (e.g. `https://api.openai.com/v1`).
    pub endpoint: String,
    /// Credential for the endpoint.
    pub api_key: String,
    /// Remote model name (e.g. "whisper-1").
    pub model: String,
    /// Language code for transcription (e.g., "en", "auto").
    pub language: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "whisper-1".to_string(),
            language: "en".to_string(),
        }
    }
}

// =============================================================================
// Result types
// =============================================================================

/// A single time-aligned segment within a transcription.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Start time in seconds from the beginning of the audio.
    pub start: f32,
    /// End time in seconds from the beginning of the audio.
    pub end: f32,
    /// Transcribed text for this segment.
    pub text: String,
}

/// The complete result of a transcription operation.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    /// Full transcribed text.
    pub text: String,
    /// Time-aligned segments, when the provider reports them.
    pub segments: Vec<Segment>,
    /// Detected or specified language.
    pub language: String,
    /// Total audio duration in seconds.
    pub duration_secs: f32,
}

// =============================================================================
// Trait
// =============================================================================

/// Service for transcribing audio data to text.
pub trait TranscriptionService: Send + Sync {
    /// Transcribe mono PCM samples in [-1.0, 1.0] recorded at `sample_rate` Hz.
    fn transcribe(
        &self,
        audio_data: &[f32],
        sample_rate: u32,
    ) -> impl Future<Output = Result<TranscriptionResult, ConfabError>> + Send;
}

fn validate_audio(audio_data: &[f32], sample_rate: u32) -> Result<f32, ConfabError> {
    if audio_data.is_empty() {
        return Err(ConfabError::Transcription(
            "Cannot transcribe empty audio data".to_string(),
        ));
    }
    if sample_rate == 0 {
        return Err(ConfabError::Transcription(
            "Sample rate must be greater than 0".to_string(),
        ));
    }
    Ok(audio_data.len() as f32 / sample_rate as f32)
}

// =============================================================================
// Stand-in implementation
// =============================================================================

/// Transcription service that returns a fixed text for any audio, including
/// none at all.
///
/// Selected when no transcription credential is available, so voice input
/// keeps working end to end in development and tests.
#[derive(Debug, Clone)]
pub struct StandInTranscriptionService {
    text: String,
}

impl StandInTranscriptionService {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl Default for StandInTranscriptionService {
    fn default() -> Self {
        Self::new("[voice input]")
    }
}

impl TranscriptionService for StandInTranscriptionService {
    async fn transcribe(
        &self,
        audio_data: &[f32],
        sample_rate: u32,
    ) -> Result<TranscriptionResult, ConfabError> {
        // No audio is fine here: the stand-in answers the same either way.
        if sample_rate == 0 {
            return Err(ConfabError::Transcription(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        let duration_secs = audio_data.len() as f32 / sample_rate as f32;

        tracing::debug!(duration_secs, sample_rate, "Stand-in transcription generated");

        Ok(TranscriptionResult {
            text: self.text.clone(),
            segments: vec![Segment {
                start: 0.0,
                end: duration_secs,
                text: self.text.clone(),
            }],
            language: "en".to_string(),
            duration_secs,
        })
    }
}

// =============================================================================
// Provider selection
// =============================================================================

/// The transcription provider chosen at startup.
#[derive(Debug, Clone)]
pub enum Transcriber {
    Remote(RemoteWhisperService),
    StandIn(StandInTranscriptionService),
}

impl Transcriber {
    /// Pick a provider from the voice settings.
    ///
    /// `provider = "auto"` uses the remote service when `api_key` is present
    /// and the stand-in otherwise. `"live"` without a key is a config error.
    pub fn from_config(
        voice: &VoiceConfig,
        endpoint: &str,
        api_key: Option<&str>,
    ) -> Result<Self, ConfabError> {
        let remote = |key: &str| {
            Transcriber::Remote(RemoteWhisperService::new(WhisperConfig {
                endpoint: endpoint.to_string(),
                api_key: key.to_string(),
                model: voice.whisper_model.clone(),
                language: voice.language.clone(),
            }))
        };

        match (voice.provider.as_str(), api_key) {
            ("stand_in", _) | ("auto", None) => {
                tracing::info!("Using stand-in transcription");
                Ok(Transcriber::StandIn(StandInTranscriptionService::new(
                    voice.stand_in_text.clone(),
                )))
            }
            ("live", Some(key)) | ("auto", Some(key)) => {
                tracing::info!(model = %voice.whisper_model, "Using remote transcription");
                Ok(remote(key))
            }
            ("live", None) => Err(ConfabError::Config(
                "voice.provider = \"live\" requires an OpenAI API key".to_string(),
            )),
            (other, _) => Err(ConfabError::Config(format!(
                "Unknown voice provider: {}",
                other
            ))),
        }
    }

    pub fn is_stand_in(&self) -> bool {
        matches!(self, Transcriber::StandIn(_))
    }
}

impl TranscriptionService for Transcriber {
    async fn transcribe(
        &self,
        audio_data: &[f32],
        sample_rate: u32,
    ) -> Result<TranscriptionResult, ConfabError> {
        match self {
            Transcriber::Remote(service) => service.transcribe(audio_data, sample_rate).await,
            Transcriber::StandIn(service) => service.transcribe(audio_data, sample_rate).await,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
