//! Voice input: recording state and transcription hand-off.
//!
//! Enforces the recording lifecycle:
//! - Idle -> Recording (start recording)
//! - Recording -> Transcribing (stop recording, audio sent for transcription)
//! - Transcribing -> Idle (transcript ready or transcription failed)
//! - Recording -> Idle (recording discarded)

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use confab_core::types::Transcript;
use confab_whisper::{Transcriber, TranscriptionService};

use crate::error::ChatError;

/// Recording state of the voice input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceState {
    Idle,
    Recording,
    Transcribing,
}

impl fmt::Display for VoiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceState::Idle => write!(f, "Idle"),
            VoiceState::Recording => write!(f, "Recording"),
            VoiceState::Transcribing => write!(f, "Transcribing"),
        }
    }
}

impl VoiceState {
    /// Returns whether a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &VoiceState) -> bool {
        matches!(
            (self, target),
            (VoiceState::Idle, VoiceState::Recording)
                | (VoiceState::Recording, VoiceState::Transcribing)
                | (VoiceState::Transcribing, VoiceState::Idle)
                | (VoiceState::Recording, VoiceState::Idle)
        )
    }
}

/// Observable voice flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceStatus {
    pub recording: bool,
    pub transcribing: bool,
}

#[derive(Debug)]
struct Recording {
    state: VoiceState,
    samples: Vec<f32>,
}

/// Voice input backed by the transcription provider chosen at startup.
#[derive(Debug)]
pub struct VoiceInput {
    transcriber: Transcriber,
    sample_rate: u32,
    recording: Mutex<Recording>,
}

impl VoiceInput {
    pub fn new(transcriber: Transcriber, sample_rate: u32) -> Self {
        Self {
            transcriber,
            sample_rate,
            recording: Mutex::new(Recording {
                state: VoiceState::Idle,
                samples: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Recording>, ChatError> {
        self.recording
            .lock()
            .map_err(|e| ChatError::Voice(format!("recording mutex poisoned: {}", e)))
    }

    fn transition(recording: &mut Recording, target: VoiceState) -> Result<(), ChatError> {
        if recording.state.can_transition_to(&target) {
            tracing::debug!("Voice state: {} -> {}", recording.state, target);
            recording.state = target;
            Ok(())
        } else {
            Err(ChatError::Voice(format!(
                "Invalid state transition: {} -> {}",
                recording.state, target
            )))
        }
    }

    pub fn state(&self) -> Result<VoiceState, ChatError> {
        Ok(self.lock()?.state)
    }

    pub fn status(&self) -> Result<VoiceStatus, ChatError> {
        let state = self.state()?;
        Ok(VoiceStatus {
            recording: state == VoiceState::Recording,
            transcribing: state == VoiceState::Transcribing,
        })
    }

    /// Begin a new recording with an empty buffer.
    pub fn start_recording(&self) -> Result<(), ChatError> {
        let mut recording = self.lock()?;
        Self::transition(&mut recording, VoiceState::Recording)?;
        recording.samples.clear();
        tracing::info!("Recording started");
        Ok(())
    }

    /// Append PCM samples to the active recording.
    pub fn push_audio(&self, samples: &[f32]) -> Result<(), ChatError> {
        let mut recording = self.lock()?;
        if recording.state != VoiceState::Recording {
            return Err(ChatError::Voice(format!(
                "Cannot push audio in state {}",
                recording.state
            )));
        }
        recording.samples.extend_from_slice(samples);
        Ok(())
    }

    /// Stop recording and transcribe what was captured.
    ///
    /// Returns `None` when the transcription came back empty. The state is
    /// back to Idle when this returns, whether or not transcription worked.
    pub async fn stop_recording(&self) -> Result<Option<Transcript>, ChatError> {
        let samples = {
            let mut recording = self.lock()?;
            Self::transition(&mut recording, VoiceState::Transcribing)?;
            std::mem::take(&mut recording.samples)
        };

        tracing::debug!(samples = samples.len(), "Transcribing recording");
        let result = self.transcriber.transcribe(&samples, self.sample_rate).await;

        {
            let mut recording = self.lock()?;
            Self::transition(&mut recording, VoiceState::Idle)?;
        }

        let text = result?.text.trim().to_string();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Transcript { text }))
        }
    }

    /// Drop the active recording without transcribing it. No-op when idle.
    pub fn discard(&self) -> Result<bool, ChatError> {
        let mut recording = self.lock()?;
        if recording.state != VoiceState::Recording {
            return Ok(false);
        }
        Self::transition(&mut recording, VoiceState::Idle)?;
        recording.samples.clear();
        tracing::info!("Recording discarded");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_whisper::{RemoteWhisperService, StandInTranscriptionService, WhisperConfig};

    fn stand_in(text: &str) -> VoiceInput {
        VoiceInput::new(
            Transcriber::StandIn(StandInTranscriptionService::new(text)),
            16_000,
        )
    }

    #[test]
    fn test_state_transitions() {
        assert!(VoiceState::Idle.can_transition_to(&VoiceState::Recording));
        assert!(VoiceState::Recording.can_transition_to(&VoiceState::Transcribing));
        assert!(VoiceState::Transcribing.can_transition_to(&VoiceState::Idle));
        assert!(VoiceState::Recording.can_transition_to(&VoiceState::Idle));
        assert!(!VoiceState::Idle.can_transition_to(&VoiceState::Transcribing));
        assert!(!VoiceState::Transcribing.can_transition_to(&VoiceState::Recording));
    }

    #[tokio::test]
    async fn test_record_and_transcribe() {
        let voice = stand_in("turn on the lights");
        voice.start_recording().unwrap();
        assert_eq!(
            voice.status().unwrap(),
            VoiceStatus {
                recording: true,
                transcribing: false
            }
        );
        voice.push_audio(&[0.1; 1600]).unwrap();

        let transcript = voice.stop_recording().await.unwrap().unwrap();
        assert_eq!(transcript.text, "turn on the lights");
        assert_eq!(voice.state().unwrap(), VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_stop_without_start_fails() {
        let voice = stand_in("x");
        let result = voice.stop_recording().await;
        assert!(matches!(result, Err(ChatError::Voice(_))));
    }

    #[test]
    fn test_double_start_fails() {
        let voice = stand_in("x");
        voice.start_recording().unwrap();
        assert!(voice.start_recording().is_err());
    }

    #[test]
    fn test_push_audio_when_idle_fails() {
        let voice = stand_in("x");
        assert!(voice.push_audio(&[0.0; 10]).is_err());
    }

    #[tokio::test]
    async fn test_blank_transcript_is_none() {
        let voice = stand_in("   ");
        voice.start_recording().unwrap();
        assert!(voice.stop_recording().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_transcription_returns_to_idle() {
        // Remote service rejects empty audio before any network call.
        let voice = VoiceInput::new(
            Transcriber::Remote(RemoteWhisperService::new(WhisperConfig::default())),
            16_000,
        );
        voice.start_recording().unwrap();
        let result = voice.stop_recording().await;
        assert!(matches!(result, Err(ChatError::Voice(_))));
        assert_eq!(voice.state().unwrap(), VoiceState::Idle);
        voice.start_recording().unwrap();
    }

    #[test]
    fn test_discard() {
        let voice = stand_in("x");
        assert!(!voice.discard().unwrap());
        voice.start_recording().unwrap();
        voice.push_audio(&[0.0; 10]).unwrap();
        assert!(voice.discard().unwrap());
        assert_eq!(voice.state().unwrap(), VoiceState::Idle);
    }
}
