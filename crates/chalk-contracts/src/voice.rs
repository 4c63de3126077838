use std::time::{Duration, Instant};

use thiserror::Error;

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_millis(4500);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(500);
const MAX_SILENT_RESTARTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("speech recognition is not supported on this device")]
    Unsupported,
    #[error("speech recognition failed: {0}")]
    Fault(String),
}

/// Incremental output of the speech-to-text stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Transcript { text: String, is_final: bool },
    NoSpeech,
    Ended,
    Error(CaptureError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum VoiceUpdate {
    Ignored,
    Appended,
    Interim,
    Restarted,
    Stopped(CaptureError),
}

/// Listening flag, transcript buffer and idle clock. The transcript is
/// single-writer (speech callbacks) and single-consumer (`stop`).
#[derive(Debug, Clone, Default)]
pub struct VoiceSession {
    listening: bool,
    transcript: String,
    last_activity: Option<Instant>,
    silent_restarts: u32,
}

impl VoiceSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    pub fn start(&mut self, now: Instant) {
        self.listening = true;
        self.transcript.clear();
        self.last_activity = Some(now);
        self.silent_restarts = 0;
    }

    /// Stops listening and hands the accumulated transcript to the caller.
    pub fn stop(&mut self) -> String {
        self.listening = false;
        self.silent_restarts = 0;
        std::mem::take(&mut self.transcript)
    }

    /// Speech or drawing activity pushes the idle deadline back.
    pub fn touch(&mut self, now: Instant) {
        if self.listening {
            self.last_activity = Some(now);
        }
    }

    pub fn apply(&mut self, event: SpeechEvent, now: Instant) -> VoiceUpdate {
        if !self.listening {
            return VoiceUpdate::Ignored;
        }
        match event {
            SpeechEvent::Transcript { text, is_final } => {
                self.silent_restarts = 0;
                self.last_activity = Some(now);
                if !is_final {
                    return VoiceUpdate::Interim;
                }
                let segment = text.trim();
                if segment.is_empty() {
                    return VoiceUpdate::Ignored;
                }
                if !self.transcript.is_empty() {
                    self.transcript.push(' ');
                }
                self.transcript.push_str(segment);
                VoiceUpdate::Appended
            }
            SpeechEvent::NoSpeech => VoiceUpdate::Ignored,
            SpeechEvent::Ended => {
                self.silent_restarts += 1;
                if self.silent_restarts > MAX_SILENT_RESTARTS {
                    self.stop();
                    return VoiceUpdate::Stopped(CaptureError::Fault(
                        "capture session kept ending without speech".to_string(),
                    ));
                }
                VoiceUpdate::Restarted
            }
            SpeechEvent::Error(err) => {
                self.stop();
                VoiceUpdate::Stopped(err)
            }
        }
    }

    /// True only while listening, with a non-blank transcript, after more
    /// than `threshold` without activity.
    pub fn idle_expired(&self, now: Instant, threshold: Duration) -> bool {
        if !self.listening || self.transcript.trim().is_empty() {
            return false;
        }
        let Some(last) = self.last_activity else {
            return false;
        };
        now.saturating_duration_since(last) > threshold
    }
}
