use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chalk_contracts::canvas::{CanvasProvider, ShapeId, EXPORT_SCALE};
use chalk_contracts::chat::KeyCommand;
use chalk_contracts::events::EventWriter;
use chalk_contracts::geometry::{fit_within, Bounds, Placement};
use chalk_contracts::history::HistoryLog;
use chalk_contracts::suggestion::{CanvasSnapshot, ExportContext, Suggestion, SuggestionContent};
use chalk_contracts::templates::TemplateRegistry;
use chalk_contracts::voice::{CaptureError, SpeechEvent, VoiceSession, VoiceUpdate};
use serde_json::json;

use crate::client::GenerationClient;
use crate::config::ChalkConfig;
use crate::error::GenerationError;
use crate::map_object;

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Requesting {
        seq: u64,
        intent: String,
        context: ExportContext,
    },
    SuggestionPending(Suggestion),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting { .. } => "requesting",
            Self::SuggestionPending(_) => "suggestion_pending",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitSource {
    Manual,
    Key,
    Voice,
    QuickEnhance,
    Template,
}

impl SubmitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Key => "key",
            Self::Voice => "voice",
            Self::QuickEnhance => "quick_enhance",
            Self::Template => "template",
        }
    }
}

/// Work order for one generation request. Its result must come back through
/// [`SessionEvent::GenerationFinished`] with the same `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTicket {
    pub seq: u64,
    pub intent: String,
    pub snapshot: CanvasSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    IntentChanged(String),
    Submit,
    QuickEnhance,
    Template(String),
    Accept,
    Reject,
    Clear,
    SelectHistory(usize),
    Key(KeyCommand),
    StartListening,
    StopListening,
    Speech(SpeechEvent),
    CanvasActivity,
    Tick,
    GenerationFinished {
        seq: u64,
        result: Result<SuggestionContent, GenerationError>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub placed: ShapeId,
    pub removed: Vec<ShapeId>,
    pub placement: Placement,
    pub history_len: usize,
}

/// What the caller should do or show after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    Dispatch(GenerationTicket),
    Busy,
    Refused(GenerationError),
    Ready,
    Failed(GenerationError),
    Stale,
    Merged(MergeReport),
    Rejected,
    Cleared,
    Restored(usize),
    Listening,
    StoppedListening,
    CaptureFailed(CaptureError),
    Notice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub history_limit: usize,
    pub max_intent_chars: usize,
    pub idle_threshold: Duration,
}

impl From<&ChalkConfig> for SessionOptions {
    fn from(config: &ChalkConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            max_intent_chars: config.max_intent_chars,
            idle_threshold: config.idle_threshold,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&ChalkConfig::default())
    }
}

/// Owns all per-session state and applies every transition. Nothing here
/// blocks on the network; callers run tickets and report back.
pub struct Session {
    intent: String,
    phase: Phase,
    history: HistoryLog,
    voice: VoiceSession,
    templates: TemplateRegistry,
    next_seq: u64,
    last_error: Option<GenerationError>,
    options: SessionOptions,
    events: EventWriter,
}

impl Session {
    pub fn new(options: SessionOptions, events: EventWriter) -> Result<Self> {
        let session = Self {
            intent: String::new(),
            phase: Phase::Idle,
            history: HistoryLog::new(options.history_limit),
            voice: VoiceSession::new(),
            templates: TemplateRegistry::default(),
            next_seq: 0,
            last_error: None,
            options,
            events,
        };
        session.emit(
            "session_started",
            json!({
                "history_limit": session.history.limit(),
                "max_intent_chars": session.options.max_intent_chars,
                "idle_threshold_ms": session.options.idle_threshold.as_millis() as u64,
            }),
        )?;
        Ok(session)
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn pending(&self) -> Option<&Suggestion> {
        match &self.phase {
            Phase::SuggestionPending(suggestion) => Some(suggestion),
            _ => None,
        }
    }

    pub fn is_requesting(&self) -> bool {
        matches!(self.phase, Phase::Requesting { .. })
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    pub fn voice(&self) -> &VoiceSession {
        &self.voice
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn last_error(&self) -> Option<&GenerationError> {
        self.last_error.as_ref()
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn handle(
        &mut self,
        event: SessionEvent,
        canvas: &mut dyn CanvasProvider,
        now: Instant,
    ) -> Result<Effect> {
        match event {
            SessionEvent::IntentChanged(text) => {
                self.set_intent(&text, "typed")?;
                Ok(Effect::None)
            }
            SessionEvent::Submit => self.begin_submit(canvas, SubmitSource::Manual),
            SessionEvent::QuickEnhance => {
                let Some(template) = self.templates.quick_enhance().cloned() else {
                    return Ok(Effect::Notice("Quick enhance is not available".to_string()));
                };
                self.set_intent(&template.instruction, "quick_enhance")?;
                self.begin_submit(canvas, SubmitSource::QuickEnhance)
            }
            SessionEvent::Template(key) => {
                let Some(template) = self.templates.get(&key).cloned() else {
                    return Ok(Effect::Notice(format!("Unknown template '{key}'")));
                };
                self.set_intent(&template.instruction, "template")?;
                self.begin_submit(canvas, SubmitSource::Template)
            }
            SessionEvent::Accept => self.accept(canvas),
            SessionEvent::Reject => self.reject(),
            SessionEvent::Clear => self.clear(),
            SessionEvent::SelectHistory(index) => self.select_history(index, canvas),
            SessionEvent::Key(key) => match key {
                KeyCommand::Enter => self.begin_submit(canvas, SubmitSource::Key),
                KeyCommand::Tab => self.accept(canvas),
                KeyCommand::Escape => self.reject(),
            },
            SessionEvent::StartListening => {
                self.voice.start(now);
                self.emit("listening_started", json!({}))?;
                Ok(Effect::Listening)
            }
            SessionEvent::StopListening => {
                if !self.voice.is_listening() {
                    return Ok(Effect::None);
                }
                let transcript = self.voice.stop();
                self.emit(
                    "listening_stopped",
                    json!({ "transcript_chars": transcript.chars().count() }),
                )?;
                if !transcript.trim().is_empty() {
                    self.set_intent(&transcript, "voice")?;
                }
                Ok(Effect::StoppedListening)
            }
            SessionEvent::Speech(speech) => match self.voice.apply(speech, now) {
                VoiceUpdate::Stopped(err) => {
                    self.emit("capture_error", json!({ "error": err.to_string() }))?;
                    Ok(Effect::CaptureFailed(err))
                }
                _ => Ok(Effect::None),
            },
            SessionEvent::CanvasActivity => {
                self.voice.touch(now);
                Ok(Effect::None)
            }
            SessionEvent::Tick => {
                if !self.voice.idle_expired(now, self.options.idle_threshold) {
                    return Ok(Effect::None);
                }
                let transcript = self.voice.stop();
                self.set_intent(&transcript, "voice")?;
                self.emit(
                    "voice_idle_submit",
                    json!({ "idle_threshold_ms": self.options.idle_threshold.as_millis() as u64 }),
                )?;
                self.begin_submit(canvas, SubmitSource::Voice)
            }
            SessionEvent::GenerationFinished { seq, result } => self.complete(seq, result),
        }
    }

    /// Handles `event` and, if it dispatches a request, runs it inline on
    /// `client` and applies the result.
    pub fn drive(
        &mut self,
        event: SessionEvent,
        canvas: &mut dyn CanvasProvider,
        client: &GenerationClient,
        now: Instant,
    ) -> Result<Effect> {
        match self.handle(event, canvas, now)? {
            Effect::Dispatch(ticket) => {
                let result = client.request_suggestion(&ticket.intent, Some(&ticket.snapshot.image));
                self.handle(
                    SessionEvent::GenerationFinished {
                        seq: ticket.seq,
                        result,
                    },
                    canvas,
                    now,
                )
            }
            effect => Ok(effect),
        }
    }

    fn set_intent(&mut self, text: &str, source: &str) -> Result<()> {
        let clamped: String = text
            .trim()
            .chars()
            .take(self.options.max_intent_chars)
            .collect();
        let truncated = clamped.chars().count() < text.trim().chars().count();
        self.intent = clamped;
        self.emit(
            "intent_updated",
            json!({
                "source": source,
                "chars": self.intent.chars().count(),
                "truncated": truncated,
            }),
        )
    }

    /// Validates guards, captures the snapshot and enters Requesting. A pending
    /// suggestion is superseded by the new request.
    pub fn begin_submit(
        &mut self,
        canvas: &mut dyn CanvasProvider,
        source: SubmitSource,
    ) -> Result<Effect> {
        if self.is_requesting() {
            self.emit(
                "submission_rejected",
                json!({ "source": source.as_str(), "reason": "busy" }),
            )?;
            return Ok(Effect::Busy);
        }
        if self.intent.trim().is_empty() {
            return self.refuse(source, GenerationError::MissingIntent);
        }
        let snapshot = match export_snapshot(canvas) {
            Ok(snapshot) => snapshot,
            Err(err) => return self.refuse(source, err),
        };

        self.next_seq += 1;
        let seq = self.next_seq;
        let intent = self.intent.clone();
        self.last_error = None;
        self.phase = Phase::Requesting {
            seq,
            intent: intent.clone(),
            context: snapshot.context.clone(),
        };
        self.emit(
            "suggestion_requested",
            json!({
                "seq": seq,
                "source": source.as_str(),
                "intent": intent,
                "shape_count": snapshot.context.shape_ids.len(),
                "bounds": snapshot.context.bounds,
                "snapshot_bytes": snapshot.image.data_base64.len(),
            }),
        )?;
        Ok(Effect::Dispatch(GenerationTicket {
            seq,
            intent,
            snapshot,
        }))
    }

    fn refuse(&mut self, source: SubmitSource, err: GenerationError) -> Result<Effect> {
        self.emit(
            "submission_rejected",
            json!({
                "source": source.as_str(),
                "reason": err.to_string(),
                "category": err.category().as_str(),
            }),
        )?;
        self.last_error = Some(err.clone());
        Ok(Effect::Refused(err))
    }

    /// Applies a finished request only if it is the one currently awaited.
    pub fn complete(
        &mut self,
        seq: u64,
        result: Result<SuggestionContent, GenerationError>,
    ) -> Result<Effect> {
        let (intent, context) = match &self.phase {
            Phase::Requesting {
                seq: expected,
                intent,
                context,
            } if *expected == seq => (intent.clone(), context.clone()),
            _ => {
                self.emit(
                    "stale_result_discarded",
                    json!({ "seq": seq, "phase": self.phase.name() }),
                )?;
                return Ok(Effect::Stale);
            }
        };

        match result {
            Ok(content) => {
                self.emit(
                    "suggestion_ready",
                    json!({
                        "seq": seq,
                        "kind": content.kind(),
                        "bytes": content.byte_len(),
                    }),
                )?;
                self.phase = Phase::SuggestionPending(Suggestion {
                    intent,
                    content,
                    context,
                });
                Ok(Effect::Ready)
            }
            Err(err) => {
                self.emit(
                    "suggestion_failed",
                    json!({
                        "seq": seq,
                        "error": err.to_string(),
                        "category": err.category().as_str(),
                        "details": err.details(),
                    }),
                )?;
                self.phase = Phase::Idle;
                self.last_error = Some(err.clone());
                Ok(Effect::Failed(err))
            }
        }
    }

    fn accept(&mut self, canvas: &mut dyn CanvasProvider) -> Result<Effect> {
        let Some(suggestion) = self.pending().cloned() else {
            return Ok(Effect::None);
        };
        let (placed, removed, placement) = match merge(&suggestion, canvas) {
            Ok(merged) => merged,
            Err(err) => {
                let err = GenerationError::Canvas(format!("{err:#}"));
                self.emit(
                    "merge_failed",
                    json!({
                        "intent": suggestion.intent,
                        "kind": suggestion.content.kind(),
                        "error": err.to_string(),
                    }),
                )?;
                self.last_error = Some(err.clone());
                return Ok(Effect::Failed(err));
            }
        };

        let entry_id = self
            .history
            .push(&suggestion.intent, suggestion.content)
            .entry_id()
            .to_string();
        self.intent.clear();
        self.phase = Phase::Idle;
        self.emit(
            "suggestion_accepted",
            json!({
                "entry_id": entry_id,
                "placed": placed.0,
                "removed": removed.len(),
                "scale": placement.scale,
                "history_len": self.history.len(),
            }),
        )?;
        Ok(Effect::Merged(MergeReport {
            placed,
            removed,
            placement,
            history_len: self.history.len(),
        }))
    }

    fn reject(&mut self) -> Result<Effect> {
        if self.pending().is_none() {
            return Ok(Effect::None);
        }
        self.phase = Phase::Idle;
        self.emit("suggestion_rejected", json!({ "intent_kept": !self.intent.is_empty() }))?;
        Ok(Effect::Rejected)
    }

    /// Drops intent and any pending or in-flight suggestion. The canvas is
    /// left as it is.
    fn clear(&mut self) -> Result<Effect> {
        let previous = self.phase.name();
        self.phase = Phase::Idle;
        self.intent.clear();
        self.last_error = None;
        self.emit("session_cleared", json!({ "previous_phase": previous }))?;
        Ok(Effect::Cleared)
    }

    fn select_history(&mut self, index: usize, canvas: &mut dyn CanvasProvider) -> Result<Effect> {
        if self.is_requesting() {
            return Ok(Effect::Busy);
        }
        let Some(entry) = self.history.get(index) else {
            return Ok(Effect::Notice(format!("No history entry #{index}")));
        };
        let intent = entry.intent().to_string();
        let content = entry.content().clone();
        let entry_id = entry.entry_id().to_string();

        self.set_intent(&intent, "history")?;
        self.phase = Phase::SuggestionPending(Suggestion {
            intent: self.intent.clone(),
            content,
            context: current_context(canvas),
        });
        self.emit(
            "history_selected",
            json!({ "index": index, "entry_id": entry_id }),
        )?;
        Ok(Effect::Restored(index))
    }

    fn emit(&self, event_type: &str, payload: serde_json::Value) -> Result<()> {
        self.events
            .emit(event_type, map_object(payload))
            .with_context(|| format!("failed to log {event_type}"))?;
        Ok(())
    }
}

/// Selection if any, otherwise the whole page.
pub fn current_context(canvas: &dyn CanvasProvider) -> ExportContext {
    let selected = canvas.selected_shape_ids();
    let shape_ids = if selected.is_empty() {
        canvas.shape_ids()
    } else {
        selected
    };
    ExportContext {
        bounds: canvas.bounds_of(&shape_ids),
        shape_ids,
    }
}

pub fn export_snapshot(canvas: &dyn CanvasProvider) -> Result<CanvasSnapshot, GenerationError> {
    let context = current_context(canvas);
    if context.shape_ids.is_empty() {
        return Err(GenerationError::NothingToExport);
    }
    let image = canvas
        .rasterize(&context.shape_ids, EXPORT_SCALE)
        .map_err(|err| GenerationError::Canvas(format!("{err:#}")))?
        .filter(|image| !image.is_empty())
        .ok_or(GenerationError::NothingToExport)?;
    Ok(CanvasSnapshot { image, context })
}

/// Replaces the exported shapes (or the whole page when none were tracked)
/// with the suggestion, fitted into the exported bounds.
fn merge(
    suggestion: &Suggestion,
    canvas: &mut dyn CanvasProvider,
) -> Result<(ShapeId, Vec<ShapeId>, Placement)> {
    let (width, height) = suggestion
        .content
        .content_size()
        .context("failed to size suggestion")?;
    let asset = canvas.create_asset(&suggestion.content.to_encoded_image(), width, height)?;

    let removed = if suggestion.context.shape_ids.is_empty() {
        canvas.shape_ids()
    } else {
        suggestion.context.shape_ids.clone()
    };
    let target = suggestion
        .context
        .bounds
        .unwrap_or_else(Bounds::default_viewport);

    let placement = fit_within(width, height, &target);
    let placed = canvas.place_image(&asset, placement.bounds)?;
    canvas.delete_shapes(&removed)?;
    Ok((placed, removed, placement))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use std::io::Cursor;

    use chalk_contracts::canvas::{
        AssetId, CanvasListener, CanvasProvider, MemoryCanvas, ShapeId, ShapeKind,
    };
    use chalk_contracts::chat::KeyCommand;
    use chalk_contracts::events::EventWriter;
    use chalk_contracts::geometry::Bounds;
    use chalk_contracts::media::EncodedImage;
    use chalk_contracts::suggestion::{GenerationMode, SuggestionContent};
    use chalk_contracts::voice::SpeechEvent;
    use image::{ImageFormat, RgbImage};

    use super::{Effect, Phase, Session, SessionEvent, SessionOptions};
    use crate::client::tests::{client, text, ScriptedService};
    use crate::error::GenerationError;
    use crate::service::{Attachment, ServiceOutput};

    fn session() -> Session {
        Session::new(SessionOptions::default(), EventWriter::detached("test")).expect("session")
    }

    fn canvas_with_rect() -> MemoryCanvas {
        let mut canvas = MemoryCanvas::new();
        canvas.add_shape(ShapeKind::Rectangle, Bounds::new(100.0, 100.0, 200.0, 100.0));
        canvas
    }

    fn png_output(bytes: Vec<u8>) -> Result<ServiceOutput, GenerationError> {
        Ok(ServiceOutput {
            text: None,
            attachments: vec![Attachment {
                media_type: "image/png".to_string(),
                encoded: None,
                bytes: Some(bytes),
            }],
        })
    }

    fn png(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::new(width, height).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    fn event_types(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect())
    }

    /// Memory canvas whose image placement always fails.
    struct RefusingCanvas(MemoryCanvas);

    impl CanvasProvider for RefusingCanvas {
        fn shape_ids(&self) -> Vec<ShapeId> {
            self.0.shape_ids()
        }
        fn selected_shape_ids(&self) -> Vec<ShapeId> {
            self.0.selected_shape_ids()
        }
        fn bounds_of(&self, ids: &[ShapeId]) -> Option<Bounds> {
            self.0.bounds_of(ids)
        }
        fn rasterize(&self, ids: &[ShapeId], scale: f64) -> anyhow::Result<Option<EncodedImage>> {
            self.0.rasterize(ids, scale)
        }
        fn delete_shapes(&mut self, ids: &[ShapeId]) -> anyhow::Result<()> {
            self.0.delete_shapes(ids)
        }
        fn create_asset(
            &mut self,
            image: &EncodedImage,
            width: f64,
            height: f64,
        ) -> anyhow::Result<AssetId> {
            self.0.create_asset(image, width, height)
        }
        fn place_image(&mut self, _asset: &AssetId, _bounds: Bounds) -> anyhow::Result<ShapeId> {
            anyhow::bail!("page is locked")
        }
        fn subscribe(&mut self, listener: CanvasListener) {
            self.0.subscribe(listener)
        }
    }

    fn spoken(text: &str) -> SessionEvent {
        SessionEvent::Speech(SpeechEvent::Transcript {
            text: text.to_string(),
            is_final: true,
        })
    }

    #[test]
    fn blank_intent_never_reaches_the_service() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![text("<svg></svg>")]);
        let client = client(service.clone(), GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("   ".to_string()), &mut canvas, now)?;
        let effect = session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        assert_eq!(effect, Effect::Refused(GenerationError::MissingIntent));
        assert_eq!(service.calls(), 0);
        assert_eq!(session.phase(), &Phase::Idle);
        Ok(())
    }

    #[test]
    fn empty_canvas_is_nothing_to_export() -> anyhow::Result<()> {
        let mut canvas = MemoryCanvas::new();
        let mut session = session();
        let now = Instant::now();
        session.handle(SessionEvent::IntentChanged("box".to_string()), &mut canvas, now)?;
        let effect = session.handle(SessionEvent::Submit, &mut canvas, now)?;
        assert_eq!(effect, Effect::Refused(GenerationError::NothingToExport));
        assert_eq!(session.intent(), "box");
        Ok(())
    }

    #[test]
    fn label_box_round_trip_merges_and_records_history() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![text(
            "```svg\n<svg viewBox=\"0 0 400 300\"><rect x=\"10\" y=\"10\" width=\"100\" height=\"40\"/></svg>\n```",
        )]);
        let client = client(service, GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let original = canvas.shape_ids();
        let mut session = session();
        let now = Instant::now();

        session.handle(
            SessionEvent::IntentChanged("add a label box".to_string()),
            &mut canvas,
            now,
        )?;
        assert_eq!(session.drive(SessionEvent::Submit, &mut canvas, &client, now)?, Effect::Ready);
        assert!(session.pending().is_some());

        let Effect::Merged(report) = session.handle(SessionEvent::Accept, &mut canvas, now)? else {
            panic!("expected merge");
        };
        assert_eq!(report.removed, original);
        let ids = canvas.shape_ids();
        assert_eq!(ids, vec![report.placed.clone()]);
        let placed = canvas.shape(&report.placed).expect("placed shape");
        assert!(matches!(placed.kind, ShapeKind::Image(_)));

        assert_eq!(session.history().len(), 1);
        assert_eq!(
            session.history().get(0).map(|entry| entry.intent()),
            Some("add a label box")
        );
        assert_eq!(session.intent(), "");
        assert_eq!(session.phase(), &Phase::Idle);
        Ok(())
    }

    #[test]
    fn accepted_content_is_centered_and_never_upscaled() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![
            text("<svg viewBox=\"0 0 400 300\"></svg>"),
            text("<svg viewBox=\"0 0 50 25\"></svg>"),
        ]);
        let client = client(service, GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("shrink".to_string()), &mut canvas, now)?;
        session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        let Effect::Merged(report) = session.handle(SessionEvent::Key(KeyCommand::Tab), &mut canvas, now)? else {
            panic!("expected merge");
        };
        let target = Bounds::new(100.0, 100.0, 200.0, 100.0);
        assert!((report.placement.scale - 1.0 / 3.0).abs() < 1e-9);
        assert!(target.contains(&report.placement.bounds));
        let (cx, cy) = report.placement.bounds.center();
        assert!((cx - 200.0).abs() < 1e-9 && (cy - 150.0).abs() < 1e-9);

        let placed = canvas.shape(&report.placed).expect("placed").bounds;
        session.handle(SessionEvent::IntentChanged("small".to_string()), &mut canvas, now)?;
        session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        let Effect::Merged(report) = session.handle(SessionEvent::Accept, &mut canvas, now)? else {
            panic!("expected merge");
        };
        assert_eq!(report.placement.scale, 1.0);
        assert_eq!(report.placement.bounds.w, 50.0);
        let (nx, ny) = report.placement.bounds.center();
        let (px, py) = placed.center();
        assert!((nx - px).abs() < 1e-9 && (ny - py).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn flat_line_region_still_receives_visible_content() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![text("<svg viewBox=\"0 0 800 600\"></svg>")]);
        let client = client(service, GenerationMode::Markup);
        let mut canvas = MemoryCanvas::new();
        canvas.add_shape(ShapeKind::Line, Bounds::from_corners(0.0, 100.0, 300.0, 100.0));
        let mut session = session();
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("arrow".to_string()), &mut canvas, now)?;
        session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        let Effect::Merged(report) = session.handle(SessionEvent::Accept, &mut canvas, now)? else {
            panic!("expected merge");
        };
        assert!(report.placement.scale > 0.0);
        assert!((report.placement.bounds.w - 300.0).abs() < 1e-9);
        assert!((report.placement.bounds.h - 225.0).abs() < 1e-9);
        let (cx, cy) = report.placement.bounds.center();
        assert!((cx - 150.0).abs() < 1e-9 && (cy - 100.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn image_suggestion_is_fitted_and_recorded() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![png_output(png(400, 200)?)]);
        let client = client(service, GenerationMode::Image);
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("tidy up".to_string()), &mut canvas, now)?;
        assert_eq!(session.drive(SessionEvent::Submit, &mut canvas, &client, now)?, Effect::Ready);
        let Effect::Merged(report) = session.handle(SessionEvent::Accept, &mut canvas, now)? else {
            panic!("expected merge");
        };
        assert_eq!(report.placement.scale, 0.5);
        assert_eq!(report.placement.bounds, Bounds::new(100.0, 100.0, 200.0, 100.0));
        assert_eq!(canvas.shape_ids(), vec![report.placed.clone()]);
        let placed = canvas.shape(&report.placed).expect("placed shape");
        let ShapeKind::Image(asset) = &placed.kind else {
            panic!("expected image shape");
        };
        assert_eq!(canvas.asset_size(asset), Some((400.0, 200.0)));
        assert_eq!(
            session.history().get(0).map(|entry| entry.content().kind()),
            Some("image")
        );
        Ok(())
    }

    #[test]
    fn undecodable_image_keeps_suggestion_pending() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let service = ScriptedService::new(vec![png_output(b"not a png".to_vec())]);
        let client = client(service, GenerationMode::Image);
        let mut canvas = canvas_with_rect();
        let original = canvas.shape_ids();
        let mut session = Session::new(SessionOptions::default(), EventWriter::new(&path, "s-2"))?;
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("tidy up".to_string()), &mut canvas, now)?;
        assert_eq!(session.drive(SessionEvent::Submit, &mut canvas, &client, now)?, Effect::Ready);
        let effect = session.handle(SessionEvent::Accept, &mut canvas, now)?;
        assert!(matches!(effect, Effect::Failed(GenerationError::Canvas(_))));
        assert!(matches!(session.phase(), Phase::SuggestionPending(_)));
        assert!(matches!(session.last_error(), Some(GenerationError::Canvas(_))));
        assert_eq!(canvas.shape_ids(), original);
        assert!(session.history().is_empty());
        assert_eq!(event_types(&path)?.last().map(String::as_str), Some("merge_failed"));
        Ok(())
    }

    #[test]
    fn failed_placement_keeps_original_shapes() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![text("<svg></svg>")]);
        let client = client(service, GenerationMode::Markup);
        let mut canvas = RefusingCanvas(canvas_with_rect());
        let original = canvas.shape_ids();
        let mut session = session();
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("box".to_string()), &mut canvas, now)?;
        session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        let effect = session.handle(SessionEvent::Accept, &mut canvas, now)?;
        assert!(matches!(effect, Effect::Failed(GenerationError::Canvas(_))));
        assert_eq!(canvas.shape_ids(), original);
        assert!(session.pending().is_some());
        Ok(())
    }

    #[test]
    fn reject_keeps_intent_and_clear_empties_it() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![text("<svg></svg>")]);
        let client = client(service, GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("tidy".to_string()), &mut canvas, now)?;
        session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        assert_eq!(
            session.handle(SessionEvent::Key(KeyCommand::Escape), &mut canvas, now)?,
            Effect::Rejected
        );
        assert_eq!(session.intent(), "tidy");
        assert_eq!(session.phase(), &Phase::Idle);
        assert_eq!(canvas.shape_ids().len(), 1);

        assert_eq!(session.handle(SessionEvent::Clear, &mut canvas, now)?, Effect::Cleared);
        assert_eq!(session.intent(), "");
        assert_eq!(session.handle(SessionEvent::Clear, &mut canvas, now)?, Effect::Cleared);
        Ok(())
    }

    #[test]
    fn second_submit_while_requesting_is_busy() -> anyhow::Result<()> {
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();
        session.handle(SessionEvent::IntentChanged("box".to_string()), &mut canvas, now)?;
        assert!(matches!(
            session.handle(SessionEvent::Submit, &mut canvas, now)?,
            Effect::Dispatch(_)
        ));
        assert_eq!(session.handle(SessionEvent::Key(KeyCommand::Enter), &mut canvas, now)?, Effect::Busy);
        Ok(())
    }

    #[test]
    fn results_for_abandoned_requests_are_discarded() -> anyhow::Result<()> {
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();

        session.handle(SessionEvent::IntentChanged("first".to_string()), &mut canvas, now)?;
        let Effect::Dispatch(first) = session.handle(SessionEvent::Submit, &mut canvas, now)? else {
            panic!("expected dispatch");
        };
        session.handle(SessionEvent::Clear, &mut canvas, now)?;
        session.handle(SessionEvent::IntentChanged("second".to_string()), &mut canvas, now)?;
        let Effect::Dispatch(second) = session.handle(SessionEvent::Submit, &mut canvas, now)? else {
            panic!("expected dispatch");
        };
        assert!(second.seq > first.seq);

        let finished = |seq| SessionEvent::GenerationFinished {
            seq,
            result: Ok(SuggestionContent::markup("<svg></svg>")),
        };
        assert_eq!(session.handle(finished(first.seq), &mut canvas, now)?, Effect::Stale);
        assert!(session.is_requesting());
        assert_eq!(session.handle(finished(second.seq), &mut canvas, now)?, Effect::Ready);
        assert_eq!(session.pending().map(|s| s.intent.as_str()), Some("second"));
        Ok(())
    }

    #[test]
    fn upstream_failure_returns_to_idle_with_intent() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![Err(GenerationError::Authentication(
            "API key not valid".to_string(),
        ))]);
        let client = client(service, GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();
        session.handle(SessionEvent::IntentChanged("box".to_string()), &mut canvas, now)?;
        let effect = session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        assert!(matches!(effect, Effect::Failed(GenerationError::Authentication(_))));
        assert_eq!(session.phase(), &Phase::Idle);
        assert_eq!(session.intent(), "box");
        assert!(session.last_error().is_some());
        Ok(())
    }

    #[test]
    fn history_is_bounded_on_accept() -> anyhow::Result<()> {
        let service = ScriptedService::new(
            (0..3).map(|_| text("<svg></svg>")).collect(),
        );
        let client = client(service, GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let options = SessionOptions {
            history_limit: 2,
            ..SessionOptions::default()
        };
        let mut session = Session::new(options, EventWriter::detached("test"))?;
        let now = Instant::now();

        for (round, expected) in [1usize, 2, 2].into_iter().enumerate() {
            session.handle(SessionEvent::IntentChanged(format!("round {round}")), &mut canvas, now)?;
            session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
            session.handle(SessionEvent::Accept, &mut canvas, now)?;
            assert_eq!(session.history().len(), expected);
        }
        assert_eq!(session.history().get(0).map(|e| e.intent()), Some("round 2"));
        Ok(())
    }

    #[test]
    fn selecting_history_restores_a_pending_suggestion() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![text("<svg></svg>")]);
        let client = client(service.clone(), GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();
        session.handle(SessionEvent::IntentChanged("boxes".to_string()), &mut canvas, now)?;
        session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        session.handle(SessionEvent::Accept, &mut canvas, now)?;

        assert_eq!(
            session.handle(SessionEvent::SelectHistory(0), &mut canvas, now)?,
            Effect::Restored(0)
        );
        assert_eq!(session.intent(), "boxes");
        let pending = session.pending().expect("pending");
        assert_eq!(pending.context.shape_ids, canvas.shape_ids());
        assert_eq!(service.calls(), 1);
        assert!(matches!(
            session.handle(SessionEvent::SelectHistory(7), &mut canvas, now)?,
            Effect::Notice(_)
        ));
        Ok(())
    }

    #[test]
    fn idle_voice_submits_only_with_transcript_after_threshold() -> anyhow::Result<()> {
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let start = Instant::now();

        assert_eq!(session.handle(SessionEvent::Tick, &mut canvas, start + Duration::from_secs(60))?, Effect::None);

        session.handle(SessionEvent::StartListening, &mut canvas, start)?;
        assert_eq!(session.handle(SessionEvent::Tick, &mut canvas, start + Duration::from_secs(10))?, Effect::None);

        session.handle(spoken("draw a box"), &mut canvas, start + Duration::from_secs(10))?;
        session.handle(
            SessionEvent::CanvasActivity,
            &mut canvas,
            start + Duration::from_secs(12),
        )?;
        assert_eq!(
            session.handle(SessionEvent::Tick, &mut canvas, start + Duration::from_secs(16))?,
            Effect::None
        );
        let effect = session.handle(SessionEvent::Tick, &mut canvas, start + Duration::from_secs(17))?;
        let Effect::Dispatch(ticket) = effect else {
            panic!("expected dispatch, got {effect:?}");
        };
        assert_eq!(ticket.intent, "draw a box");
        assert!(!session.voice().is_listening());
        assert_eq!(session.voice().transcript(), "");
        Ok(())
    }

    #[test]
    fn manual_stop_fills_intent_without_submitting() -> anyhow::Result<()> {
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();
        session.handle(SessionEvent::StartListening, &mut canvas, now)?;
        session.handle(spoken("connect the boxes"), &mut canvas, now)?;
        assert_eq!(
            session.handle(SessionEvent::StopListening, &mut canvas, now)?,
            Effect::StoppedListening
        );
        assert_eq!(session.intent(), "connect the boxes");
        assert_eq!(session.phase(), &Phase::Idle);
        Ok(())
    }

    #[test]
    fn intent_is_clamped_by_characters() -> anyhow::Result<()> {
        let mut canvas = MemoryCanvas::new();
        let mut session = session();
        let long = "é".repeat(200);
        session.handle(SessionEvent::IntentChanged(long), &mut canvas, Instant::now())?;
        assert_eq!(session.intent().chars().count(), 120);
        Ok(())
    }

    #[test]
    fn template_submission_uses_template_text() -> anyhow::Result<()> {
        let service = ScriptedService::new(vec![text("<svg></svg>")]);
        let client = client(service.clone(), GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let mut session = session();
        let now = Instant::now();
        session.drive(SessionEvent::Template("flowchart".to_string()), &mut canvas, &client, now)?;
        let seen = service.seen.lock().expect("seen").clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].intent.contains("flowchart"));
        assert!(matches!(
            session.handle(SessionEvent::Template("nope".to_string()), &mut canvas, now)?,
            Effect::Notice(_)
        ));
        Ok(())
    }

    #[test]
    fn transitions_are_logged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let service = ScriptedService::new(vec![text("<svg></svg>")]);
        let client = client(service, GenerationMode::Markup);
        let mut canvas = canvas_with_rect();
        let mut session = Session::new(SessionOptions::default(), EventWriter::new(&path, "s-1"))?;
        let now = Instant::now();
        session.handle(SessionEvent::IntentChanged("box".to_string()), &mut canvas, now)?;
        session.drive(SessionEvent::Submit, &mut canvas, &client, now)?;
        session.handle(SessionEvent::Accept, &mut canvas, now)?;

        assert_eq!(
            event_types(&path)?,
            vec![
                "session_started",
                "intent_updated",
                "suggestion_requested",
                "suggestion_ready",
                "suggestion_accepted"
            ]
        );
        Ok(())
    }
}
