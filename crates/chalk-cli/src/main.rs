use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chalk_contracts::canvas::{
    CanvasChange, CanvasProvider, MemoryCanvas, ShapeKind, EXPORT_SCALE,
};
use chalk_contracts::chat::{parse_command, ChatCommand, DrawSpec, CHAT_HELP_COMMANDS};
use chalk_contracts::events::EventWriter;
use chalk_contracts::media::{EncodedImage, PNG_MIME, SVG_MIME};
use chalk_contracts::suggestion::{GenerationMode, SuggestionContent};
use chalk_contracts::voice::SpeechEvent;
use chalk_engine::relay::{self, RelayRequest, RelayResponse};
use chalk_engine::{
    export_snapshot, ChalkConfig, Effect, ErrorCategory, GenerationClient, GenerationError,
    GenerationTicket, Phase, Session, SessionEvent, SessionOptions,
};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "chalkai", version, about = "ChalkAI sketch refinement CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive whiteboard session.
    Chat(ChatArgs),
    /// One-shot generation with relay-style JSON output.
    Run(RunArgs),
}

#[derive(Debug, Args)]
struct ServiceArgs {
    /// gemini, relay or dryrun.
    #[arg(long)]
    service: Option<String>,
    /// markup or image.
    #[arg(long)]
    mode: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    relay_url: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    intent: Option<String>,
    #[arg(long)]
    image: Option<PathBuf>,
    /// Where to write the generated markup or image.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    service: ServiceArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("chalkai error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
    }
}

fn load_config(args: &ServiceArgs) -> Result<ChalkConfig> {
    let mut config = ChalkConfig::from_env();
    if let Some(url) = args.relay_url.as_deref() {
        config.relay_url = Some(url.trim().to_string());
        config.service = "relay".to_string();
    }
    if let Some(service) = args.service.as_deref() {
        config.service = service.trim().to_ascii_lowercase();
    }
    if let Some(mode) = args.mode.as_deref() {
        config.mode = GenerationMode::from_str(mode).map_err(anyhow::Error::msg)?;
    }
    if let Some(model) = args.model.as_deref() {
        match config.mode {
            GenerationMode::Markup => config.markup_model = model.to_string(),
            GenerationMode::Image => config.image_model = model.to_string(),
        }
    }
    Ok(config)
}

fn session_id() -> String {
    format!("chalk-{}", uuid::Uuid::new_v4().simple())
}

fn run_once(args: RunArgs) -> Result<i32> {
    let config = load_config(&args.service)?;
    let events = match args.events.as_ref() {
        Some(path) => EventWriter::new(path, session_id()),
        None => EventWriter::detached(session_id()),
    };
    let image = match args.image.as_deref() {
        Some(path) => Some(read_image(path)?),
        None => None,
    };
    let request = RelayRequest::new(args.intent.clone(), image);

    let response = match config.build_client(Some(events)) {
        Ok(client) => relay::handle(&client, &request),
        Err(err) => RelayResponse::from_error(&err),
    };
    println!("{}", serde_json::to_string_pretty(&response.body)?);
    if !response.is_success() {
        return Ok(1);
    }
    if let Some(out) = args.out.as_deref() {
        write_relay_output(&response.body, out)?;
        eprintln!("Wrote {}", out.display());
    }
    Ok(0)
}

fn read_image(path: &Path) -> Result<EncodedImage> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "svg" => SVG_MIME,
        _ => PNG_MIME,
    };
    Ok(EncodedImage::from_bytes(mime, &bytes))
}

fn write_relay_output(body: &Value, out: &Path) -> Result<()> {
    if let Some(document) = body.get("markup").and_then(Value::as_str) {
        return write_bytes(out, document.as_bytes());
    }
    let Some(image) = body
        .get("image")
        .and_then(Value::as_str)
        .and_then(|raw| EncodedImage::from_data_url_or_base64(raw, PNG_MIME))
    else {
        bail!("response carries neither markup nor image");
    };
    write_bytes(out, &image.decode()?)
}

fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

enum Message {
    Line(String),
    Eof,
    Tick,
    Canvas(CanvasChange),
    Finished {
        seq: u64,
        result: Result<SuggestionContent, GenerationError>,
    },
}

struct GenerationJob {
    ticket: GenerationTicket,
    client: GenerationClient,
}

fn spawn_stdin_reader(tx: mpsc::Sender<Message>) -> Result<()> {
    thread::Builder::new()
        .name("chalkai-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.send(Message::Line(line)).is_err() {
                    return;
                }
            }
            let _ = tx.send(Message::Eof);
        })
        .context("failed to spawn stdin reader")?;
    Ok(())
}

fn spawn_idle_ticker(tx: mpsc::Sender<Message>, poll: Duration) -> Result<()> {
    thread::Builder::new()
        .name("chalkai-idle-ticker".to_string())
        .spawn(move || loop {
            thread::sleep(poll);
            if tx.send(Message::Tick).is_err() {
                break;
            }
        })
        .context("failed to spawn idle ticker")?;
    Ok(())
}

fn spawn_generation_worker(tx: mpsc::Sender<Message>) -> Result<mpsc::Sender<GenerationJob>> {
    let (job_tx, job_rx) = mpsc::channel::<GenerationJob>();
    thread::Builder::new()
        .name("chalkai-generation".to_string())
        .spawn(move || {
            for job in job_rx {
                let result = job
                    .client
                    .request_suggestion(&job.ticket.intent, Some(&job.ticket.snapshot.image));
                let finished = Message::Finished {
                    seq: job.ticket.seq,
                    result,
                };
                if tx.send(finished).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn generation worker")?;
    Ok(job_tx)
}

struct ChatApp {
    config: ChalkConfig,
    session: Session,
    canvas: MemoryCanvas,
    client: Result<GenerationClient, GenerationError>,
    jobs: mpsc::Sender<GenerationJob>,
    out_dir: PathBuf,
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let config = load_config(&args.service)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventWriter::new(&events_path, session_id());
    let session = Session::new(SessionOptions::from(&config), events.clone())?;

    let (tx, rx) = mpsc::channel::<Message>();
    let mut canvas = MemoryCanvas::new();
    let canvas_tx = tx.clone();
    canvas.subscribe(Box::new(move |change: &CanvasChange| {
        let _ = canvas_tx.send(Message::Canvas(change.clone()));
    }));

    let client = config.build_client(Some(events));
    let jobs = spawn_generation_worker(tx.clone())?;
    spawn_idle_ticker(tx.clone(), config.idle_poll)?;
    spawn_stdin_reader(tx)?;

    let mut app = ChatApp {
        config,
        session,
        canvas,
        client,
        jobs,
        out_dir: args.out.clone(),
    };

    println!("ChalkAI session started. Type /help for commands.");
    match app.client.as_ref() {
        Ok(client) => println!(
            "Service: {} | model: {} | mode: {}",
            client.service_name(),
            client.model(),
            client.mode()
        ),
        Err(err) => eprintln!("Generation unavailable: {err}"),
    }
    prompt()?;

    for message in rx {
        let now = Instant::now();
        match message {
            Message::Line(line) => {
                if !app.handle_line(&line, now)? {
                    break;
                }
                prompt()?;
            }
            Message::Eof => break,
            Message::Tick => {
                let effect = app.session.handle(SessionEvent::Tick, &mut app.canvas, now)?;
                if effect != Effect::None {
                    println!();
                    app.report(effect, now)?;
                    prompt()?;
                }
            }
            Message::Canvas(_) => {
                app.session
                    .handle(SessionEvent::CanvasActivity, &mut app.canvas, now)?;
            }
            Message::Finished { seq, result } => {
                let effect = app.session.handle(
                    SessionEvent::GenerationFinished { seq, result },
                    &mut app.canvas,
                    now,
                )?;
                if effect != Effect::Stale {
                    println!();
                    app.report(effect, now)?;
                    prompt()?;
                }
            }
        }
    }

    if let Some(path) = app.session.events().path() {
        println!("Event log: {}", path.display());
    }
    Ok(())
}

fn prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

impl ChatApp {
    fn apply(&mut self, event: SessionEvent, now: Instant) -> Result<()> {
        let effect = self.session.handle(event, &mut self.canvas, now)?;
        self.report(effect, now)
    }

    /// Returns `false` when the session should end.
    fn handle_line(&mut self, line: &str, now: Instant) -> Result<bool> {
        match parse_command(line) {
            ChatCommand::Noop => {}
            ChatCommand::Quit => return Ok(false),
            ChatCommand::Help => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            ChatCommand::Submit(text) => {
                if let Some(text) = text {
                    self.apply(SessionEvent::IntentChanged(text), now)?;
                }
                self.apply(SessionEvent::Submit, now)?;
            }
            ChatCommand::SetIntent(text) => {
                self.apply(SessionEvent::IntentChanged(text), now)?;
                println!("Intent: \"{}\"", self.session.intent());
            }
            ChatCommand::Accept => self.apply(SessionEvent::Accept, now)?,
            ChatCommand::Reject => self.apply(SessionEvent::Reject, now)?,
            ChatCommand::Clear => self.apply(SessionEvent::Clear, now)?,
            ChatCommand::QuickEnhance => self.apply(SessionEvent::QuickEnhance, now)?,
            ChatCommand::Template(key) => self.apply(SessionEvent::Template(key), now)?,
            ChatCommand::ListTemplates => {
                for template in self.session.templates().list() {
                    println!("{:<10} {}: {}", template.key, template.label, template.instruction);
                }
            }
            ChatCommand::Key(key) => self.apply(SessionEvent::Key(key), now)?,
            ChatCommand::StartListening => self.apply(SessionEvent::StartListening, now)?,
            ChatCommand::StopListening => self.apply(SessionEvent::StopListening, now)?,
            ChatCommand::Speech { text, is_final } => {
                if !self.session.voice().is_listening() {
                    println!("Not listening. Use /listen first.");
                } else {
                    self.apply(
                        SessionEvent::Speech(SpeechEvent::Transcript { text, is_final }),
                        now,
                    )?;
                    println!("Transcript: \"{}\"", self.session.voice().transcript());
                }
            }
            ChatCommand::ListHistory => self.print_history(),
            ChatCommand::SelectHistory(index) => {
                self.apply(SessionEvent::SelectHistory(index), now)?
            }
            ChatCommand::Draw(spec) => {
                let (kind, bounds) = match spec {
                    DrawSpec::Rectangle(bounds) => (ShapeKind::Rectangle, bounds),
                    DrawSpec::Ellipse(bounds) => (ShapeKind::Ellipse, bounds),
                    DrawSpec::Line(bounds) => (ShapeKind::Line, bounds),
                    DrawSpec::Text { bounds, text } => (ShapeKind::Text(text), bounds),
                };
                let id = self.canvas.add_shape(kind, bounds);
                println!("Added {id}");
            }
            ChatCommand::Select(ids) => {
                let known: Vec<_> = ids
                    .into_iter()
                    .filter(|id| self.canvas.shape(id).is_some())
                    .collect();
                self.canvas.select(&known);
                println!("Selected {} shape(s)", self.canvas.selected_shape_ids().len());
            }
            ChatCommand::Deselect => {
                self.canvas.clear_selection();
                println!("Selection cleared");
            }
            ChatCommand::ListShapes => self.print_shapes(),
            ChatCommand::Snapshot(path) => self.write_snapshot(&path)?,
            ChatCommand::SaveSuggestion(path) => self.save_suggestion(&path)?,
            ChatCommand::ExportHistory(path) => {
                let path = self.resolve(&path);
                self.session.history().save(&path)?;
                println!("History written to {}", path.display());
            }
            ChatCommand::SetMode(raw) => self.set_mode(&raw)?,
            ChatCommand::Status => self.print_status(),
            ChatCommand::Invalid { command, reason } => println!("/{command}: {reason}"),
            ChatCommand::Unknown { command, .. } => {
                println!("Unknown command: /{command}. Type /help for commands.")
            }
        }
        Ok(true)
    }

    fn report(&mut self, effect: Effect, now: Instant) -> Result<()> {
        match effect {
            Effect::None | Effect::Stale => {}
            Effect::Dispatch(ticket) => self.dispatch(ticket, now)?,
            Effect::Busy => println!("A suggestion is already being generated."),
            Effect::Refused(err) => println!("{err}"),
            Effect::Ready => {
                if let Some(pending) = self.session.pending() {
                    println!(
                        "Suggestion ready ({}, {} bytes). /accept (Tab) to merge or /reject (Esc).",
                        pending.content.kind(),
                        pending.content.byte_len()
                    );
                }
            }
            Effect::Failed(err) => print_failure(&err),
            Effect::Merged(report) => println!(
                "Merged as {} at scale {:.2}; replaced {} shape(s). History: {}",
                report.placed,
                report.placement.scale,
                report.removed.len(),
                report.history_len
            ),
            Effect::Rejected => println!(
                "Suggestion discarded. Intent kept: \"{}\"",
                self.session.intent()
            ),
            Effect::Cleared => println!("Cleared."),
            Effect::Restored(index) => println!(
                "Restored history #{index}: \"{}\". /accept to merge.",
                self.session.intent()
            ),
            Effect::Listening => {
                println!("Listening. Use /say <text> for speech and /stop to finish.")
            }
            Effect::StoppedListening => {
                println!("Stopped listening. Intent: \"{}\"", self.session.intent())
            }
            Effect::CaptureFailed(err) => println!("Voice capture stopped: {err}"),
            Effect::Notice(message) => println!("{message}"),
        }
        Ok(())
    }

    fn dispatch(&mut self, ticket: GenerationTicket, now: Instant) -> Result<()> {
        let client = match self.client.as_ref() {
            Ok(client) => client.clone(),
            Err(err) => {
                let err = err.clone();
                return self.apply(
                    SessionEvent::GenerationFinished {
                        seq: ticket.seq,
                        result: Err(err),
                    },
                    now,
                );
            }
        };
        println!("Generating suggestion for \"{}\"...", ticket.intent);
        if self.jobs.send(GenerationJob { ticket, client }).is_err() {
            bail!("generation worker stopped");
        }
        Ok(())
    }

    fn set_mode(&mut self, raw: &str) -> Result<()> {
        if raw.trim().is_empty() {
            println!("Mode: {}", self.config.mode);
            return Ok(());
        }
        let mode = match GenerationMode::from_str(raw) {
            Ok(mode) => mode,
            Err(message) => {
                println!("{message}");
                return Ok(());
            }
        };
        self.config.mode = mode;
        self.client = self.config.build_client(Some(self.session.events().clone()));
        match self.client.as_ref() {
            Ok(client) => println!("Mode set to {mode} (model {})", client.model()),
            Err(err) => println!("Mode set to {mode}; generation unavailable: {err}"),
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.out_dir.join(path)
        }
    }

    fn write_snapshot(&self, path: &Path) -> Result<()> {
        let snapshot = match export_snapshot(&self.canvas) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                println!("{err}");
                return Ok(());
            }
        };
        let path = self.resolve(path);
        write_bytes(&path, &snapshot.image.decode()?)?;
        println!(
            "Snapshot of {} shape(s) at {EXPORT_SCALE}x written to {}",
            snapshot.context.shape_ids.len(),
            path.display()
        );
        Ok(())
    }

    fn save_suggestion(&self, path: &Path) -> Result<()> {
        let Some(pending) = self.session.pending() else {
            println!("No pending suggestion.");
            return Ok(());
        };
        let path = self.resolve(path);
        match &pending.content {
            SuggestionContent::Markup { document } => write_bytes(&path, document.as_bytes())?,
            SuggestionContent::Image { image } => write_bytes(&path, &BASE64.decode(image.data_base64.trim())?)?,
        }
        println!("Suggestion written to {}", path.display());
        Ok(())
    }

    fn print_history(&self) {
        let history = self.session.history();
        if history.is_empty() {
            println!("History is empty.");
            return;
        }
        for (index, entry) in history.iter().enumerate() {
            println!(
                "#{index} {} [{}] \"{}\"",
                entry.created_at(),
                entry.content().kind(),
                entry.intent()
            );
        }
    }

    fn print_shapes(&self) {
        let selected = self.canvas.selected_shape_ids();
        let mut count = 0;
        for shape in self.canvas.shapes() {
            count += 1;
            let marker = if selected.contains(&shape.id) { "*" } else { " " };
            let b = shape.bounds;
            println!(
                "{marker} {} {} ({:.0}, {:.0}) {:.0}x{:.0}",
                shape.id,
                shape.kind.label(),
                b.x,
                b.y,
                b.w,
                b.h
            );
        }
        if count == 0 {
            println!("Canvas is empty.");
        }
    }

    fn print_status(&self) {
        let phase = match self.session.phase() {
            Phase::Requesting { seq, .. } => format!("requesting (#{seq})"),
            other => other.name().to_string(),
        };
        println!("Phase: {phase}");
        println!("Intent: \"{}\"", self.session.intent());
        match self.client.as_ref() {
            Ok(client) => println!(
                "Service: {} | model: {} | mode: {}",
                client.service_name(),
                client.model(),
                client.mode()
            ),
            Err(err) => println!("Generation unavailable: {err}"),
        }
        println!(
            "History: {}/{} | shapes: {} | listening: {}",
            self.session.history().len(),
            self.session.history().limit(),
            self.canvas.shape_ids().len(),
            self.session.voice().is_listening()
        );
        if let Some(err) = self.session.last_error() {
            println!("Last error: {err}");
        }
    }
}

fn print_failure(err: &GenerationError) {
    match err.category() {
        ErrorCategory::Configuration => println!("Generation unavailable: {err}"),
        ErrorCategory::Input => println!("{err}"),
        ErrorCategory::Upstream => {
            println!("Generation failed: {err}");
            if let Some(details) = err.details() {
                println!("  details: {details}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{load_config, read_image, write_relay_output, ServiceArgs};
    use chalk_contracts::suggestion::GenerationMode;

    #[test]
    fn service_flags_override_environment() -> anyhow::Result<()> {
        let config = load_config(&ServiceArgs {
            service: Some("DryRun".to_string()),
            mode: Some("image".to_string()),
            model: Some("dryrun-image-1".to_string()),
            relay_url: None,
        })?;
        assert_eq!(config.service, "dryrun");
        assert_eq!(config.mode, GenerationMode::Image);
        assert_eq!(config.image_model, "dryrun-image-1");
        assert!(load_config(&ServiceArgs {
            service: None,
            mode: Some("video".to_string()),
            model: None,
            relay_url: None,
        })
        .is_err());
        Ok(())
    }

    #[test]
    fn relay_output_is_written_by_kind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let svg = temp.path().join("out/suggestion.svg");
        write_relay_output(&json!({ "markup": "<svg></svg>" }), &svg)?;
        assert_eq!(std::fs::read_to_string(&svg)?, "<svg></svg>");

        let png = temp.path().join("suggestion.png");
        write_relay_output(&json!({ "image": "data:image/png;base64,QUJD" }), &png)?;
        assert_eq!(std::fs::read(&png)?, b"ABC");
        assert!(write_relay_output(&json!({ "error": "x" }), &png).is_err());

        let image = read_image(&png)?;
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data_base64, "QUJD");
        Ok(())
    }
}
