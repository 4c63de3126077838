use std::path::PathBuf;

use super::command_registry::{find_command, ArgShape, CommandSpec};
use crate::canvas::ShapeId;
use crate::geometry::Bounds;

const TEXT_CHAR_WIDTH: f64 = 8.0;
const TEXT_HEIGHT: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Enter,
    Tab,
    Escape,
}

impl KeyCommand {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "enter" | "return" => Some(Self::Enter),
            "tab" => Some(Self::Tab),
            "esc" | "escape" => Some(Self::Escape),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawSpec {
    Rectangle(Bounds),
    Ellipse(Bounds),
    Line(Bounds),
    Text { bounds: Bounds, text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Noop,
    /// Plain text: replace the intent and submit it.
    Submit(Option<String>),
    SetIntent(String),
    Accept,
    Reject,
    Clear,
    QuickEnhance,
    Template(String),
    ListTemplates,
    Key(KeyCommand),
    StartListening,
    StopListening,
    Speech { text: String, is_final: bool },
    ListHistory,
    SelectHistory(usize),
    Draw(DrawSpec),
    Select(Vec<ShapeId>),
    Deselect,
    ListShapes,
    Snapshot(PathBuf),
    SaveSuggestion(PathBuf),
    ExportHistory(PathBuf),
    SetMode(String),
    Status,
    Help,
    Quit,
    Invalid { command: String, reason: String },
    Unknown { command: String, arg: String },
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    split_args(arg).join(" ")
}

fn parse_numbers(parts: &[String]) -> Option<Vec<f64>> {
    parts
        .iter()
        .map(|part| part.parse::<f64>().ok().filter(|value| value.is_finite()))
        .collect()
}

fn parse_draw(action: &str, arg: &str) -> Result<DrawSpec, String> {
    let parts = split_args(arg);
    if action == "draw_text" {
        if parts.len() < 3 {
            return Err("usage: /text X Y \"label\"".to_string());
        }
        let coords = parse_numbers(&parts[..2]).ok_or("X and Y must be numbers")?;
        let text = parts[2..].join(" ");
        let width = (text.chars().count() as f64 * TEXT_CHAR_WIDTH).max(TEXT_CHAR_WIDTH);
        return Ok(DrawSpec::Text {
            bounds: Bounds::new(coords[0], coords[1], width, TEXT_HEIGHT),
            text,
        });
    }

    let numbers = parse_numbers(&parts).ok_or("coordinates must be numbers")?;
    if numbers.len() != 4 {
        return Err(match action {
            "draw_line" => "usage: /line X1 Y1 X2 Y2".to_string(),
            _ => "usage: /rect|/ellipse X Y W H".to_string(),
        });
    }
    match action {
        "draw_line" => Ok(DrawSpec::Line(Bounds::from_corners(
            numbers[0], numbers[1], numbers[2], numbers[3],
        ))),
        "draw_ellipse" => Ok(DrawSpec::Ellipse(Bounds::new(
            numbers[0], numbers[1], numbers[2], numbers[3],
        ))),
        _ => Ok(DrawSpec::Rectangle(Bounds::new(
            numbers[0], numbers[1], numbers[2], numbers[3],
        ))),
    }
}

fn build(spec: &CommandSpec, arg: &str) -> ChatCommand {
    let invalid = |reason: String| ChatCommand::Invalid {
        command: spec.command.to_string(),
        reason,
    };
    match spec.args {
        ArgShape::None => match spec.action {
            "submit" => ChatCommand::Submit(None),
            "accept" => ChatCommand::Accept,
            "reject" => ChatCommand::Reject,
            "clear" => ChatCommand::Clear,
            "quick_enhance" => ChatCommand::QuickEnhance,
            "list_templates" => ChatCommand::ListTemplates,
            "start_listening" => ChatCommand::StartListening,
            "stop_listening" => ChatCommand::StopListening,
            "list_history" => ChatCommand::ListHistory,
            "deselect" => ChatCommand::Deselect,
            "list_shapes" => ChatCommand::ListShapes,
            "status" => ChatCommand::Status,
            "quit" => ChatCommand::Quit,
            _ => ChatCommand::Help,
        },
        ArgShape::Text => match spec.action {
            "set_intent" => ChatCommand::SetIntent(arg.to_string()),
            "template" if arg.is_empty() => invalid("usage: /template NAME".to_string()),
            "template" => ChatCommand::Template(arg.to_string()),
            "key" => match KeyCommand::parse(arg) {
                Some(key) => ChatCommand::Key(key),
                None => invalid("expected enter, tab or escape".to_string()),
            },
            "speech_final" | "speech_interim" => ChatCommand::Speech {
                text: arg.to_string(),
                is_final: spec.action == "speech_final",
            },
            _ if arg.is_empty() => invalid("usage: /mode markup|image".to_string()),
            _ => ChatCommand::SetMode(arg.to_string()),
        },
        ArgShape::Path => {
            let path = parse_single_path_arg(arg);
            if path.is_empty() {
                return invalid(format!("usage: /{} PATH", spec.command));
            }
            let path = PathBuf::from(path);
            match spec.action {
                "snapshot" => ChatCommand::Snapshot(path),
                "save_suggestion" => ChatCommand::SaveSuggestion(path),
                _ => ChatCommand::ExportHistory(path),
            }
        }
        ArgShape::Index => match arg.trim().parse::<usize>() {
            Ok(index) => ChatCommand::SelectHistory(index),
            Err(_) => invalid("usage: /use N (see /history)".to_string()),
        },
        ArgShape::Shape => match parse_draw(spec.action, arg) {
            Ok(draw) => ChatCommand::Draw(draw),
            Err(reason) => invalid(reason),
        },
        ArgShape::Ids => {
            let ids: Vec<ShapeId> = split_args(arg)
                .into_iter()
                .map(|raw| {
                    if raw.contains(':') {
                        ShapeId(raw)
                    } else {
                        ShapeId(format!("shape:{raw}"))
                    }
                })
                .collect();
            if ids.is_empty() {
                return invalid("usage: /select ID [ID...]".to_string());
            }
            ChatCommand::Select(ids)
        }
    }
}

pub fn parse_command(text: &str) -> ChatCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatCommand::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();
            if let Some(spec) = find_command(&command) {
                return build(spec, arg);
            }
            return ChatCommand::Unknown {
                command,
                arg: arg.to_string(),
            };
        }
    }

    ChatCommand::Submit(Some(raw_trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{parse_command, ChatCommand, DrawSpec, KeyCommand};
    use crate::canvas::ShapeId;
    use crate::geometry::Bounds;

    #[test]
    fn plain_text_submits_as_intent() {
        assert_eq!(
            parse_command("  add a label box  "),
            ChatCommand::Submit(Some("add a label box".to_string()))
        );
        assert_eq!(parse_command("   "), ChatCommand::Noop);
        assert_eq!(parse_command("/go"), ChatCommand::Submit(None));
    }

    #[test]
    fn session_controls_parse() {
        assert_eq!(parse_command("/accept"), ChatCommand::Accept);
        assert_eq!(parse_command("/REJECT"), ChatCommand::Reject);
        assert_eq!(parse_command("/clear"), ChatCommand::Clear);
        assert_eq!(parse_command("/enhance"), ChatCommand::QuickEnhance);
        assert_eq!(
            parse_command("/template flowchart"),
            ChatCommand::Template("flowchart".to_string())
        );
        assert_eq!(parse_command("/key tab"), ChatCommand::Key(KeyCommand::Tab));
        assert_eq!(parse_command("/key Esc"), ChatCommand::Key(KeyCommand::Escape));
        assert!(matches!(parse_command("/key space"), ChatCommand::Invalid { .. }));
        assert_eq!(parse_command("/use 2"), ChatCommand::SelectHistory(2));
        assert!(matches!(parse_command("/use two"), ChatCommand::Invalid { .. }));
    }

    #[test]
    fn speech_commands_carry_finality() {
        assert_eq!(
            parse_command("/say add arrows"),
            ChatCommand::Speech {
                text: "add arrows".to_string(),
                is_final: true
            }
        );
        assert_eq!(
            parse_command("/hear add"),
            ChatCommand::Speech {
                text: "add".to_string(),
                is_final: false
            }
        );
    }

    #[test]
    fn draw_commands_parse_geometry() {
        assert_eq!(
            parse_command("/rect 10 20 100 50"),
            ChatCommand::Draw(DrawSpec::Rectangle(Bounds::new(10.0, 20.0, 100.0, 50.0)))
        );
        assert_eq!(
            parse_command("/line 50 50 10 0"),
            ChatCommand::Draw(DrawSpec::Line(Bounds::new(10.0, 0.0, 40.0, 50.0)))
        );
        assert_eq!(
            parse_command("/text 5 5 \"Start here\""),
            ChatCommand::Draw(DrawSpec::Text {
                bounds: Bounds::new(5.0, 5.0, 80.0, 16.0),
                text: "Start here".to_string()
            })
        );
        assert!(matches!(parse_command("/rect 1 2 3"), ChatCommand::Invalid { .. }));
        assert!(matches!(parse_command("/ellipse a b c d"), ChatCommand::Invalid { .. }));
    }

    #[test]
    fn select_accepts_bare_numbers_and_full_ids() {
        assert_eq!(
            parse_command("/select 1 shape:3"),
            ChatCommand::Select(vec![ShapeId::from("shape:1"), ShapeId::from("shape:3")])
        );
    }

    #[test]
    fn path_commands_keep_quoted_spaces() {
        assert_eq!(
            parse_command("/export \"/tmp/my history.json\""),
            ChatCommand::ExportHistory(PathBuf::from("/tmp/my history.json"))
        );
        assert!(matches!(parse_command("/save"), ChatCommand::Invalid { .. }));
    }

    #[test]
    fn unknown_command_is_reported() {
        assert_eq!(
            parse_command("/magic foo bar"),
            ChatCommand::Unknown {
                command: "magic".to_string(),
                arg: "foo bar".to_string()
            }
        );
    }
}
