#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ArgShape {
    None,
    Text,
    Path,
    Index,
    Shape,
    Ids,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub args: ArgShape,
}

const fn spec(command: &'static str, action: &'static str, args: ArgShape) -> CommandSpec {
    CommandSpec {
        command,
        action,
        args,
    }
}

pub(crate) const COMMANDS: &[CommandSpec] = &[
    spec("go", "submit", ArgShape::None),
    spec("submit", "submit", ArgShape::None),
    spec("intent", "set_intent", ArgShape::Text),
    spec("accept", "accept", ArgShape::None),
    spec("reject", "reject", ArgShape::None),
    spec("clear", "clear", ArgShape::None),
    spec("enhance", "quick_enhance", ArgShape::None),
    spec("template", "template", ArgShape::Text),
    spec("templates", "list_templates", ArgShape::None),
    spec("key", "key", ArgShape::Text),
    spec("listen", "start_listening", ArgShape::None),
    spec("stop", "stop_listening", ArgShape::None),
    spec("say", "speech_final", ArgShape::Text),
    spec("hear", "speech_interim", ArgShape::Text),
    spec("history", "list_history", ArgShape::None),
    spec("use", "select_history", ArgShape::Index),
    spec("rect", "draw_rect", ArgShape::Shape),
    spec("ellipse", "draw_ellipse", ArgShape::Shape),
    spec("line", "draw_line", ArgShape::Shape),
    spec("text", "draw_text", ArgShape::Shape),
    spec("select", "select", ArgShape::Ids),
    spec("deselect", "deselect", ArgShape::None),
    spec("shapes", "list_shapes", ArgShape::None),
    spec("snapshot", "snapshot", ArgShape::Path),
    spec("save", "save_suggestion", ArgShape::Path),
    spec("export", "export_history", ArgShape::Path),
    spec("mode", "set_mode", ArgShape::Text),
    spec("status", "status", ArgShape::None),
    spec("help", "help", ArgShape::None),
    spec("quit", "quit", ArgShape::None),
    spec("exit", "quit", ArgShape::None),
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "<intent text>",
    "/intent",
    "/go",
    "/accept",
    "/reject",
    "/clear",
    "/enhance",
    "/template",
    "/templates",
    "/key",
    "/listen",
    "/stop",
    "/say",
    "/hear",
    "/history",
    "/use",
    "/rect",
    "/ellipse",
    "/line",
    "/text",
    "/select",
    "/deselect",
    "/shapes",
    "/snapshot",
    "/save",
    "/export",
    "/mode",
    "/status",
    "/quit",
];

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.command == command)
}
