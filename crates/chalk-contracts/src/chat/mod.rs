mod command_parser;
mod command_registry;

pub use command_parser::{parse_command, ChatCommand, DrawSpec, KeyCommand};
pub use command_registry::CHAT_HELP_COMMANDS;
