#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    Quit,
    /// `/model` shows the current model; `/model <name>` switches.
    Model(Option<String>),
    /// `/mode` shows the current mode; `/mode <full|restricted>` switches.
    Mode(Option<String>),
    Plan,
    Agent,
    Sessions,
    New,
    Unknown(String),
}

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or(trimmed).to_string();
    let argument = parts.next().map(str::to_string);

    let parsed = match command.as_str() {
        "/help" => SlashCommand::Help,
        "/quit" | "/exit" => SlashCommand::Quit,
        "/model" => SlashCommand::Model(argument),
        "/mode" => SlashCommand::Mode(argument),
        "/plan" => SlashCommand::Plan,
        "/agent" => SlashCommand::Agent,
        "/sessions" => SlashCommand::Sessions,
        "/new" => SlashCommand::New,
        _ => SlashCommand::Unknown(command),
    };

    Some(parsed)
}
