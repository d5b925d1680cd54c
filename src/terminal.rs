//! Line-oriented chat host: every line is a user message unless it starts
//! with a slash command.

use anyhow::Result;
use flume::Receiver;
use std::io::{BufRead, Write};

use state_coordinator_backend::{ChatMessage, Engine, EngineEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Character(String),
    States,
    Activate(String),
    Deactivate(String),
    Custom(String),
    Clear,
    Prompt,
    Help,
    Quit,
    Say(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (rest, String::new()),
    };

    match name {
        "character" | "char" => Command::Character(arg),
        "states" => Command::States,
        "activate" => Command::Activate(arg),
        "deactivate" => Command::Deactivate(arg),
        "custom" => Command::Custom(arg),
        "clear" => Command::Clear,
        "prompt" => Command::Prompt,
        "quit" | "exit" => Command::Quit,
        "help" => Command::Help,
        _ => Command::Say(line.to_string()),
    }
}

const HELP: &str = "\
/character <id>    switch character
/states            list active states
/activate <name>   activate a state
/deactivate <name> deactivate a state
/custom <text>     set the custom state
/clear             deactivate every state
/prompt            show the injected prompt
/quit              save and exit
anything else is sent as a chat message";

pub struct TerminalHost {
    engine: Engine,
    events: Receiver<EngineEvent>,
    history: Vec<ChatMessage>,
    user_name: String,
}

impl TerminalHost {
    pub fn new(engine: Engine, events: Receiver<EngineEvent>) -> Self {
        Self {
            engine,
            events,
            history: Vec::new(),
            user_name: "You".to_string(),
        }
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Read commands until EOF or `/quit`, then flush states. States are
    /// flushed on I/O errors too, before the error is returned.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<()> {
        let result = self.read_commands(input, out);
        self.engine.shutdown();
        result
    }

    fn read_commands<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "{} states loaded. /help for commands.",
            self.engine.catalog().len()
        )?;
        self.flush_events(out)?;

        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if !self.handle(parse_command(&line), out)? {
                break;
            }
        }
        Ok(())
    }

    /// Apply one command. Returns false when the host should stop.
    pub fn handle<W: Write>(&mut self, command: Command, out: &mut W) -> Result<bool> {
        match command {
            Command::Character(id) => self.engine.on_character_changed(&id),
            Command::States => {
                let states = self.engine.active_states();
                if states.is_empty() {
                    writeln!(out, "(no active states)")?;
                }
                for state in states {
                    writeln!(out, "* {}", state)?;
                }
            }
            Command::Activate(name) => {
                if !self.engine.activate_state(&name) {
                    writeln!(out, "(could not activate '{}')", name)?;
                }
            }
            Command::Deactivate(name) => {
                if !self.engine.deactivate_state(&name) {
                    writeln!(out, "('{}' is not active)", name)?;
                }
            }
            Command::Custom(text) => {
                if !self.engine.set_custom_state(&text) {
                    writeln!(out, "(custom state unchanged)")?;
                }
            }
            Command::Clear => {
                self.engine.clear_states();
            }
            Command::Prompt => writeln!(out, "{}", self.engine.render())?,
            Command::Help => writeln!(out, "{}", HELP)?,
            Command::Quit => return Ok(false),
            Command::Say(text) => {
                self.history
                    .push(ChatMessage::user(self.user_name.clone(), text));
                self.engine.on_message_intercept(&mut self.history);
                if let Some(sent) = self.history.last() {
                    writeln!(out, "{}: {}", sent.name, sent.mes)?;
                }
            }
        }

        self.flush_events(out)?;
        Ok(true)
    }

    fn flush_events<W: Write>(&mut self, out: &mut W) -> Result<()> {
        for event in self.events.try_iter() {
            match event {
                EngineEvent::PromptUpdated(injection) => {
                    writeln!(
                        out,
                        "[prompt {} placement={} depth={} role={}]",
                        injection.marker_id,
                        injection.placement.host_code(),
                        injection.depth,
                        injection.role.host_code()
                    )?;
                    for line in injection.text.lines() {
                        writeln!(out, "  | {}", line)?;
                    }
                }
                EngineEvent::StatesChanged {
                    character_id,
                    added,
                    removed,
                } => {
                    tracing::debug!(
                        "States changed for '{}': +{:?} -{:?}",
                        character_id,
                        added,
                        removed
                    );
                }
            }
        }
        Ok(())
    }
}
