//! Administrative Debug Console
//!
//! A line-oriented console for operators. Each connected console session is
//! tracked in the console's [`SessionRegistry`] for as long as it is open.

use std::fmt::Write as _;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sqlgate_core::{Clock, ConnectionContext, SessionId, SystemClock};

use super::registry::SessionRegistry;

/// Longest command accepted, including the newline
pub const COMMAND_BUFFER_LEN: usize = 80;

const PROMPT: &str = "sqlgate> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleMode {
    #[default]
    User,
    Developer,
}

impl ConsoleMode {
    /// Later options win; unknown options are reported and skipped
    pub fn from_options(options: &[String]) -> Self {
        let mut mode = Self::default();
        for option in options {
            if option.eq_ignore_ascii_case("developer") {
                mode = Self::Developer;
            } else if option.eq_ignore_ascii_case("user") {
                mode = Self::User;
            } else {
                warn!("Unknown option for the admin console '{}'", option);
            }
        }
        mode
    }
}

/// Whether a console session stays open after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue,
    Close,
}

/// What the registry remembers about a console client
#[derive(Debug, Clone, Serialize)]
pub struct ConsoleClient {
    pub identity: String,
    pub mode: ConsoleMode,
    pub connected: DateTime<Utc>,
}

/// Interprets one complete console command
pub trait CommandHandler: Send + Sync {
    fn execute(&self, console: &AdminConsole, command: &str, out: &mut String) -> CommandOutcome;
}

/// `help`, `show sessions` and `quit`
#[derive(Debug, Default)]
pub struct BuiltinCommands;

impl CommandHandler for BuiltinCommands {
    fn execute(&self, console: &AdminConsole, command: &str, out: &mut String) -> CommandOutcome {
        let words: Vec<&str> = command.split_whitespace().collect();
        match words.as_slice() {
            [] => CommandOutcome::Continue,
            ["help"] => {
                out.push_str("Available commands:\n");
                out.push_str("    help            Show this list\n");
                out.push_str("    show sessions   List connected console sessions\n");
                out.push_str("    quit            Close this session\n");
                CommandOutcome::Continue
            }
            ["show", "sessions"] => {
                for (id, client) in console.registry().snapshot() {
                    let _ = writeln!(
                        out,
                        "{}  {}  {:?}  connected {}",
                        id,
                        client.identity,
                        client.mode,
                        client.connected.format("%Y-%m-%d %H:%M:%S")
                    );
                }
                CommandOutcome::Continue
            }
            ["quit"] | ["exit"] => CommandOutcome::Close,
            _ => {
                let _ = writeln!(
                    out,
                    "Unknown command '{}'. Type help for a list of available commands.",
                    command
                );
                CommandOutcome::Continue
            }
        }
    }
}

pub struct AdminConsole {
    name: String,
    mode: ConsoleMode,
    registry: SessionRegistry<ConsoleClient>,
    handler: Arc<dyn CommandHandler>,
    clock: Arc<dyn Clock>,
}

impl AdminConsole {
    pub fn new(name: impl Into<String>, options: &[String]) -> Self {
        Self {
            name: name.into(),
            mode: ConsoleMode::from_options(options),
            registry: SessionRegistry::new(),
            handler: Arc::new(BuiltinCommands),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ConsoleMode {
        self.mode
    }

    pub fn registry(&self) -> &SessionRegistry<ConsoleClient> {
        &self.registry
    }

    /// Registers a client and queues its welcome banner
    pub fn open_session(self: &Arc<Self>, ctx: &ConnectionContext) -> ConsoleSession {
        self.registry.insert(
            ctx.session_id,
            ConsoleClient {
                identity: ctx.identity(),
                mode: self.mode,
                connected: self.clock.now(),
            },
        );
        debug!("{}: console session {} opened", self.name, ctx.session_id);

        let mut output = format!(
            "Welcome to the sqlgate debug console ({}).\n",
            env!("CARGO_PKG_VERSION")
        );
        if self.mode == ConsoleMode::Developer {
            output.push_str("WARNING: This interface is meant for developer usage,\n");
            output.push_str("incorrect commands can disturb the running proxy.\n\n");
        }
        output.push_str("Type help for a list of available commands.\n\n");
        output.push_str(PROMPT);

        ConsoleSession {
            console: Arc::clone(self),
            id: ctx.session_id,
            command: String::with_capacity(COMMAND_BUFFER_LEN),
            output,
            closed: false,
        }
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "\tMode: {:?}\n\tConnected sessions: {}\n",
            self.mode,
            self.registry.len()
        )
    }
}

pub struct ConsoleSession {
    console: Arc<AdminConsole>,
    id: SessionId,
    command: String,
    output: String,
    closed: bool,
}

impl ConsoleSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Feeds client input; a newline runs the buffered command
    pub fn execute(&mut self, input: &[Bytes]) -> CommandOutcome {
        if self.closed {
            return CommandOutcome::Close;
        }

        let mut truncated = false;
        for fragment in input {
            let room = (COMMAND_BUFFER_LEN - 1).saturating_sub(self.command.len());
            let n = fragment.len().min(room);
            if n != fragment.len() {
                truncated = true;
            }
            self.command
                .push_str(&String::from_utf8_lossy(&fragment[..n]));
        }
        if truncated {
            warn!("{}: Too long console command truncated.", self.console.name);
        }

        if !self.command.contains('\n') {
            if self.command.len() >= COMMAND_BUFFER_LEN - 1 {
                self.command.clear();
                self.output.push_str("Command too long, discarded.\n");
                self.output.push_str(PROMPT);
            }
            return CommandOutcome::Continue;
        }

        let command = std::mem::take(&mut self.command);
        let console = Arc::clone(&self.console);
        let outcome = console
            .handler
            .execute(&console, command.trim(), &mut self.output);
        match outcome {
            CommandOutcome::Continue => self.output.push_str(PROMPT),
            CommandOutcome::Close => self.close(),
        }
        outcome
    }

    /// Drains everything written to the client so far
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.console.registry.remove(self.id);
        debug!("{}: console session {} closed", self.console.name, self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        self.close();
    }
}
