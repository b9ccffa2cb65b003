//! Administrative surface: the debug console and its session registry.

pub mod console;
pub mod registry;

pub use console::{
    AdminConsole, BuiltinCommands, CommandHandler, CommandOutcome, ConsoleClient, ConsoleMode,
    ConsoleSession,
};
pub use registry::SessionRegistry;
