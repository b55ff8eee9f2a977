//! Command surface: argument parsing, registry and FT.* handlers

pub mod args;
pub mod family;
pub mod registry;

pub use args::ArgParser;
pub use registry::{CommandRegistry, CommandSpec};

/// Per-invocation connection state the handlers care about.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandContext {
    pub db_index: u32,
}
