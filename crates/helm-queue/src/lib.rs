//! Command-line parsing, non-shell process execution, and the priority
//! async command queue (spec.md §4.H-§4.I).

mod parser;
mod processor;
mod queue;

pub use parser::{parse_complete, CommandParser, ParseOutcome, ParsedCommand};
pub use processor::{BuiltinCommand, CommandOutput, CommandProcessor, ExecutionContext};
pub use queue::{CommandQueue, QueueConfig};
