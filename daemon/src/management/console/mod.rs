mod buffer;
mod parser;
mod pipeline;

pub use buffer::{ConsoleBuffer, ConsoleSubscription};
pub use parser::{parse_line, strip_formatting, CommandFamily, ConsoleEvent};
pub use pipeline::{ingest_line, push_notice};
