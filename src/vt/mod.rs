//! The VT subsystem: a `vt100`-backed emulator plus the streaming helpers it
//! composes (title extraction, terminal-query interception, mode tracking,
//! and the problematic-OSC filter).

mod color_scheme;
mod emulator;
mod modes;
mod osc_filter;
mod query_responder;
mod title_parser;

pub use color_scheme::ColorScheme;
pub use emulator::Emulator;
pub use modes::ModeTracker;
pub use query_responder::{QueryContext, QueryResponder, QueryResult};
pub use title_parser::TitleParser;
