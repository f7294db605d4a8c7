//! Key and mouse event handling: encoding to PTY bytes, Vim-style mux
//! command sequences, and the overlay/search/forward routing pipeline.

mod encoder;
mod router;
mod vim_matcher;

pub use encoder::{encode_key, encode_mouse, encode_paste};
pub use router::{KeyboardRouter, MuxCommand, Overlay, RouteContext, RouteDecision};
pub use vim_matcher::{MatchOutcome, SequenceKey, VimSequenceMatcher};
