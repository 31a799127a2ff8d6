//! motet — a live-coding DSL and real-time symbolic playback runtime.
//!
//! Source text is parsed into sequences of steps; concurrent playback
//! cursors ([`player::Head`]) walk the AST and post time-stamped note and
//! control messages to pluggable processors. The text can be edited while it
//! plays: the player re-parses on change and cursors resynchronize against
//! the fresh program without losing their place.

pub mod dsl;
pub mod eval;
pub mod midi;
pub mod player;
