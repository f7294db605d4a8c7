//! muxd - a headless terminal multiplexer host.
//!
//! Owns a set of PTY sessions, runs a VT100 emulator plus scrollback per
//! session, and serves both state over a length-prefixed binary protocol on a
//! Unix-domain socket so a single active shim client can attach, detach, and
//! hand off without losing any session.

pub mod cell;
pub mod config;
pub mod error;
pub mod focus_tracker;
pub mod geometry;
pub mod git;
pub mod ids;
pub mod ipc;
pub mod keyboard;
pub mod logging;
pub mod observer;
pub mod paste_gate;
pub mod pty;
pub mod scrollback;
pub mod session_registry;
pub mod vt;
