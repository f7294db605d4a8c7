//! Identifier types shared across the PTY host and IPC layers.

use uuid::Uuid;

/// Identifies a single PTY-backed pane for the lifetime of the host process.
pub type PtyId = Uuid;
