//! Grid cell, row, cursor, mode, and terminal-state types, plus their
//! bit-exact wire encodings.

mod codec;

pub use codec::{pack_cells, pack_dirty_update, pack_row, pack_state, unpack_cells, unpack_state};

use std::collections::BTreeMap;

/// Bytes a single packed [`Cell`] occupies on the wire.
pub const CELL_SIZE: usize = 16;

/// Bytes the fixed [`TerminalState`] header occupies, before cell data.
pub const STATE_HEADER_SIZE: usize = 28;

/// A single grid cell: codepoint, 24-bit fg/bg, style flags, width, and an
/// optional hyperlink id. Packs to exactly [`CELL_SIZE`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Unicode scalar value. `0` means "space"; zero-width characters are
    /// normalized to a blank cell that keeps the surrounding background.
    pub codepoint: u32,
    pub fg: [u8; 3],
    pub bg: [u8; 3],
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strikethrough: bool,
    pub inverse: bool,
    pub blink: bool,
    pub dim: bool,
    /// `1` for a normal cell, `2` for the leading half of a wide character.
    pub width: u8,
    /// `0` means "no hyperlink".
    pub hyperlink_id: u16,
}

impl Cell {
    pub const BLANK: Cell = Cell {
        codepoint: 0,
        fg: [0, 0, 0],
        bg: [0, 0, 0],
        bold: false,
        italic: false,
        underline: false,
        strikethrough: false,
        inverse: false,
        blink: false,
        dim: false,
        width: 1,
        hyperlink_id: 0,
    };

    fn flag_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.bold {
            flags |= 1 << 0;
        }
        if self.italic {
            flags |= 1 << 1;
        }
        if self.underline {
            flags |= 1 << 2;
        }
        if self.strikethrough {
            flags |= 1 << 3;
        }
        if self.inverse {
            flags |= 1 << 4;
        }
        if self.blink {
            flags |= 1 << 5;
        }
        if self.dim {
            flags |= 1 << 6;
        }
        flags
    }

    fn from_flag_byte(flags: u8) -> (bool, bool, bool, bool, bool, bool, bool) {
        (
            flags & (1 << 0) != 0,
            flags & (1 << 1) != 0,
            flags & (1 << 2) != 0,
            flags & (1 << 3) != 0,
            flags & (1 << 4) != 0,
            flags & (1 << 5) != 0,
            flags & (1 << 6) != 0,
        )
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::BLANK
    }
}

/// A single display row, exactly [`TerminalState::cols`] cells long.
pub type Row = Vec<Cell>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStyle {
    Block,
    Underline,
    Bar,
}

impl CursorStyle {
    fn to_byte(self) -> u8 {
        match self {
            CursorStyle::Block => 0,
            CursorStyle::Underline => 1,
            CursorStyle::Bar => 2,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => CursorStyle::Underline,
            2 => CursorStyle::Bar,
            _ => CursorStyle::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub x: u16,
    pub y: u16,
    pub visible: bool,
    pub style: CursorStyle,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            visible: true,
            style: CursorStyle::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseTracking {
    None,
    Normal,   // 1000
    ButtonEvent, // 1002
    AnyEvent, // 1003
}

impl MouseTracking {
    fn to_byte(self) -> u8 {
        match self {
            MouseTracking::None => 0,
            MouseTracking::Normal => 1,
            MouseTracking::ButtonEvent => 2,
            MouseTracking::AnyEvent => 3,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => MouseTracking::Normal,
            2 => MouseTracking::ButtonEvent,
            3 => MouseTracking::AnyEvent,
            _ => MouseTracking::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKeyMode {
    Normal,
    Application,
}

impl CursorKeyMode {
    fn to_byte(self) -> u8 {
        match self {
            CursorKeyMode::Normal => 0,
            CursorKeyMode::Application => 1,
        }
    }

    fn from_byte(byte: u8) -> Self {
        if byte == 1 {
            CursorKeyMode::Application
        } else {
            CursorKeyMode::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modes {
    pub alternate_screen: bool,
    pub mouse_tracking: MouseTracking,
    pub cursor_key_mode: CursorKeyMode,
    pub in_band_resize: bool,
    pub kitty_keyboard_flags: u8,
}

impl Default for Modes {
    fn default() -> Self {
        Self {
            alternate_screen: false,
            mouse_tracking: MouseTracking::None,
            cursor_key_mode: CursorKeyMode::Normal,
            in_band_resize: false,
            kitty_keyboard_flags: 0,
        }
    }
}

impl Modes {
    /// Whether any field that gates a `ptyUpdate` mode-change callback
    /// differs from `other` (hyperlink/kitty flags are not included).
    pub fn differs_for_callback(&self, other: &Modes) -> bool {
        self.alternate_screen != other.alternate_screen
            || self.mouse_tracking != other.mouse_tracking
            || self.cursor_key_mode != other.cursor_key_mode
            || self.in_band_resize != other.in_band_resize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalState {
    pub cols: u16,
    pub rows: u16,
    pub cells: Vec<Row>,
    pub cursor: Cursor,
    pub modes: Modes,
}

impl TerminalState {
    pub fn blank(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            cells: vec![vec![Cell::BLANK; cols as usize]; rows as usize],
            cursor: Cursor::default(),
            modes: Modes::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollState {
    pub viewport_offset: usize,
    pub scrollback_length: usize,
    pub is_at_bottom: bool,
    pub is_at_scrollback_limit: bool,
}

impl ScrollState {
    pub fn new(viewport_offset: usize, scrollback_length: usize, limit: usize) -> Self {
        Self {
            viewport_offset,
            scrollback_length,
            is_at_bottom: viewport_offset == 0,
            is_at_scrollback_limit: scrollback_length >= limit,
        }
    }
}

/// A minimal delta of rows changed since the last update, with optional full
/// state on forced refresh. `is_full ⇒ full_state.is_some() && dirty_rows
/// empty`; `¬is_full ⇒ full_state.is_none()`.
#[derive(Debug, Clone)]
pub struct DirtyUpdate {
    pub dirty_rows: BTreeMap<u16, Row>,
    pub cursor: Cursor,
    pub scroll_state: ScrollState,
    pub cols: u16,
    pub rows: u16,
    pub is_full: bool,
    pub full_state: Option<TerminalState>,
    pub modes: Modes,
}

impl DirtyUpdate {
    pub fn empty(cursor: Cursor, scroll_state: ScrollState, cols: u16, rows: u16, modes: Modes) -> Self {
        Self {
            dirty_rows: BTreeMap::new(),
            cursor,
            scroll_state,
            cols,
            rows,
            is_full: false,
            full_state: None,
            modes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_state_has_exact_dimensions() {
        let state = TerminalState::blank(80, 24);
        assert_eq!(state.cells.len(), 24);
        assert!(state.cells.iter().all(|row| row.len() == 80));
    }

    #[test]
    fn scroll_state_at_bottom_iff_zero_offset() {
        let at_bottom = ScrollState::new(0, 500, 10_000);
        assert!(at_bottom.is_at_bottom);
        let scrolled = ScrollState::new(3, 500, 10_000);
        assert!(!scrolled.is_at_bottom);
    }

    #[test]
    fn modes_differ_for_callback_ignores_kitty_flags() {
        let a = Modes::default();
        let mut b = Modes::default();
        b.kitty_keyboard_flags = 5;
        assert!(!a.differs_for_callback(&b));
        b.alternate_screen = true;
        assert!(a.differs_for_callback(&b));
    }
}
