//! Wraps a `vt100::Parser` with everything it doesn't provide: a cell model
//! that packs to the wire format, dirty-row diffing, scrollback mirroring
//! into a bounded ring plus LRU cache, title extraction, mode bits vt100
//! doesn't track, and observer dispatch for title/update/mode-change events.

use std::collections::BTreeMap;

use crate::cell::{
    Cell, Cursor, CursorKeyMode, CursorStyle, DirtyUpdate, Modes, MouseTracking, Row, ScrollState, TerminalState,
};
use crate::observer::ObserverList;
use crate::scrollback::{LineCache, ScrollbackRing};

use super::color_scheme::ColorScheme;
use super::modes::ModeTracker;
use super::osc_filter::OscFilter;
use super::query_responder::QueryContext;
use super::title_parser::TitleParser;

type TitleCallback = Box<dyn FnMut(&str) + Send>;
type UpdateCallback = Box<dyn FnMut(&DirtyUpdate) + Send>;
type ModeCallback = Box<dyn FnMut(&Modes) + Send>;

pub struct Emulator {
    parser: vt100::Parser,
    cols: u16,
    rows: u16,
    pixel_width: u16,
    pixel_height: u16,
    mode_tracker: ModeTracker,
    title_parser: TitleParser,
    osc_filter: OscFilter,
    colors: ColorScheme,
    scrollback: ScrollbackRing,
    line_cache: LineCache,
    known_scrollback_total: usize,
    prev_snapshot: Option<Vec<Row>>,
    update_enabled: bool,
    on_title: ObserverList<TitleCallback>,
    on_update: ObserverList<UpdateCallback>,
    on_mode_change: ObserverList<ModeCallback>,
}

impl Emulator {
    pub fn new(cols: u16, rows: u16, hot_scrollback_limit: usize, line_cache_capacity: usize) -> Self {
        Self {
            parser: vt100::Parser::new(rows, cols, hot_scrollback_limit),
            cols,
            rows,
            pixel_width: 0,
            pixel_height: 0,
            mode_tracker: ModeTracker::new(),
            title_parser: TitleParser::new(),
            osc_filter: OscFilter::new(),
            colors: ColorScheme::default(),
            scrollback: ScrollbackRing::new(hot_scrollback_limit),
            line_cache: LineCache::new(line_cache_capacity),
            known_scrollback_total: 0,
            prev_snapshot: None,
            update_enabled: true,
            on_title: ObserverList::new(),
            on_update: ObserverList::new(),
            on_mode_change: ObserverList::new(),
        }
    }

    /// Feeds raw PTY output. Title extraction and mode tracking see the
    /// unfiltered stream; the parser itself only sees it with problematic
    /// OSC sequences stripped.
    pub fn write(&mut self, bytes: &[u8]) {
        self.mode_tracker.scan(bytes);

        for title in self.title_parser.feed(bytes) {
            self.dispatch_title(&title);
        }

        let previous_modes = self.current_modes();
        let filtered = self.osc_filter.feed(bytes);
        self.parser.process(&filtered);
        self.sync_scrollback();

        let new_modes = self.current_modes();
        if previous_modes.differs_for_callback(&new_modes) {
            self.dispatch_mode_change(&new_modes);
        }

        if self.update_enabled {
            let update = self.get_dirty_update(0);
            self.dispatch_update(&update);
        }
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.parser.screen_mut().set_size(rows, cols);
        self.cols = cols;
        self.rows = rows;
        self.line_cache.invalidate_all();
        self.prev_snapshot = None;
    }

    pub fn set_pixel_size(&mut self, width: u16, height: u16) {
        self.pixel_width = width;
        self.pixel_height = height;
    }

    pub fn pixel_size(&self) -> (u16, u16) {
        (self.pixel_width, self.pixel_height)
    }

    pub fn reset(&mut self) {
        let limit = self.scrollback.limit();
        self.parser = vt100::Parser::new(self.rows, self.cols, limit);
        self.mode_tracker = ModeTracker::new();
        self.title_parser = TitleParser::new();
        self.osc_filter = OscFilter::new();
        self.scrollback.clear();
        self.line_cache.invalidate_all();
        self.known_scrollback_total = 0;
        self.prev_snapshot = None;
    }

    pub fn set_update_enabled(&mut self, enabled: bool) {
        self.update_enabled = enabled;
    }

    pub fn set_colors(&mut self, default_fg: [u8; 3], default_bg: [u8; 3]) {
        self.colors.set_colors(default_fg, default_bg);
        self.line_cache.invalidate_all();
        self.prev_snapshot = None;
    }

    pub fn get_terminal_state(&self) -> TerminalState {
        TerminalState {
            cols: self.cols,
            rows: self.rows,
            cells: (0..self.rows).map(|r| self.extract_row(r)).collect(),
            cursor: self.cursor(),
            modes: self.current_modes(),
        }
    }

    /// Diffs the live grid against the last-observed snapshot. `viewport_offset`
    /// only affects the reported [`ScrollState`]; dirty rows always describe the
    /// live screen, since a scrolled-back view is read via
    /// [`Emulator::get_scrollback_line`] instead.
    pub fn get_dirty_update(&mut self, viewport_offset: usize) -> DirtyUpdate {
        let cursor = self.cursor();
        let modes = self.current_modes();
        let scroll_state = ScrollState::new(viewport_offset, self.scrollback.length(), self.scrollback.limit());
        let current: Vec<Row> = (0..self.rows).map(|r| self.extract_row(r)).collect();

        let mut dirty_rows = BTreeMap::new();
        let mut is_full = false;
        match &self.prev_snapshot {
            Some(prev) if prev.len() == current.len() => {
                for (i, (old, new)) in prev.iter().zip(current.iter()).enumerate() {
                    if old != new {
                        dirty_rows.insert(i as u16, new.clone());
                    }
                }
            }
            _ => {
                // No prior snapshot, or the row count changed (a resize):
                // every row counts as dirty, but the caller needs the full
                // state rather than a per-row diff to rebuild from scratch.
                is_full = true;
                for (i, row) in current.iter().enumerate() {
                    dirty_rows.insert(i as u16, row.clone());
                }
            }
        }
        self.prev_snapshot = Some(current.clone());

        let full_state = is_full.then(|| TerminalState {
            cols: self.cols,
            rows: self.rows,
            cells: current,
            cursor,
            modes,
        });

        DirtyUpdate {
            dirty_rows,
            cursor,
            scroll_state,
            cols: self.cols,
            rows: self.rows,
            is_full,
            full_state,
            modes,
        }
    }

    pub fn scrollback_length(&self) -> usize {
        self.scrollback.length()
    }

    pub fn scrollback_limit(&self) -> usize {
        self.scrollback.limit()
    }

    pub fn get_scrollback_line(&mut self, offset: usize) -> Option<Row> {
        if let Some(row) = self.line_cache.get(offset) {
            return Some(row);
        }
        let row = self.scrollback.get_line(offset)?.row.clone();
        self.line_cache.insert(offset, row.clone());
        Some(row)
    }

    pub fn on_title_change(&mut self, callback: TitleCallback) -> u64 {
        self.on_title.insert(callback)
    }

    pub fn on_update(&mut self, callback: UpdateCallback) -> u64 {
        self.on_update.insert(callback)
    }

    pub fn on_mode_change(&mut self, callback: ModeCallback) -> u64 {
        self.on_mode_change.insert(callback)
    }

    pub fn unsubscribe_title(&mut self, id: u64) {
        self.on_title.remove(id);
    }

    pub fn unsubscribe_update(&mut self, id: u64) {
        self.on_update.remove(id);
    }

    pub fn unsubscribe_mode_change(&mut self, id: u64) {
        self.on_mode_change.remove(id);
    }

    fn dispatch_title(&mut self, title: &str) {
        for id in self.on_title.ids() {
            if let Some(cb) = self.on_title.get_mut(id) {
                cb(title);
            }
        }
    }

    fn dispatch_update(&mut self, update: &DirtyUpdate) {
        for id in self.on_update.ids() {
            if let Some(cb) = self.on_update.get_mut(id) {
                cb(update);
            }
        }
    }

    fn dispatch_mode_change(&mut self, modes: &Modes) {
        for id in self.on_mode_change.ids() {
            if let Some(cb) = self.on_mode_change.get_mut(id) {
                cb(modes);
            }
        }
    }

    fn cursor(&self) -> Cursor {
        let screen = self.parser.screen();
        let (row, col) = screen.cursor_position();
        Cursor {
            x: col,
            y: row,
            visible: !screen.hide_cursor(),
            style: CursorStyle::Block,
        }
    }

    fn current_modes(&self) -> Modes {
        let screen = self.parser.screen();
        Modes {
            alternate_screen: screen.alternate_screen(),
            mouse_tracking: mouse_tracking_from_vt100(screen.mouse_protocol_mode()),
            cursor_key_mode: if screen.application_cursor() {
                CursorKeyMode::Application
            } else {
                CursorKeyMode::Normal
            },
            in_band_resize: self.mode_tracker.in_band_resize(),
            kitty_keyboard_flags: self.mode_tracker.kitty_keyboard_flags(),
        }
    }

    fn extract_row(&self, row_idx: u16) -> Row {
        (0..self.cols)
            .map(|col| {
                self.parser
                    .screen()
                    .cell(row_idx, col)
                    .map(|cell| self.convert_cell(cell))
                    .unwrap_or(Cell::BLANK)
            })
            .collect()
    }

    fn convert_cell(&self, cell: &vt100::Cell) -> Cell {
        let codepoint = normalize_codepoint(cell.contents().chars().next());
        Cell {
            codepoint,
            fg: self.colors.resolve_fg(cell.fgcolor()),
            bg: self.colors.resolve_bg(cell.bgcolor()),
            bold: cell.bold(),
            italic: cell.italic(),
            underline: cell.underline(),
            // Not exposed by the underlying parser; documented gap.
            strikethrough: false,
            inverse: cell.inverse(),
            blink: false,
            dim: cell.dim(),
            width: if cell.is_wide() { 2 } else { 1 },
            hyperlink_id: 0,
        }
    }

    /// Pulls newly scrolled-off lines out of the parser's own scrollback and
    /// mirrors them into the ring + cache. The parser doesn't expose a
    /// "current total scrollback length" directly, so this discovers it by
    /// asking the parser to clamp an out-of-range offset, then restores the
    /// caller's viewport.
    fn sync_scrollback(&mut self) {
        let original_offset = self.parser.screen().scrollback();
        self.parser.screen_mut().set_scrollback(usize::MAX);
        let total = self.parser.screen().scrollback();
        self.parser.screen_mut().set_scrollback(original_offset);

        while self.known_scrollback_total < total {
            let depth_from_bottom = total - self.known_scrollback_total;
            self.parser.screen_mut().set_scrollback(depth_from_bottom);
            let row = self.extract_row(0);
            // Best-effort wrap detection: a scrolled-off line whose last
            // column was written to (rather than left blank) most likely
            // continued onto the next row rather than ending on a newline.
            let wrapped = self
                .parser
                .screen()
                .cell(0, self.cols.saturating_sub(1))
                .is_some_and(|c| !c.contents().is_empty());
            self.parser.screen_mut().set_scrollback(original_offset);

            if self.scrollback.append_line(row, wrapped) {
                // The ring dropped its oldest line, so every offset the
                // cache holds now refers to a different line.
                self.line_cache.invalidate_all();
            }
            self.known_scrollback_total += 1;
        }
    }
}

impl QueryContext for Emulator {
    fn cursor(&self) -> (u16, u16) {
        let c = Emulator::cursor(self);
        (c.y, c.x)
    }

    fn kitty_keyboard_flags(&self) -> u8 {
        self.mode_tracker.kitty_keyboard_flags()
    }

    fn decrqm_value(&self, mode: u32) -> u8 {
        match mode {
            2048 => decrqm_bit(self.mode_tracker.in_band_resize()),
            1049 | 47 | 1047 => decrqm_bit(self.parser.screen().alternate_screen()),
            25 => decrqm_bit(!self.parser.screen().hide_cursor()),
            1000 => decrqm_bit(self.current_modes().mouse_tracking == MouseTracking::Normal),
            1002 => decrqm_bit(self.current_modes().mouse_tracking == MouseTracking::ButtonEvent),
            1003 => decrqm_bit(self.current_modes().mouse_tracking == MouseTracking::AnyEvent),
            // Not tracked anywhere in this emulator; always report "reset"
            // rather than "not recognized" since these are real, documented
            // DEC private modes a guest may legitimately probe.
            1 | 7 | 12 | 1004 | 1006 | 2004 | 2026 => decrqm_bit(false),
            _ => 0,
        }
    }

    fn foreground_color(&self) -> (u8, u8, u8) {
        let [r, g, b] = self.colors.default_fg();
        (r, g, b)
    }

    fn background_color(&self) -> (u8, u8, u8) {
        let [r, g, b] = self.colors.default_bg();
        (r, g, b)
    }
}

/// Reduces a cell's leading character to the wire codepoint, folding
/// anything that shouldn't render as a glyph down to `0` (blank) rather than
/// passing it through to the client: C0/C1 controls, the replacement
/// character (a parse error, not real guest content), noncharacters, and
/// zero-width formatting characters that would otherwise occupy a cell with
/// no visible glyph.
fn normalize_codepoint(c: Option<char>) -> u32 {
    let Some(c) = c else { return 0 };
    let cp = c as u32;

    if cp < 0x20 || (0x7f..=0x9f).contains(&cp) {
        return 0;
    }
    if cp == 0xfffd {
        return 0;
    }
    if is_noncharacter(cp) {
        return 0;
    }
    if is_zero_width(cp) {
        return 0;
    }
    cp
}

fn is_noncharacter(cp: u32) -> bool {
    (0xfdd0..=0xfdef).contains(&cp) || (cp & 0xfffe) == 0xfffe
}

/// Combining marks, directional/format controls, and zero-width joiners:
/// characters with no width of their own that `vt100` still hands back as a
/// cell's sole content.
fn is_zero_width(cp: u32) -> bool {
    matches!(cp,
        0x0300..=0x036f
            | 0x200b..=0x200f
            | 0x202a..=0x202e
            | 0x2060..=0x2064
            | 0xfeff
    )
}

fn decrqm_bit(set: bool) -> u8 {
    if set {
        1
    } else {
        2
    }
}

fn mouse_tracking_from_vt100(mode: vt100::MouseProtocolMode) -> MouseTracking {
    match mode {
        vt100::MouseProtocolMode::None => MouseTracking::None,
        vt100::MouseProtocolMode::Press => MouseTracking::Normal,
        vt100::MouseProtocolMode::PressRelease => MouseTracking::Normal,
        vt100::MouseProtocolMode::ButtonMotion => MouseTracking::ButtonEvent,
        vt100::MouseProtocolMode::AnyMotion => MouseTracking::AnyEvent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn emulator() -> Emulator {
        Emulator::new(10, 3, 100, 50)
    }

    #[test]
    fn write_updates_cursor_and_dirty_rows() {
        let mut emu = emulator();
        emu.write(b"hi");
        let update = emu.get_dirty_update(0);
        assert_eq!(update.cursor.x, 2);
        assert_eq!(update.cursor.y, 0);
        assert!(update.dirty_rows.contains_key(&0));
    }

    #[test]
    fn second_dirty_update_only_reports_changed_rows() {
        let mut emu = emulator();
        emu.write(b"hi");
        let _ = emu.get_dirty_update(0);
        emu.write(b"\r\n");
        let update = emu.get_dirty_update(0);
        assert!(!update.dirty_rows.contains_key(&0));
        assert!(update.dirty_rows.contains_key(&1));
    }

    #[test]
    fn title_observer_fires_on_osc_title() {
        let mut emu = emulator();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        emu.on_title_change(Box::new(move |t| seen2.lock().unwrap().push(t.to_string())));
        emu.write(b"\x1b]0;hello\x07");
        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn resize_changes_dimensions_and_invalidates_cache() {
        let mut emu = emulator();
        emu.resize(20, 5);
        let state = emu.get_terminal_state();
        assert_eq!(state.cols, 20);
        assert_eq!(state.rows, 5);
    }

    #[test]
    fn update_callback_is_skipped_when_disabled() {
        let mut emu = emulator();
        let count = Arc::new(Mutex::new(0));
        let count2 = Arc::clone(&count);
        emu.on_update(Box::new(move |_| *count2.lock().unwrap() += 1));
        emu.set_update_enabled(false);
        emu.write(b"hi");
        assert_eq!(*count.lock().unwrap(), 0);
        emu.set_update_enabled(true);
        emu.write(b"!");
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn in_band_resize_mode_is_tracked_and_triggers_mode_change() {
        let mut emu = emulator();
        let fired = Arc::new(Mutex::new(false));
        let fired2 = Arc::clone(&fired);
        emu.on_mode_change(Box::new(move |_| *fired2.lock().unwrap() = true));
        emu.write(b"\x1b[?2048h");
        assert!(emu.current_modes().in_band_resize);
        assert!(*fired.lock().unwrap());
    }

    #[test]
    fn query_context_reports_cursor_position() {
        let mut emu = emulator();
        emu.write(b"abc");
        assert_eq!(QueryContext::cursor(&emu), (0, 3));
    }
}
