//! Converts normal-mode key and mouse events into the byte sequences a PTY
//! guest expects, honoring cursor-key mode, the Kitty keyboard protocol, and
//! bracketed paste.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};

use crate::cell::CursorKeyMode;
use crate::geometry::Rectangle;

const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";

/// Wraps `text` in bracketed-paste markers when the guest has asked for them,
/// otherwise sends it unmarked.
pub fn encode_paste(text: &str, bracketed_paste_enabled: bool) -> Vec<u8> {
    if !bracketed_paste_enabled {
        return text.as_bytes().to_vec();
    }
    let mut bytes = Vec::with_capacity(text.len() + PASTE_START.len() + PASTE_END.len());
    bytes.extend_from_slice(PASTE_START);
    bytes.extend_from_slice(text.as_bytes());
    bytes.extend_from_slice(PASTE_END);
    bytes
}

/// Encodes a key event, routing arrow/Home/End through the application
/// sequences when `cursor_key_mode` is [`CursorKeyMode::Application`] and
/// through the Kitty keyboard protocol's `CSI u` form when
/// `kitty_keyboard_flags != 0`.
pub fn encode_key(key: KeyEvent, cursor_key_mode: CursorKeyMode, kitty_keyboard_flags: u8) -> Vec<u8> {
    if kitty_keyboard_flags != 0 {
        if let Some(bytes) = encode_kitty(key) {
            return bytes;
        }
    }

    let app = cursor_key_mode == CursorKeyMode::Application;
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    match key.code {
        KeyCode::Enter => vec![b'\r'],
        KeyCode::Tab => vec![b'\t'],
        KeyCode::BackTab => vec![0x1b, b'[', b'Z'],
        KeyCode::Backspace => vec![0x7f],
        KeyCode::Esc => vec![0x1b],

        KeyCode::Up => cursor_sequence(app, b'A'),
        KeyCode::Down => cursor_sequence(app, b'B'),
        KeyCode::Right => cursor_sequence(app, b'C'),
        KeyCode::Left => cursor_sequence(app, b'D'),

        KeyCode::Home => cursor_sequence(app, b'H'),
        KeyCode::End => cursor_sequence(app, b'F'),
        KeyCode::PageUp => vec![0x1b, b'[', b'5', b'~'],
        KeyCode::PageDown => vec![0x1b, b'[', b'6', b'~'],
        KeyCode::Insert => vec![0x1b, b'[', b'2', b'~'],
        KeyCode::Delete => vec![0x1b, b'[', b'3', b'~'],

        KeyCode::F(1) => vec![0x1b, b'O', b'P'],
        KeyCode::F(2) => vec![0x1b, b'O', b'Q'],
        KeyCode::F(3) => vec![0x1b, b'O', b'R'],
        KeyCode::F(4) => vec![0x1b, b'O', b'S'],
        KeyCode::F(5) => vec![0x1b, b'[', b'1', b'5', b'~'],
        KeyCode::F(6) => vec![0x1b, b'[', b'1', b'7', b'~'],
        KeyCode::F(7) => vec![0x1b, b'[', b'1', b'8', b'~'],
        KeyCode::F(8) => vec![0x1b, b'[', b'1', b'9', b'~'],
        KeyCode::F(9) => vec![0x1b, b'[', b'2', b'0', b'~'],
        KeyCode::F(10) => vec![0x1b, b'[', b'2', b'1', b'~'],
        KeyCode::F(11) => vec![0x1b, b'[', b'2', b'3', b'~'],
        KeyCode::F(12) => vec![0x1b, b'[', b'2', b'4', b'~'],
        KeyCode::F(_) => vec![],

        KeyCode::Char(c) => {
            if ctrl {
                if c.is_ascii_alphabetic() {
                    vec![(c.to_ascii_lowercase() as u8) - b'a' + 1]
                } else {
                    vec![]
                }
            } else if alt {
                let mut bytes = vec![0x1b];
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                bytes
            } else {
                let mut buf = [0u8; 4];
                c.encode_utf8(&mut buf).as_bytes().to_vec()
            }
        }

        KeyCode::Null => vec![0],
        _ => vec![],
    }
}

fn cursor_sequence(application: bool, final_byte: u8) -> Vec<u8> {
    if application {
        vec![0x1b, b'O', final_byte]
    } else {
        vec![0x1b, b'[', final_byte]
    }
}

/// `CSI {codepoint} u` per the Kitty keyboard protocol's basic form. Only
/// plain character keys are remapped; navigation/control keys keep their
/// legacy sequences since the protocol treats those the same way.
fn encode_kitty(key: KeyEvent) -> Option<Vec<u8>> {
    if let KeyCode::Char(c) = key.code {
        if !key.modifiers.contains(KeyModifiers::CONTROL) && !key.modifiers.contains(KeyModifiers::ALT) {
            return None; // falls through to the legacy path, which is already correct
        }
        let codepoint = c as u32;
        let mut modifier_bits = 1u8;
        if key.modifiers.contains(KeyModifiers::SHIFT) {
            modifier_bits += 1;
        }
        if key.modifiers.contains(KeyModifiers::ALT) {
            modifier_bits += 2;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            modifier_bits += 4;
        }
        return Some(format!("\x1b[{};{}u", codepoint, modifier_bits).into_bytes());
    }
    None
}

/// SGR mouse encoding (`CSI < button ; col ; row M|m`), with coordinates
/// translated to be relative to `content_area` and 1-indexed. Returns `None`
/// when the event falls outside the area.
pub fn encode_mouse(mouse: MouseEvent, content_area: Rectangle) -> Option<Vec<u8>> {
    let (col, row) = content_area.to_relative_1indexed(mouse.column, mouse.row)?;

    let (button, is_release) = match mouse.kind {
        MouseEventKind::Down(btn) => (button_code(btn), false),
        MouseEventKind::Up(btn) => (button_code(btn), true),
        MouseEventKind::Drag(btn) => (button_code(btn) + 32, false),
        MouseEventKind::ScrollUp => (64, false),
        MouseEventKind::ScrollDown => (65, false),
        MouseEventKind::ScrollLeft => (66, false),
        MouseEventKind::ScrollRight => (67, false),
        MouseEventKind::Moved => (35, false),
    };

    let mut final_button = button;
    if mouse.modifiers.contains(KeyModifiers::SHIFT) {
        final_button += 4;
    }
    if mouse.modifiers.contains(KeyModifiers::ALT) {
        final_button += 8;
    }
    if mouse.modifiers.contains(KeyModifiers::CONTROL) {
        final_button += 16;
    }

    let suffix = if is_release { 'm' } else { 'M' };
    Some(format!("\x1b[<{};{};{}{}", final_button, col, row, suffix).into_bytes())
}

fn button_code(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_and_plain_char() {
        assert_eq!(
            encode_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE), CursorKeyMode::Normal, 0),
            vec![b'\r']
        );
        assert_eq!(
            encode_key(KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE), CursorKeyMode::Normal, 0),
            vec![b'a']
        );
    }

    #[test]
    fn ctrl_c_is_0x03() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(encode_key(key, CursorKeyMode::Normal, 0), vec![0x03]);
    }

    #[test]
    fn arrow_up_switches_with_cursor_key_mode() {
        let key = KeyEvent::new(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(encode_key(key, CursorKeyMode::Normal, 0), vec![0x1b, b'[', b'A']);
        assert_eq!(encode_key(key, CursorKeyMode::Application, 0), vec![0x1b, b'O', b'A']);
    }

    #[test]
    fn kitty_protocol_encodes_ctrl_combos_as_csi_u() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(encode_key(key, CursorKeyMode::Normal, 1), b"\x1b[99;5u".to_vec());
    }

    #[test]
    fn kitty_protocol_falls_back_to_legacy_for_plain_chars() {
        let key = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(encode_key(key, CursorKeyMode::Normal, 1), vec![b'a']);
    }

    #[test]
    fn paste_wraps_only_when_bracketed_paste_is_enabled() {
        assert_eq!(encode_paste("hi", true), b"\x1b[200~hi\x1b[201~".to_vec());
        assert_eq!(encode_paste("hi", false), b"hi".to_vec());
    }

    #[test]
    fn mouse_outside_content_area_is_none() {
        let area = Rectangle::new(0, 0, 10, 10);
        let mouse = MouseEvent {
            kind: MouseEventKind::Moved,
            column: 20,
            row: 20,
            modifiers: KeyModifiers::NONE,
        };
        assert!(encode_mouse(mouse, area).is_none());
    }

    #[test]
    fn mouse_scroll_up_encodes_sgr() {
        let area = Rectangle::new(0, 0, 10, 10);
        let mouse = MouseEvent {
            kind: MouseEventKind::ScrollUp,
            column: 2,
            row: 3,
            modifiers: KeyModifiers::NONE,
        };
        assert_eq!(encode_mouse(mouse, area).unwrap(), b"\x1b[<64;3;4M".to_vec());
    }
}
