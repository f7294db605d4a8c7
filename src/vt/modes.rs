//! Tracks the handful of mode bits the `vt100` dependency does not expose
//! through its own `Screen` API: in-band resize notifications and the Kitty
//! keyboard protocol's progressive-enhancement flags.
//!
//! Scans raw PTY output for the relevant CSI sequences as a side channel
//! alongside the main parser; it never needs to understand anything else in
//! the stream.

#[derive(Debug, Default)]
pub struct ModeTracker {
    in_band_resize: bool,
    kitty_keyboard_flags: u8,
}

impl ModeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_band_resize(&self) -> bool {
        self.in_band_resize
    }

    pub fn kitty_keyboard_flags(&self) -> u8 {
        self.kitty_keyboard_flags
    }

    /// Scans `bytes` for the sequences this tracker cares about. Bytes are
    /// not consumed or modified; this runs purely as an observer.
    pub fn scan(&mut self, bytes: &[u8]) {
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'[') {
                if let Some(consumed) = self.try_consume_csi(&bytes[i..]) {
                    i += consumed;
                    continue;
                }
            }
            i += 1;
        }
    }

    fn try_consume_csi(&mut self, seq: &[u8]) -> Option<usize> {
        // In-band resize: CSI ? 2048 h | l
        if let Some(rest) = seq.strip_prefix(b"\x1b[?2048") {
            if rest.starts_with(b"h") {
                self.in_band_resize = true;
                return Some(8);
            }
            if rest.starts_with(b"l") {
                self.in_band_resize = false;
                return Some(8);
            }
        }

        // Kitty keyboard: CSI > {flags} u (push/set), CSI < u (pop/reset), CSI = {flags} ; {mode} u
        if let Some(rest) = seq.strip_prefix(b"\x1b[>") {
            if let Some((digits, consumed)) = take_digits(rest) {
                if rest.get(consumed) == Some(&b'u') {
                    self.kitty_keyboard_flags = digits.min(u8::MAX as u32) as u8;
                    return Some(3 + consumed + 1);
                }
            }
        }
        if seq.starts_with(b"\x1b[<u") {
            self.kitty_keyboard_flags = 0;
            return Some(4);
        }
        if let Some(rest) = seq.strip_prefix(b"\x1b[=") {
            if let Some((digits, consumed)) = take_digits(rest) {
                if consumed > 0 && rest.get(consumed) == Some(&b'u') {
                    self.kitty_keyboard_flags = digits.min(u8::MAX as u32) as u8;
                    return Some(3 + consumed + 1);
                }
            }
        }

        None
    }
}

fn take_digits(buf: &[u8]) -> Option<(u32, usize)> {
    let end = buf.iter().position(|b| !b.is_ascii_digit()).unwrap_or(buf.len());
    if end == 0 {
        return None;
    }
    let value: u32 = std::str::from_utf8(&buf[..end]).ok()?.parse().ok()?;
    Some((value, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_in_band_resize_toggle() {
        let mut tracker = ModeTracker::new();
        tracker.scan(b"\x1b[?2048h");
        assert!(tracker.in_band_resize());
        tracker.scan(b"\x1b[?2048l");
        assert!(!tracker.in_band_resize());
    }

    #[test]
    fn tracks_kitty_keyboard_set_and_reset() {
        let mut tracker = ModeTracker::new();
        tracker.scan(b"\x1b[>5u");
        assert_eq!(tracker.kitty_keyboard_flags(), 5);
        tracker.scan(b"\x1b[<u");
        assert_eq!(tracker.kitty_keyboard_flags(), 0);
    }

    #[test]
    fn ignores_unrelated_sequences() {
        let mut tracker = ModeTracker::new();
        tracker.scan(b"\x1b[2J\x1b[H");
        assert!(!tracker.in_band_resize());
        assert_eq!(tracker.kitty_keyboard_flags(), 0);
    }
}
