//! Intercepts the host's stdin before any other consumer.
//!
//! Pasted text arriving on stdin is chunked and sometimes mangled by the
//! outer terminal, so rather than trust it the gate treats `ESC[200~` as a
//! trigger to read the system clipboard directly (always complete) and
//! swallows everything up to the matching `ESC[201~`. It also recognizes
//! `ESC[?997;{1|2}n` color-scheme reports, strips them, and reports which
//! scheme the host is running.

const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";
const COLOR_REPORT_LIGHT: &[u8] = b"\x1b[?997;1n";
const COLOR_REPORT_DARK: &[u8] = b"\x1b[?997;2n";
const CANDIDATES: &[&[u8]] = &[PASTE_START, COLOR_REPORT_LIGHT, COLOR_REPORT_DARK];

/// An event surfaced by [`PasteGate::feed`] for the caller to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteEvent {
    /// The guest is ready to receive a paste; read the system clipboard and
    /// write it back wrapped in bracketed-paste markers via `encode_paste`.
    ClipboardRead,
    /// The host reported its color scheme.
    ColorScheme(HostColorScheme),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostColorScheme {
    Light,
    Dark,
}

/// Streaming state machine with carry-over so a marker split across two
/// `feed` calls still resolves correctly.
#[derive(Default)]
pub struct PasteGate {
    in_paste: bool,
    pending: Vec<u8>,
}

impl PasteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans `bytes`, returning the stream with paste content and
    /// color-scheme queries stripped, plus any [`PasteEvent`]s raised.
    pub fn feed(&mut self, bytes: &[u8]) -> (Vec<u8>, Vec<PasteEvent>) {
        let mut out = Vec::new();
        let mut events = Vec::new();

        for &b in bytes {
            if self.in_paste {
                self.pending.push(b);
                if self.pending.as_slice() == PASTE_END {
                    self.in_paste = false;
                    self.pending.clear();
                } else if !PASTE_END.starts_with(self.pending.as_slice()) {
                    self.pending.clear();
                }
                continue;
            }

            if self.pending.is_empty() && b != 0x1b {
                out.push(b);
                continue;
            }
            self.pending.push(b);

            if self.pending.as_slice() == PASTE_START {
                events.push(PasteEvent::ClipboardRead);
                self.in_paste = true;
                self.pending.clear();
                continue;
            }
            if self.pending.as_slice() == COLOR_REPORT_LIGHT {
                events.push(PasteEvent::ColorScheme(HostColorScheme::Light));
                self.pending.clear();
                continue;
            }
            if self.pending.as_slice() == COLOR_REPORT_DARK {
                events.push(PasteEvent::ColorScheme(HostColorScheme::Dark));
                self.pending.clear();
                continue;
            }

            if !CANDIDATES.iter().any(|c| c.starts_with(self.pending.as_slice())) {
                out.extend_from_slice(&self.pending);
                self.pending.clear();
            }
        }
        (out, events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_paste_triggers_clipboard_read_and_swallows_content() {
        let mut gate = PasteGate::new();
        let (out, events) = gate.feed(b"before\x1b[200~pasted junk\x1b[201~after");
        assert_eq!(out, b"beforeafter".to_vec());
        assert_eq!(events, vec![PasteEvent::ClipboardRead]);
    }

    #[test]
    fn strips_color_scheme_report_and_reports_dark() {
        let mut gate = PasteGate::new();
        let (out, events) = gate.feed(b"A\x1b[?997;2nB");
        assert_eq!(out, b"AB".to_vec());
        assert_eq!(events, vec![PasteEvent::ColorScheme(HostColorScheme::Dark)]);
    }

    #[test]
    fn plain_text_passes_through_unchanged() {
        let mut gate = PasteGate::new();
        let (out, events) = gate.feed(b"just some plain output");
        assert_eq!(out, b"just some plain output".to_vec());
        assert!(events.is_empty());
    }

    #[test]
    fn near_miss_prefix_is_not_swallowed() {
        let mut gate = PasteGate::new();
        let (out, events) = gate.feed(b"\x1b[200X");
        assert_eq!(out, b"\x1b[200X".to_vec());
        assert!(events.is_empty());
    }

    #[test]
    fn paste_start_split_across_chunks_still_resolves() {
        let mut gate = PasteGate::new();
        let (out1, events1) = gate.feed(b"\x1b[20");
        let (out2, events2) = gate.feed(b"0~hidden\x1b[201~visible");
        assert!(out1.is_empty());
        assert_eq!(out2, b"visible".to_vec());
        assert!(events1.is_empty());
        assert_eq!(events2, vec![PasteEvent::ClipboardRead]);
    }

    #[test]
    fn near_miss_end_marker_while_in_paste_stays_swallowed() {
        let mut gate = PasteGate::new();
        let (out, events) = gate.feed(b"\x1b[200~abc\x1b[202~def\x1b[201~end");
        assert_eq!(out, b"end".to_vec());
        assert_eq!(events, vec![PasteEvent::ClipboardRead]);
    }
}
