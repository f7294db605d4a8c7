//! Streaming OSC 0/1/2 title extractor.
//!
//! Chunk-safe: internal buffers hold a partial code or text field across
//! `feed()` calls, so `feed` on any chunking of a byte stream yields the
//! same sequence of titles as feeding it whole.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InSequenceReadingCode,
    InSequenceReadingText,
}

/// Streaming parser for `OSC {0|1|2} ; text (BEL | ESC \)`.
pub struct TitleParser {
    state: State,
    code_buf: String,
    text_buf: String,
    saw_escape: bool,
}

impl Default for TitleParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TitleParser {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            code_buf: String::new(),
            text_buf: String::new(),
            saw_escape: false,
        }
    }

    /// Feeds a chunk of bytes, returning every title completed within it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut titles = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let byte = bytes[i];
            match self.state {
                State::Idle => {
                    if byte == 0x1b && bytes.get(i + 1) == Some(&b']') {
                        self.state = State::InSequenceReadingCode;
                        self.code_buf.clear();
                        i += 1; // consume the ']' too, below
                    }
                }
                State::InSequenceReadingCode => {
                    if byte == b';' {
                        if matches!(self.code_buf.as_str(), "0" | "1" | "2") {
                            self.state = State::InSequenceReadingText;
                            self.text_buf.clear();
                        } else {
                            self.state = State::Idle;
                        }
                    } else if byte.is_ascii_digit() {
                        self.code_buf.push(byte as char);
                    } else {
                        // Invalid character inside the code field: abort silently.
                        self.state = State::Idle;
                    }
                }
                State::InSequenceReadingText => {
                    if byte == 0x07 {
                        titles.push(std::mem::take(&mut self.text_buf));
                        self.state = State::Idle;
                    } else if byte == 0x1b {
                        self.saw_escape = true;
                    } else if self.saw_escape {
                        self.saw_escape = false;
                        if byte == b'\\' {
                            titles.push(std::mem::take(&mut self.text_buf));
                        } else {
                            // Not a valid ST; treat the stray ESC and this
                            // byte as ordinary text rather than losing data.
                            self.text_buf.push(0x1b as char);
                            self.text_buf.push(byte as char);
                        }
                        self.state = State::Idle;
                    } else {
                        self.text_buf.push(byte as char);
                    }
                }
            }
            i += 1;
        }
        titles
    }
}
