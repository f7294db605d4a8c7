//! Strips OSC sequences the emulator handles elsewhere or must not forward,
//! while preserving the query form of color queries so the responder can
//! answer them.
//!
//! Stripped unconditionally: OSC 0/1/2 (title — extracted separately by
//! [`super::title_parser::TitleParser`]), OSC 7 (cwd), OSC 22/23/9/777
//! (window/notifications). Stripped only in the **set** form, `;?` form
//! preserved: OSC 10/11/12 (fg/bg/cursor color), to avoid host-background
//! flashes while still letting a guest query the current color.
//! Everything else passes through untouched.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    ReadingCode,
    ReadingBody,
}

#[derive(Default)]
pub struct OscFilter {
    state_saw_esc: bool,
    state: OscFilterState,
}

#[derive(Default)]
struct OscFilterState {
    state: Option<State>,
    raw: Vec<u8>,
    code: String,
    body: String,
}

impl OscFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds `bytes`, returning the subset that should reach the parser.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let st = &mut self.state;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            match st.state.unwrap_or(State::Idle) {
                State::Idle => {
                    if b == 0x1b && bytes.get(i + 1) == Some(&b']') {
                        st.state = Some(State::ReadingCode);
                        st.raw.clear();
                        st.raw.push(b);
                        st.raw.push(b']');
                        st.code.clear();
                        i += 1;
                    } else {
                        out.push(b);
                    }
                }
                State::ReadingCode => {
                    st.raw.push(b);
                    if b == b';' {
                        st.state = Some(State::ReadingBody);
                        st.body.clear();
                    } else if b.is_ascii_digit() {
                        st.code.push(b as char);
                    } else {
                        // Not a valid code field: give back everything
                        // buffered so far unchanged.
                        out.extend_from_slice(&st.raw);
                        st.state = Some(State::Idle);
                    }
                }
                State::ReadingBody => {
                    st.raw.push(b);
                    if b == 0x07 {
                        finish(st, &mut out);
                    } else if b == 0x1b {
                        self.state_saw_esc = true;
                    } else if self.state_saw_esc {
                        self.state_saw_esc = false;
                        if b == b'\\' {
                            finish(st, &mut out);
                        } else {
                            out.extend_from_slice(&st.raw);
                            st.state = Some(State::Idle);
                            out.push(b);
                        }
                    } else {
                        st.body.push(b as char);
                    }
                }
            }
            i += 1;
        }
        out
    }
}

fn finish(st: &mut OscFilterState, out: &mut Vec<u8>) {
    let strip_always = matches!(st.code.as_str(), "0" | "1" | "2" | "7" | "9" | "22" | "23" | "777");
    let is_color_set = matches!(st.code.as_str(), "10" | "11" | "12");

    if strip_always {
        // discarded
    } else if is_color_set {
        if st.body == "?" {
            out.extend_from_slice(&st.raw);
        }
    } else {
        out.extend_from_slice(&st.raw);
    }
    st.state = Some(State::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_title_and_set_color_but_preserves_color_query() {
        let mut filter = OscFilter::new();
        let input = b"A\x1B]0;t\x07B\x1B]10;#fff\x07C\x1B]10;?\x07D";
        let out = filter.feed(input);
        assert_eq!(out, b"ABC\x1B]10;?\x07D");
    }

    #[test]
    fn passes_through_unrecognized_osc_code() {
        let mut filter = OscFilter::new();
        let out = filter.feed(b"\x1b]52;c;AAAA\x07");
        assert_eq!(out, b"\x1b]52;c;AAAA\x07");
    }

    #[test]
    fn strips_cwd_notification_and_window_title_extras() {
        let mut filter = OscFilter::new();
        assert!(filter.feed(b"\x1b]7;file:///tmp\x07").is_empty());
        assert!(filter.feed(b"\x1b]9;done\x07").is_empty());
        assert!(filter.feed(b"\x1b]777;notify;a;b\x07").is_empty());
    }

    #[test]
    fn works_across_chunk_boundaries() {
        let mut filter = OscFilter::new();
        let mut out = filter.feed(b"A\x1b]10");
        out.extend(filter.feed(b";#fff\x07B"));
        assert_eq!(out, b"AB");
    }
}
