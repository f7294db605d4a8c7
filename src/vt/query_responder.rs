//! Intercepts terminal self-identification queries on bytes read *from* the
//! PTY, synthesises responses written back into the PTY, and passes the rest
//! of the stream through to the emulator untouched.

/// Live terminal state the responder consults to answer queries correctly
/// (capability-object pattern: the responder never touches the emulator
/// directly, only this narrow getter surface).
pub trait QueryContext {
    /// 0-based `(row, col)`.
    fn cursor(&self) -> (u16, u16);
    fn kitty_keyboard_flags(&self) -> u8;
    /// DECRQM reply value for `mode`: `0` not recognized, `1` set, `2` reset,
    /// `3` permanently set, `4` permanently reset.
    fn decrqm_value(&self, mode: u32) -> u8;
    fn foreground_color(&self) -> (u8, u8, u8);
    fn background_color(&self) -> (u8, u8, u8);
}

const KNOWN_CAPS: &[(&str, &str)] = &[
    ("TN", "xterm-256color"),
    ("name", "xterm-256color"),
    ("Co", "256"),
    ("colors", "256"),
    ("RGB", ""),
    ("setrgbf", ""),
    ("setrgbb", ""),
];

/// Output of a single [`QueryResponder::process`] call.
#[derive(Debug, Default, Clone)]
pub struct QueryResult {
    /// Bytes to hand to the emulator, in original order.
    pub forward: Vec<u8>,
    /// Bytes to write back into the PTY so the guest can read them.
    pub reply: Vec<u8>,
}

/// Streaming scanner with carry-over for sequences split across reads.
#[derive(Default)]
pub struct QueryResponder {
    pending: Vec<u8>,
}

enum Match {
    /// A recognized, fully-buffered query; replies with the given bytes and
    /// consumes `consumed` bytes without forwarding them.
    Query { consumed: usize, reply: Vec<u8> },
    /// A recognized prefix whose terminator hasn't arrived yet.
    Incomplete,
    /// Not a recognized query at this position; advance by one plain byte.
    None,
}

impl QueryResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, input: &[u8], ctx: &dyn QueryContext) -> QueryResult {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(input);

        let mut result = QueryResult::default();
        let mut i = 0;
        while i < buf.len() {
            match try_match(&buf[i..], ctx) {
                Match::Query { consumed, reply } => {
                    result.reply.extend(reply);
                    i += consumed;
                }
                Match::Incomplete => {
                    // Retain from here; the terminator may arrive in the
                    // next chunk.
                    self.pending = buf[i..].to_vec();
                    return result;
                }
                Match::None => {
                    result.forward.push(buf[i]);
                    i += 1;
                }
            }
        }
        result
    }
}

fn try_match(buf: &[u8], ctx: &dyn QueryContext) -> Match {
    if buf.is_empty() || buf[0] != 0x1b {
        return Match::None;
    }

    if let Some(rest) = buf.strip_prefix(b"\x1b[?") {
        // DECRQM: ESC[?{digits}$p
        if let Some(m) = match_decrqm(rest, ctx) {
            return m;
        }
        // Kitty keyboard query: ESC[?u
        if rest.starts_with(b"u") {
            let flags = ctx.kitty_keyboard_flags();
            return Match::Query {
                consumed: 4,
                reply: format!("\x1b[?{}u", flags).into_bytes(),
            };
        }
        if b"u".starts_with(rest) {
            return Match::Incomplete;
        }
    }

    if let Some(rest) = buf.strip_prefix(b"\x1b[>") {
        if rest.starts_with(b"c") || rest.starts_with(b"0c") {
            let consumed = 3 + if rest.starts_with(b"0c") { 2 } else { 1 };
            return Match::Query {
                consumed,
                reply: b"\x1b[>65;100;0c".to_vec(),
            };
        }
        if rest.starts_with(b"q") || rest.starts_with(b"0q") {
            let consumed = 3 + if rest.starts_with(b"0q") { 2 } else { 1 };
            return Match::Query {
                consumed,
                reply: b"\x1bP>|mux(1.0)\x1b\\".to_vec(),
            };
        }
        if is_prefix_of_any(rest, &[b"c", b"0c", b"q", b"0q"]) {
            return Match::Incomplete;
        }
    }

    if let Some(rest) = buf.strip_prefix(b"\x1b[=") {
        if rest.starts_with(b"c") || rest.starts_with(b"0c") {
            let consumed = 3 + if rest.starts_with(b"0c") { 2 } else { 1 };
            return Match::Query {
                consumed,
                reply: b"\x1bP!|00000000\x1b\\".to_vec(),
            };
        }
        if is_prefix_of_any(rest, &[b"c", b"0c"]) {
            return Match::Incomplete;
        }
    }

    if buf.starts_with(b"\x1b[5n") {
        return Match::Query {
            consumed: 4,
            reply: b"\x1b[0n".to_vec(),
        };
    }
    if is_prefix_of(buf, b"\x1b[5n") {
        return Match::Incomplete;
    }

    if buf.starts_with(b"\x1b[6n") {
        let (row, col) = ctx.cursor();
        return Match::Query {
            consumed: 4,
            reply: format!("\x1b[{};{}R", row + 1, col + 1).into_bytes(),
        };
    }
    if is_prefix_of(buf, b"\x1b[6n") {
        return Match::Incomplete;
    }

    if buf.starts_with(b"\x1b[c") || buf.starts_with(b"\x1b[0c") {
        let consumed = if buf.starts_with(b"\x1b[0c") { 4 } else { 3 };
        return Match::Query {
            consumed,
            reply: b"\x1b[?62;1;4;22c".to_vec(),
        };
    }
    if is_prefix_of_any(buf, &[b"\x1b[c", b"\x1b[0c"]) {
        return Match::Incomplete;
    }

    if let Some(m) = match_xtgettcap(buf) {
        return m;
    }

    if let Some(m) = match_osc_color_query(buf, ctx) {
        return m;
    }

    Match::None
}

fn is_prefix_of(buf: &[u8], full: &[u8]) -> bool {
    !buf.is_empty() && full.starts_with(buf) && buf.len() < full.len()
}

fn is_prefix_of_any(buf: &[u8], fulls: &[&[u8]]) -> bool {
    fulls.iter().any(|full| is_prefix_of(buf, full))
}

fn match_decrqm(rest: &[u8], ctx: &dyn QueryContext) -> Option<Match> {
    let digits_end = rest.iter().position(|b| !b.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        // No digits before `$p` — malformed, passed through unchanged.
        return None;
    }
    if digits_end + 2 > rest.len() {
        // Might still be accumulating digits, or waiting for "$p".
        if rest[..digits_end].iter().all(u8::is_ascii_digit) {
            return Some(Match::Incomplete);
        }
        return None;
    }
    if &rest[digits_end..digits_end + 2] != b"$p" {
        return None;
    }
    let mode: u32 = std::str::from_utf8(&rest[..digits_end]).ok()?.parse().ok()?;
    let value = ctx.decrqm_value(mode);
    let consumed = 3 + digits_end + 2; // "ESC[?" + digits + "$p"
    Some(Match::Query {
        consumed,
        reply: format!("\x1b[?{};{}$y", mode, value).into_bytes(),
    })
}

fn match_xtgettcap(buf: &[u8]) -> Option<Match> {
    let rest = buf.strip_prefix(b"\x1bP+q")?;
    let terminator = find_terminator(rest)?;
    match terminator {
        None => return Some(Match::Incomplete),
        Some((term_start, term_len)) => {
            let hex_blob = std::str::from_utf8(&rest[..term_start]).ok()?;
            let mut reply = Vec::new();
            for hex_name in hex_blob.split(';') {
                if hex_name.is_empty() {
                    continue;
                }
                match decode_hex(hex_name) {
                    Some(name) => match lookup_cap(&name) {
                        Some(value) => {
                            reply.extend_from_slice(b"\x1bP1+r");
                            reply.extend_from_slice(hex_name.as_bytes());
                            reply.push(b'=');
                            reply.extend_from_slice(encode_hex(&value).as_bytes());
                            reply.extend_from_slice(b"\x1b\\");
                        }
                        None => {
                            reply.extend_from_slice(b"\x1bP0+r");
                            reply.extend_from_slice(hex_name.as_bytes());
                            reply.extend_from_slice(b"\x1b\\");
                        }
                    },
                    None => {
                        reply.extend_from_slice(b"\x1bP0+r");
                        reply.extend_from_slice(hex_name.as_bytes());
                        reply.extend_from_slice(b"\x1b\\");
                    }
                }
            }
            let consumed = 4 + term_start + term_len; // "ESC P + q" + body + terminator
            Some(Match::Query { consumed, reply })
        }
    }
}

/// Finds the `BEL` or `ST` (`ESC \`) terminator in `rest`.
/// `Some(None)` = not found yet (incomplete); `Some(Some((pos, len)))` = found.
fn find_terminator(rest: &[u8]) -> Option<Option<(usize, usize)>> {
    for i in 0..rest.len() {
        if rest[i] == 0x07 {
            return Some(Some((i, 1)));
        }
        if rest[i] == 0x1b && rest.get(i + 1) == Some(&b'\\') {
            return Some(Some((i, 2)));
        }
    }
    Some(None)
}

fn decode_hex(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut out = String::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    for chunk in bytes.chunks(2) {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        out.push(((hi * 16 + lo) as u8) as char);
    }
    Some(out)
}

fn encode_hex(s: &str) -> String {
    s.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn lookup_cap(name: &str) -> Option<String> {
    KNOWN_CAPS
        .iter()
        .find(|(cap, _)| *cap == name)
        .map(|(_, value)| value.to_string())
}

fn match_osc_color_query(buf: &[u8], ctx: &dyn QueryContext) -> Option<Match> {
    if let Some(m) = match_osc_color(buf, b"\x1b]10;?", ctx.foreground_color()) {
        return Some(m);
    }
    if let Some(m) = match_osc_color(buf, b"\x1b]11;?", ctx.background_color()) {
        return Some(m);
    }
    None
}

fn match_osc_color(buf: &[u8], prefix: &[u8], rgb: (u8, u8, u8)) -> Option<Match> {
    let rest = buf.strip_prefix(prefix)?;
    match find_terminator(rest)? {
        None => Some(Match::Incomplete),
        Some((term_start, term_len)) => {
            let (r, g, b) = rgb;
            let reply = format!(
                "\x1b]{};rgb:{:04x}/{:04x}/{:04x}\x07",
                if prefix == b"\x1b]10;?" { 10 } else { 11 },
                r as u16 * 257,
                g as u16 * 257,
                b as u16 * 257
            );
            Some(Match::Query {
                consumed: prefix.len() + term_start + term_len,
                reply: reply.into_bytes(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedContext {
        cursor: (u16, u16),
    }

    impl QueryContext for FixedContext {
        fn cursor(&self) -> (u16, u16) {
            self.cursor
        }
        fn kitty_keyboard_flags(&self) -> u8 {
            0
        }
        fn decrqm_value(&self, mode: u32) -> u8 {
            match mode {
                25 => 1,
                1049 => 2,
                _ => 0,
            }
        }
        fn foreground_color(&self) -> (u8, u8, u8) {
            (0xff, 0xff, 0xff)
        }
        fn background_color(&self) -> (u8, u8, u8) {
            (0, 0, 0)
        }
    }

    #[test]
    fn passes_through_plain_text_unchanged_with_no_reply() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let result = responder.process(b"hello world", &ctx);
        assert_eq!(result.forward, b"hello world");
        assert!(result.reply.is_empty());
    }

    #[test]
    fn cursor_position_report_uses_one_based_coordinates() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (2, 4) };
        let result = responder.process(b"\x1b[6n", &ctx);
        assert_eq!(result.reply, b"\x1b[3;5R");
        assert!(result.forward.is_empty());
    }

    #[test]
    fn device_status_report_replies_ok() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let result = responder.process(b"\x1b[5n", &ctx);
        assert_eq!(result.reply, b"\x1b[0n");
    }

    #[test]
    fn da1_and_da2_are_distinguished() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let da1 = responder.process(b"\x1b[c", &ctx);
        assert_eq!(da1.reply, b"\x1b[?62;1;4;22c");

        let mut responder = QueryResponder::new();
        let da2 = responder.process(b"\x1b[>c", &ctx);
        assert_eq!(da2.reply, b"\x1b[>65;100;0c");
    }

    #[test]
    fn decrqm_reports_live_mode_value() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let result = responder.process(b"\x1b[?25$p", &ctx);
        assert_eq!(result.reply, b"\x1b[?25;1$y");
    }

    #[test]
    fn malformed_decrqm_passes_through() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let result = responder.process(b"\x1b[?$p", &ctx);
        assert_eq!(result.forward, b"\x1b[?$p");
        assert!(result.reply.is_empty());
    }

    #[test]
    fn query_split_across_chunks_still_resolves() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let first = responder.process(b"\x1b[6", &ctx);
        assert!(first.reply.is_empty());
        assert!(first.forward.is_empty());
        let second = responder.process(b"n", &ctx);
        assert_eq!(second.reply, b"\x1b[1;1R");
    }

    #[test]
    fn xtgettcap_known_capability() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let hex_name = encode_hex("Co");
        let query = format!("\x1bP+q{}\x1b\\", hex_name);
        let result = responder.process(query.as_bytes(), &ctx);
        let expected = format!("\x1bP1+r{}={}\x1b\\", hex_name, encode_hex("256"));
        assert_eq!(result.reply, expected.into_bytes());
    }

    #[test]
    fn xtgettcap_unknown_capability() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let hex_name = encode_hex("bogus");
        let query = format!("\x1bP+q{}\x1b\\", hex_name);
        let result = responder.process(query.as_bytes(), &ctx);
        let expected = format!("\x1bP0+r{}\x1b\\", hex_name);
        assert_eq!(result.reply, expected.into_bytes());
    }

    #[test]
    fn osc_fg_query_replies_with_16_bit_rgb() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let result = responder.process(b"\x1b]10;?\x07", &ctx);
        assert_eq!(result.reply, b"\x1b]10;rgb:ffff/ffff/ffff\x07");
    }

    #[test]
    fn kitty_keyboard_query_echoes_flags() {
        let mut responder = QueryResponder::new();
        let ctx = FixedContext { cursor: (0, 0) };
        let result = responder.process(b"\x1b[?u", &ctx);
        assert_eq!(result.reply, b"\x1b[?0u");
    }
}
