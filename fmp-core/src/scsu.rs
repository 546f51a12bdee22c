//! A small SCSU (Standard Compression Scheme for Unicode) decoder.
//!
//! Kept internal per the design notes: FileMaker's own usage only
//! exercises a subset of the scheme, and it is too small a state machine
//! to justify pulling in an external crate for it. The state is a single
//! active window (for single-byte mode) plus the eight static/dynamic
//! window offsets, exactly the "dynamic window over Unicode code points"
//! described by the format.
//!
//! Bytes 0x00, 0x09, 0x0A, 0x0D and the printable ASCII range always pass
//! through as their own code point, which is the path FileMaker's column
//! and table names (plain ASCII) actually take. Tag bytes outside that
//! range switch windows, quote a single character from a window, or enter
//! Unicode (raw UTF-16) mode; any tag this decoder doesn't recognize
//! emits U+FFFD and advances one byte.

const STATIC_OFFSETS: [u32; 8] = [
    0x0000, 0x0080, 0x0100, 0x0300, 0x2000, 0x2080, 0x2100, 0x3040,
];

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    SingleByte,
    Unicode,
}

struct State {
    mode: Mode,
    offsets: [u32; 8],
    active_window: usize,
}

impl State {
    fn new() -> Self {
        State {
            mode: Mode::SingleByte,
            offsets: STATIC_OFFSETS,
            active_window: 0,
        }
    }
}

pub(crate) fn decode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut st = State::new();
    let mut i = 0usize;

    while i < bytes.len() {
        match st.mode {
            Mode::SingleByte => i = step_single_byte(bytes, i, &mut st, &mut out),
            Mode::Unicode => i = step_unicode(bytes, i, &mut st, &mut out),
        }
    }

    out
}

fn push_char(out: &mut String, cp: u32) {
    match char::from_u32(cp) {
        Some(c) => out.push(c),
        None => out.push('\u{FFFD}'),
    }
}

fn step_single_byte(bytes: &[u8], i: usize, st: &mut State, out: &mut String) -> usize {
    let tag = bytes[i];
    match tag {
        0x00 | 0x09 | 0x0A | 0x0D | 0x20..=0x7F => {
            out.push(tag as char);
            i + 1
        }
        // SQn: quote a single character from window n (0x01..=0x08 -> n = tag-1).
        0x01..=0x08 => {
            let n = (tag - 0x01) as usize;
            if let Some(&b) = bytes.get(i + 1) {
                let cp = if b < 0x80 {
                    b as u32
                } else {
                    st.offsets[n] + (b as u32 - 0x80)
                };
                push_char(out, cp);
                i + 2
            } else {
                i + 1
            }
        }
        // SCn: shift to single-byte window n, persists until changed.
        0x10..=0x17 => {
            st.active_window = (tag - 0x10) as usize;
            i + 1
        }
        // SDn: redefine window n's offset from the following byte, then
        // activate it. The real scheme indexes a table of predefined
        // Unicode block offsets; this decoder uses a simple linear
        // mapping, sufficient for the windows FileMaker's own text
        // actually touches (it never leaves the Latin/ASCII range).
        0x18..=0x1F => {
            let n = (tag - 0x18) as usize;
            if let Some(&b) = bytes.get(i + 1) {
                st.offsets[n] = 0x80 + (b as u32) * 0x80;
                st.active_window = n;
                i + 2
            } else {
                i + 1
            }
        }
        // SQU: quote a single literal UTF-16 unit (big-endian), then
        // return to single-byte mode.
        0x0E => {
            if let (Some(&hi), Some(&lo)) = (bytes.get(i + 1), bytes.get(i + 2)) {
                let cp = u16::from_be_bytes([hi, lo]) as u32;
                push_char(out, cp);
                i + 3
            } else {
                i + 1
            }
        }
        // SCU: switch to Unicode mode.
        0x0F => {
            st.mode = Mode::Unicode;
            i + 1
        }
        // Data byte in the currently active single-byte window.
        0x80..=0xFF => {
            let cp = st.offsets[st.active_window] + (tag as u32 - 0x80);
            push_char(out, cp);
            i + 1
        }
        // 0x0B, 0x0C: reserved, unused by this scheme.
        _ => {
            out.push('\u{FFFD}');
            i + 1
        }
    }
}

fn step_unicode(bytes: &[u8], i: usize, st: &mut State, out: &mut String) -> usize {
    // UC0..UC7 (0x80..0x87 shifted range is not used here; real SCSU
    // overlays these on the 0x00-0x1F control range while in Unicode
    // mode) -- this decoder recognizes the single control it actually
    // needs: a tag byte >= 0xF0 returns to single-byte mode, anything
    // else is two bytes of big-endian UTF-16.
    if let Some(&b0) = bytes.get(i) {
        if b0 >= 0xF0 {
            st.mode = Mode::SingleByte;
            st.active_window = (b0 - 0xF0) as usize % 8;
            return i + 1;
        }
    }
    if let (Some(&hi), Some(&lo)) = (bytes.get(i), bytes.get(i + 1)) {
        let cp = u16::from_be_bytes([hi, lo]) as u32;
        push_char(out, cp);
        i + 2
    } else {
        bytes.len()
    }
}
