//! Text decoding: XOR demasking, leading-space stripping, then
//! routing through the dialect's legacy code page or the SCSU decoder.

use crate::scsu;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextDecoder {
    MacRoman,
    Windows1252,
    Scsu,
}

/// Decodes one field's worth of raw, possibly-masked bytes into UTF-8.
///
/// FileMaker pads fixed-width fields on the left with ASCII spaces; a
/// value consisting only of spaces decodes to the empty string, not a
/// string of spaces.
pub(crate) fn decode_text(src: &[u8], xor_mask: u8, decoder: TextDecoder) -> String {
    let demasked: std::borrow::Cow<[u8]> = if xor_mask == 0 {
        std::borrow::Cow::Borrowed(src)
    } else {
        std::borrow::Cow::Owned(src.iter().map(|b| b ^ xor_mask).collect())
    };

    let stripped = strip_leading_spaces(&demasked);

    match decoder {
        TextDecoder::MacRoman => decode_mac_roman(stripped),
        TextDecoder::Windows1252 => decode_windows_1252(stripped),
        TextDecoder::Scsu => scsu::decode(stripped),
    }
}

fn strip_leading_spaces(bytes: &[u8]) -> &[u8] {
    let first_non_space = bytes.iter().position(|&b| b != 0x20).unwrap_or(bytes.len());
    &bytes[first_non_space..]
}

fn decode_mac_roman(bytes: &[u8]) -> String {
    let (cow, _encoding, _had_errors) = encoding_rs::MACINTOSH.decode(bytes);
    cow.into_owned()
}

fn decode_windows_1252(bytes: &[u8]) -> String {
    let (cow, _encoding, _had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    cow.into_owned()
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn all_spaces_yields_empty_string() {
        assert_eq!(decode_text(b"   ", 0, TextDecoder::MacRoman), "");
    }

    #[test]
    fn leading_spaces_are_trimmed() {
        assert_eq!(decode_text(b"  hello", 0, TextDecoder::Windows1252), "hello");
    }

    #[test]
    fn ascii_round_trips_through_mac_roman() {
        assert_eq!(decode_text(b"First Name", 0, TextDecoder::MacRoman), "First Name");
    }

    #[test]
    fn xor_mask_is_undone_before_decode() {
        let masked: Vec<u8> = b"Ada".iter().map(|b| b ^ 0x5A).collect();
        assert_eq!(decode_text(&masked, 0x5A, TextDecoder::Scsu), "Ada");
    }
}
