//! UTF-8 <-> Mac OS Roman filename transcoding.
//!
//! Bytes 0x00-0x7F are plain ASCII. Bytes 0x80-0xFF map to the fixed Mac
//! OS Roman table below. Encoding back to Mac OS Roman replaces any
//! character with no mapping with `?`, per the engine's filename-write
//! contract.

/// High half of Mac OS Roman (byte 0x80..=0xFF), indexed by `byte - 0x80`.
#[rustfmt::skip]
const HIGH_TABLE: [char; 128] = [
    'Ä', 'Å', 'Ç', 'É', 'Ñ', 'Ö', 'Ü', 'á', 'à', 'â', 'ä', 'ã', 'å', 'ç', 'é', 'è',
    'ê', 'ë', 'í', 'ì', 'î', 'ï', 'ñ', 'ó', 'ò', 'ô', 'ö', 'õ', 'ú', 'ù', 'û', 'ü',
    '†', '°', '¢', '£', '§', '•', '¶', 'ß', '®', '©', '™', '´', '¨', '≠', 'Æ', 'Ø',
    '∞', '±', '≤', '≥', '¥', 'µ', '∂', '∑', '∏', 'π', '∫', 'ª', 'º', 'Ω', 'æ', 'ø',
    '¿', '¡', '¬', '√', 'ƒ', '≈', '∆', '«', '»', '…', '\u{00A0}', 'À', 'Ã', 'Õ', 'Œ', 'œ',
    '–', '—', '“', '”', '‘', '’', '÷', '◊', 'ÿ', 'Ÿ', '⁄', '€', '‹', '›', 'ﬁ', 'ﬂ',
    '‡', '·', '‚', '„', '‰', 'Â', 'Ê', 'Á', 'Ë', 'È', 'Í', 'Î', 'Ï', 'Ì', 'Ó', 'Ô',
    '\u{F8FF}', 'Ò', 'Ú', 'Û', 'Ù', 'ı', 'ˆ', '˜', '¯', '˘', '˙', '˚', '¸', '˝', '˛', 'ˇ',
];

/// Decode a Mac OS Roman byte string into a UTF-8 `String`.
pub fn to_utf8(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| macroman_to_char(b)).collect()
}

fn macroman_to_char(byte: u8) -> char {
    if byte < 0x80 {
        byte as char
    } else {
        HIGH_TABLE[(byte - 0x80) as usize]
    }
}

/// Encode a UTF-8 string into Mac OS Roman bytes. Characters with no
/// representation in the table are replaced with `?` (0x3F), matching
/// the engine's documented lossy-write behavior.
pub fn from_utf8(s: &str) -> Vec<u8> {
    s.chars().map(char_to_macroman).collect()
}

fn char_to_macroman(c: char) -> u8 {
    if c.is_ascii() {
        return c as u8;
    }
    HIGH_TABLE
        .iter()
        .position(|&candidate| candidate == c)
        .map(|idx| (idx as u8) + 0x80)
        .unwrap_or(b'?')
}

/// Strips the "all bytes have the high bit set" legacy convention some
/// old producers used for filenames, but only when *every* byte in the
/// name has the bit set (a name that mixes high/low bytes is left
/// alone).
pub fn strip_legacy_high_bit(bytes: &mut [u8]) {
    if !bytes.is_empty() && bytes.iter().all(|&b| b & 0x80 != 0) {
        for b in bytes.iter_mut() {
            *b &= 0x7F;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_round_trips() {
        assert_eq!(to_utf8(b"HELLO.TXT"), "HELLO.TXT");
        assert_eq!(from_utf8("HELLO.TXT"), b"HELLO.TXT");
    }

    #[test]
    fn high_byte_round_trips() {
        let decoded = to_utf8(&[0xCA]); // non-breaking space
        assert_eq!(decoded, "\u{00A0}");
        assert_eq!(from_utf8(&decoded), vec![0xCA]);
    }

    #[test]
    fn unmappable_char_becomes_question_mark() {
        assert_eq!(from_utf8("日本語"), vec![b'?', b'?', b'?']);
    }

    #[test]
    fn strips_all_high_bit_names_only() {
        let mut all_high = *b"\xC8\xC5\xCC\xCC\xCF"; // "HELLO" with bit 7 set
        strip_legacy_high_bit(&mut all_high);
        assert_eq!(&all_high, b"HELLO");

        let mut mixed = *b"\xC8ello"; // only first byte has the bit set
        let before = mixed;
        strip_legacy_high_bit(&mut mixed);
        assert_eq!(mixed, before);
    }
}
