//! Text decoding for archive entries

use encoding_rs::Encoding;

/// Decode entry bytes as text.
///
/// A byte-order mark selects UTF-8 or UTF-16. Without one the bytes are read
/// as UTF-8, with invalid sequences (Latin-1 text, say) replaced by U+FFFD; a
/// code point cut off at the end (from a read cap) is dropped. Returns `None`
/// for content that looks binary.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let body = &bytes[bom_len..];
        // An odd trailing byte is half a UTF-16 code unit cut by the cap.
        let body = if encoding == encoding_rs::UTF_8 || body.len() % 2 == 0 {
            body
        } else {
            &body[..body.len() - 1]
        };
        let (text, _) = encoding.decode_without_bom_handling(body);
        return Some(text.into_owned()).filter(|text| !text.contains('\0'));
    }

    let (text, _) = encoding_rs::UTF_8.decode_without_bom_handling(trim_partial_utf8(bytes));
    Some(text.into_owned()).filter(|text| !text.contains('\0'))
}

/// Drop a UTF-8 sequence left incomplete at the end of `bytes`.
fn trim_partial_utf8(bytes: &[u8]) -> &[u8] {
    let continuation = bytes
        .iter()
        .rev()
        .take(3)
        .take_while(|&&b| b & 0xC0 == 0x80)
        .count();
    let Some(lead_index) = bytes.len().checked_sub(continuation + 1) else {
        return bytes;
    };
    let expected = match bytes[lead_index] {
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => return bytes,
    };
    if continuation + 1 < expected {
        &bytes[..lead_index]
    } else {
        bytes
    }
}

/// First `max_chars` characters of `text`
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Lowercased extension of the last path segment, without the dot
pub fn entry_extension(name: &str) -> Option<String> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() {
        // ".env" is a name, not an extension
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_utf8() {
        assert_eq!(decode_text(b"hello\nworld").as_deref(), Some("hello\nworld"));
        assert_eq!(decode_text("caf\u{e9}".as_bytes()).as_deref(), Some("caf\u{e9}"));
    }

    #[test]
    fn test_truncated_code_point_is_dropped() {
        let bytes = "ab\u{e9}".as_bytes();
        assert_eq!(decode_text(&bytes[..bytes.len() - 1]).as_deref(), Some("ab"));
    }

    #[test]
    fn test_latin1_text_is_decoded_lossily() {
        assert_eq!(decode_text(b"caf\xe9 menu").as_deref(), Some("caf\u{fffd} menu"));
        assert_eq!(
            decode_text(b"na\xefve\nmnemonic phrase").as_deref(),
            Some("na\u{fffd}ve\nmnemonic phrase")
        );
    }

    #[test]
    fn test_binary_is_rejected() {
        assert_eq!(decode_text(&[0x89, b'P', b'N', b'G', 0xff, 0xfe, 0x00]), None);
        assert_eq!(decode_text(b"text\0with nul"), None);
    }

    #[test]
    fn test_bom_detection() {
        let mut utf8 = vec![0xEF, 0xBB, 0xBF];
        utf8.extend_from_slice(b"bom text");
        assert_eq!(decode_text(&utf8).as_deref(), Some("bom text"));

        let mut utf16 = vec![0xFF, 0xFE];
        for unit in "seed".encode_utf16() {
            utf16.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_text(&utf16).as_deref(), Some("seed"));
        utf16.push(b'x');
        assert_eq!(decode_text(&utf16).as_deref(), Some("seed"));
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("ab", 3), "ab");
        assert_eq!(truncate_chars("\u{e9}\u{e9}\u{e9}\u{e9}", 2), "\u{e9}\u{e9}");
    }

    #[test]
    fn test_entry_extension() {
        assert_eq!(entry_extension("dir/Notes.TXT").as_deref(), Some("txt"));
        assert_eq!(entry_extension("a.tar.gz").as_deref(), Some("gz"));
        assert_eq!(entry_extension("dir.d/README"), None);
        assert_eq!(entry_extension(".env"), None);
    }
}
