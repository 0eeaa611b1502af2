//! Character-set detection and transcoding helpers.
//!
//! Text-ish parsers (TXT, HTML, EML bodies) detect the input encoding with
//! `chardetng` and transcode to UTF-8 with `encoding_rs`. Binary inputs
//! that defeat detection fall back to printable-sequence extraction.

use encoding_rs::Encoding;

/// Guess the encoding of `bytes`.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Decode `bytes` using the detected encoding. Returns the text and
/// whether the decode saw malformed sequences.
pub fn decode_detected(bytes: &[u8]) -> (String, bool) {
    let encoding = detect_encoding(bytes);
    let (text, _, had_errors) = encoding.decode(bytes);
    (text.into_owned(), had_errors)
}

/// Decode `bytes` with a named charset (an IANA label as found in HTML
/// meta tags or MIME headers). Returns `None` for unknown labels.
pub fn decode_with_label(bytes: &[u8], label: &str) -> Option<String> {
    let encoding = Encoding::for_label(label.trim().as_bytes())?;
    let (text, _, _) = encoding.decode(bytes);
    Some(text.into_owned())
}

/// Map a Windows codepage number to an encoding (BIFF `CODEPAGE` records,
/// RTF `\ansicpg`).
pub fn encoding_for_codepage(codepage: u16) -> Option<&'static Encoding> {
    let label: &[u8] = match codepage {
        437 | 850 => b"ibm866",
        866 => b"ibm866",
        874 => b"windows-874",
        932 => b"shift_jis",
        936 => b"gbk",
        949 => b"euc-kr",
        950 => b"big5",
        1250 => b"windows-1250",
        1251 => b"windows-1251",
        1252 => b"windows-1252",
        1253 => b"windows-1253",
        1254 => b"windows-1254",
        1255 => b"windows-1255",
        1256 => b"windows-1256",
        1257 => b"windows-1257",
        1258 => b"windows-1258",
        10000 => b"macintosh",
        20866 => b"koi8-r",
        28591 => b"iso-8859-1",
        28592 => b"iso-8859-2",
        65001 => b"utf-8",
        _ => return None,
    };
    Encoding::for_label(label)
}

/// Extract sequences of at least `min_seq_len` printable characters from
/// text that is suspected to be binary, separating adjacent sequences
/// with `seq_delim`.
pub fn sequences_of_printable_characters(text: &str, min_seq_len: usize, seq_delim: char) -> String {
    let mut result = String::with_capacity(text.len());
    let mut printable_field = String::new();
    let mut non_printable_count = 0usize;
    for ch in text.chars() {
        if !ch.is_control() && ch != '\u{FFFD}' {
            printable_field.push(ch);
            non_printable_count = 0;
        } else {
            if printable_field.chars().count() >= min_seq_len {
                result.push_str(&printable_field);
                if non_printable_count == 0 {
                    result.push(seq_delim);
                }
            }
            printable_field.clear();
            non_printable_count += 1;
        }
    }
    if printable_field.chars().count() >= min_seq_len {
        result.push_str(&printable_field);
    }
    result
}
