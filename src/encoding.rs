//! # Encoding Module
//!
//! Hex parsing and rendering shared by the matcher, the response scheduler and
//! the log views.
//!
//! Hex input is forgiving: `0x` prefixes and common separators are ignored, and
//! an odd number of digits gets a leading zero.

use std::sync::OnceLock;

use itertools::Itertools;
use regex::Regex;

fn separators() -> &'static Regex {
    static SEPARATORS: OnceLock<Regex> = OnceLock::new();
    SEPARATORS.get_or_init(|| Regex::new(r"\b0[xX]|[\s,:;\-]").expect("Valid regex pattern"))
}

/// Strip `0x` prefixes and separators.
fn strip(source: &str) -> String {
    separators().replace_all(source, "").into_owned()
}

/// Check if a string looks like hex bytes.
///
/// Prefixes and separators are allowed, anything else must be a hex digit.
///
/// ```
/// use smart_response::encoding::is_hex_like;
///
/// assert!(is_hex_like("0xAA 0x55"));
/// assert!(is_hex_like("aa:55"));
/// assert!(!is_hex_like("OK"));
/// assert!(!is_hex_like(" "));
/// ```
#[must_use]
pub fn is_hex_like(source: &str) -> bool {
    let stripped = strip(source);
    !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_hexdigit())
}

/// The result of interpreting user input as hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HexInput {
    /// The input was hex.
    Bytes(Vec<u8>),

    /// The input was not hex, these are its literal text bytes.
    Text(Vec<u8>),
}

impl HexInput {
    /// The bytes to put on wire either way.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            HexInput::Bytes(b) | HexInput::Text(b) => b,
        }
    }

    /// Borrow the bytes to put on wire.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            HexInput::Bytes(b) | HexInput::Text(b) => b,
        }
    }

    /// Check if the input fell back to text.
    pub fn is_text(&self) -> bool {
        matches!(self, HexInput::Text(_))
    }
}

fn padded(stripped: String) -> String {
    if stripped.len() % 2 != 0 {
        format!("0{stripped}")
    } else {
        stripped
    }
}

/// Parse hex input, falling back to the literal text when it is not hex.
///
/// ```
/// use smart_response::encoding::{parse_hex_input, HexInput};
///
/// assert_eq!(parse_hex_input("AA5"), HexInput::Bytes(vec![0x0A, 0xA5]));
/// assert_eq!(parse_hex_input("0x06 0x00"), HexInput::Bytes(vec![0x06, 0x00]));
/// assert_eq!(parse_hex_input("OK"), HexInput::Text(b"OK".to_vec()));
/// ```
#[must_use]
pub fn parse_hex_input(source: &str) -> HexInput {
    if !is_hex_like(source) {
        return HexInput::Text(source.as_bytes().to_vec());
    }

    match hex::decode(padded(strip(source))) {
        Ok(bytes) => HexInput::Bytes(bytes),
        Err(_) => HexInput::Text(source.as_bytes().to_vec()),
    }
}

/// Upper case byte pairs separated by single spaces, e.g. `AA 55`.
#[must_use]
pub fn hex_pairs(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).join(" ")
}

/// Hex-like text in the same form as [`hex_pairs`].
///
/// Returns `None` if the text is not hex-like.
///
/// ```
/// use smart_response::encoding::canonical_hex;
///
/// assert_eq!(canonical_hex("0xaa,0x55").as_deref(), Some("AA 55"));
/// assert_eq!(canonical_hex("hello"), None);
/// ```
#[must_use]
pub fn canonical_hex(source: &str) -> Option<String> {
    match parse_hex_input(source) {
        HexInput::Bytes(bytes) => Some(hex_pairs(&bytes)),
        HexInput::Text(_) => None,
    }
}

/// How outgoing binary data is written into the log.
#[must_use]
pub fn tx_hex_content(bytes: &[u8]) -> String {
    format!("Hex: {}", hex_pairs(bytes))
}

/// Check if bytes are printable text, i.e. valid utf8 without control characters
/// other than common whitespace.
#[must_use]
pub fn is_printable(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(s) => !s.is_empty() && s.chars().all(|c| !c.is_control() || matches!(c, '\r' | '\n' | '\t')),
        Err(_) => false,
    }
}

/// How incoming data is written into the log.
/// Printable text is kept, anything else becomes hex pairs.
#[must_use]
pub fn rx_content(bytes: &[u8]) -> String {
    if is_printable(bytes) {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        hex_pairs(bytes)
    }
}

/// Render log content for the HEX view.
///
/// Hex-like content is shown as is (upper cased), text is converted per character.
#[must_use]
pub fn render_hex_view(content: &str) -> String {
    if is_hex_like(content) {
        content.to_uppercase()
    } else {
        content
            .chars()
            .map(|c| format!("{:02X}", c as u32))
            .join(" ")
    }
}

/// Render log content for the ASCII view.
///
/// Hex-like content is decoded, with `.` standing in for non-printable bytes.
#[must_use]
pub fn render_ascii_view(content: &str) -> String {
    match parse_hex_input(content) {
        HexInput::Bytes(bytes) => bytes
            .into_iter()
            .map(|b| {
                if (32..=126).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            })
            .collect(),
        HexInput::Text(_) => content.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn odd_length_is_left_padded() {
        assert_eq!(parse_hex_input("AA5"), HexInput::Bytes(vec![0x0A, 0xA5]));
        assert_eq!(parse_hex_input("F"), HexInput::Bytes(vec![0x0F]));
    }

    #[test]
    fn separators_and_prefixes_are_ignored() {
        assert_eq!(
            parse_hex_input("0x48, 0x65-6C:6C 6F"),
            HexInput::Bytes(vec![0x48, 0x65, 0x6C, 0x6C, 0x6F])
        );
    }

    #[test]
    fn prefix_only_at_token_start() {
        assert_eq!(parse_hex_input("20x30"), HexInput::Text(b"20x30".to_vec()));
        assert_eq!(parse_hex_input("0x20,0x30"), HexInput::Bytes(vec![0x20, 0x30]));
    }

    #[test]
    fn empty_after_cleanup_falls_back_to_text() {
        assert_eq!(parse_hex_input("0x"), HexInput::Text(b"0x".to_vec()));
        assert_eq!(parse_hex_input("   "), HexInput::Text(b"   ".to_vec()));
    }

    #[test]
    fn non_hex_falls_back_to_text() {
        let input = parse_hex_input("AT+RST\r\n");
        assert!(input.is_text());
        assert_eq!(input.into_bytes(), b"AT+RST\r\n");
    }

    #[test]
    fn hex_pairs_are_upper_case() {
        assert_eq!(hex_pairs(&[0x06, 0x00, 0xab]), "06 00 AB");
        assert_eq!(tx_hex_content(&[0x06, 0x00]), "Hex: 06 00");
    }

    #[test]
    fn rx_content_keeps_text() {
        assert_eq!(rx_content(b"hello\r\n"), "hello\r\n");
        assert_eq!(rx_content(&[0xAA, 0x55]), "AA 55");
        assert_eq!(rx_content(&[0x01, b'a']), "01 61");
    }

    #[test]
    fn hex_view() {
        assert_eq!(render_hex_view("aa 55"), "AA 55");
        assert_eq!(render_hex_view("Hi"), "48 69");
    }

    #[test]
    fn ascii_view() {
        assert_eq!(render_ascii_view("48 69 00"), "Hi.");
        assert_eq!(render_ascii_view("Hello there"), "Hello there");
    }
}
