use anyhow::{bail, Context, Result};
use std::borrow::Cow;

/// Parse a hex string into bytes.
///
/// Accepts the layouts operators paste from card tools and log files:
/// `"00B0000010"`, `"00 B0 00 00 10"`, `"0x00,0xB0"` and `"00:B0:00"`.
pub fn parse_hex(hex_str: &str) -> Result<Vec<u8>> {
    let cleaned = strip_separators(hex_str);

    if cleaned.len() % 2 != 0 {
        bail!("Hex string must have an even number of digits: '{hex_str}'");
    }

    hex::decode(&cleaned).with_context(|| format!("Invalid hex string: '{hex_str}'"))
}

fn strip_separators(hex_str: &str) -> String {
    hex_str
        .trim()
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| !matches!(c, ' ' | ',' | ':' | '-' | '\t' | '\n' | '\r'))
        .collect()
}

/// Format bytes as a hex string
pub fn format_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Format bytes as a hex string with spaces, the layout used in logs and ATR display
pub fn format_hex_spaced(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format bytes as ASCII, replacing non-printable chars with '.'
pub fn format_ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| printable(b)).collect()
}

fn printable(byte: u8) -> char {
    if byte.is_ascii_graphic() || byte == b' ' {
        byte as char
    } else {
        '.'
    }
}

/// Format a card memory region as a hex dump, addressed from `base`
pub fn format_hex_dump(bytes: &[u8], base: usize) -> String {
    const BYTES_PER_LINE: usize = 16;

    if bytes.is_empty() {
        return String::from("(empty)");
    }

    bytes
        .chunks(BYTES_PER_LINE)
        .enumerate()
        .map(|(i, chunk)| {
            let hex = format!("{:<w$}", format_hex_spaced(chunk), w = BYTES_PER_LINE * 3 - 1);
            let ascii: String = chunk.iter().map(|&b| printable(b)).collect();
            format!("{:04X}: {hex}  |{ascii}|", base + i * BYTES_PER_LINE)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable description of an ISO 7816-4 status word
pub fn describe_status_word(sw1: u8, sw2: u8) -> Cow<'static, str> {
    let text = match (sw1, sw2) {
        (0x90, 0x00) => "Success",
        (0x61, n) => return format!("Success, {n} bytes available").into(),
        (0x62, 0x81) => "Warning: Part of returned data may be corrupted",
        (0x62, 0x82) => "Warning: End of file reached before reading Le bytes",
        (0x62, _) => "Warning: State of non-volatile memory unchanged",
        (0x63, n) if n & 0xF0 == 0xC0 => return format!("Warning: Counter = {}", n & 0x0F).into(),
        (0x63, _) => "Warning: State of non-volatile memory changed",
        (0x65, 0x81) => "Error: Memory failure",
        (0x67, 0x00) => "Error: Wrong length",
        (0x69, 0x81) => "Error: Command incompatible with file structure",
        (0x69, 0x82) => "Error: Security status not satisfied",
        (0x69, 0x86) => "Error: Command not allowed (no current EF)",
        (0x69, _) => "Error: Command not allowed",
        (0x6A, 0x81) => "Error: Function not supported",
        (0x6A, 0x82) => "Error: File not found",
        (0x6A, 0x84) => "Error: Not enough memory space in file",
        (0x6A, 0x86) => "Error: Incorrect parameters P1-P2",
        (0x6A, _) => "Error: Wrong parameters",
        (0x6B, 0x00) => "Error: Offset outside the file",
        (0x6C, n) => return format!("Error: Wrong Le field, exact length: {n}").into(),
        (0x6D, 0x00) => "Error: Instruction code not supported or invalid",
        (0x6E, 0x00) => "Error: Class not supported",
        (0x6F, 0x00) => "Error: No precise diagnosis",
        _ => return format!("Unknown status: {sw1:02X} {sw2:02X}").into(),
    };
    Cow::Borrowed(text)
}
