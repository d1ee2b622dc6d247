use crate::barcode::error::{BarcodeError, BarcodeResult};
use rxing::BarcodeFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three supported barcode encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbology {
    /// Linear-1D
    Code128,
    /// Matrix-2D
    Qr,
    /// Stacked-2D
    Pdf417,
}

impl Symbology {
    pub const ALL: [Symbology; 3] = [Symbology::Code128, Symbology::Qr, Symbology::Pdf417];

    pub fn name(self) -> &'static str {
        match self {
            Symbology::Code128 => "Code128",
            Symbology::Qr => "QR",
            Symbology::Pdf417 => "PDF417",
        }
    }

    pub fn is_linear(self) -> bool {
        matches!(self, Symbology::Code128)
    }

    /// Longest payload, in characters, accepted for encoding
    pub fn max_payload_len(self) -> usize {
        match self {
            Symbology::Code128 => 80,
            // Byte mode, version 40, error correction L
            Symbology::Qr => 2953,
            // Text compaction at one character per codeword, the worst case
            // for printable ASCII, within the 929 codeword cap
            Symbology::Pdf417 => 800,
        }
    }

    /// Check the payload against the character set and length limits
    pub fn check_payload(self, payload: &str) -> BarcodeResult<()> {
        if payload.is_empty() {
            return Err(BarcodeError::Encoding("payload is empty".to_string()));
        }

        if let Some((index, c)) = payload
            .char_indices()
            .find(|(_, c)| !(' '..='~').contains(c))
        {
            return Err(BarcodeError::Encoding(format!(
                "{} cannot carry character {c:?} at position {index}; only printable ASCII is supported",
                self.name()
            )));
        }

        let length = payload.len();
        if length > self.max_payload_len() {
            return Err(BarcodeError::Encoding(format!(
                "{} holds at most {} characters, payload has {length}",
                self.name(),
                self.max_payload_len()
            )));
        }
        Ok(())
    }

    pub(crate) fn barcode_format(self) -> BarcodeFormat {
        match self {
            Symbology::Code128 => BarcodeFormat::CODE_128,
            Symbology::Qr => BarcodeFormat::QR_CODE,
            Symbology::Pdf417 => BarcodeFormat::PDF_417,
        }
    }

    pub(crate) fn from_barcode_format(format: &BarcodeFormat) -> Option<Self> {
        match format {
            BarcodeFormat::CODE_128 => Some(Symbology::Code128),
            BarcodeFormat::QR_CODE => Some(Symbology::Qr),
            BarcodeFormat::PDF_417 => Some(Symbology::Pdf417),
            _ => None,
        }
    }
}

impl FromStr for Symbology {
    type Err = BarcodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "code128" | "linear" | "1d" => Ok(Symbology::Code128),
            "qr" | "qrcode" | "matrix" => Ok(Symbology::Qr),
            "pdf417" | "stacked" => Ok(Symbology::Pdf417),
            _ => Err(BarcodeError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for Symbology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
