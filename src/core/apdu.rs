//! Command/response framing for short ISO 7816-4 APDUs.
//!
//! Only the framing is handled here. What a status word means for a given
//! card is up to the caller, since command sets differ between card types.

use crate::core::error::{CardError, CardResult};
use crate::core::utils::format_hex_spaced;
use std::fmt;

pub const INS_SELECT: u8 = 0xA4;
pub const INS_READ_BINARY: u8 = 0xB0;
pub const INS_WRITE_BINARY: u8 = 0xD0;
pub const INS_UPDATE_BINARY: u8 = 0xD6;

pub const SW_SUCCESS: u16 = 0x9000;
pub const SW_WRONG_LENGTH: u16 = 0x6700;
pub const SW_WRONG_OFFSET: u16 = 0x6B00;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;

/// Largest data field a short APDU can carry
pub const MAX_SHORT_DATA: usize = 255;

/// An outgoing APDU command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length; `Some(0)` requests up to 256 bytes
    pub le: Option<u8>,
}

impl Command {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    pub fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// READ BINARY at a 15-bit offset
    pub fn read_binary(offset: u16, length: u8) -> Self {
        let [p1, p2] = offset.to_be_bytes();
        Self::new(0x00, INS_READ_BINARY, p1, p2).with_le(length)
    }

    /// WRITE BINARY at a 15-bit offset
    pub fn write_binary(offset: u16, data: &[u8]) -> Self {
        let [p1, p2] = offset.to_be_bytes();
        Self::new(0x00, INS_WRITE_BINARY, p1, p2).with_data(data)
    }

    /// Offset encoded in P1/P2 for binary file commands
    pub fn offset(&self) -> u16 {
        u16::from_be_bytes([self.p1, self.p2])
    }

    /// Serialize into the wire format sent to the reader
    pub fn to_bytes(&self) -> CardResult<Vec<u8>> {
        if self.data.len() > MAX_SHORT_DATA {
            return Err(CardError::Transmission(format!(
                "command data of {} bytes does not fit a short APDU",
                self.data.len()
            )));
        }

        let mut bytes = Vec::with_capacity(6 + self.data.len());
        bytes.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            bytes.push(self.data.len() as u8);
            bytes.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            bytes.push(le);
        }
        Ok(bytes)
    }

    /// Parse a framed short APDU, as received by the virtual card
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 4 {
            return None;
        }
        let (header, body) = bytes.split_at(4);
        let mut command = Self::new(header[0], header[1], header[2], header[3]);

        match body {
            [] => {}
            [le] => command.le = Some(*le),
            [lc, rest @ ..] => {
                let lc = *lc as usize;
                if lc == 0 || rest.len() < lc || rest.len() > lc + 1 {
                    return None;
                }
                command.data = rest[..lc].to_vec();
                command.le = rest.get(lc).copied();
            }
        }
        Some(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bytes() {
            Ok(bytes) => f.write_str(&format_hex_spaced(&bytes)),
            Err(_) => write!(
                f,
                "{:02X} {:02X} {:02X} {:02X} <{} bytes>",
                self.cla,
                self.ins,
                self.p1,
                self.p2,
                self.data.len()
            ),
        }
    }
}

/// A card response: data followed by the two status bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub sw1: u8,
    pub sw2: u8,
}

impl Response {
    pub fn new(data: Vec<u8>, sw: u16) -> Self {
        let [sw1, sw2] = sw.to_be_bytes();
        Self { data, sw1, sw2 }
    }

    pub fn status(sw: u16) -> Self {
        Self::new(Vec::new(), sw)
    }

    /// Split raw reader output into data and status word
    pub fn from_bytes(raw: &[u8]) -> CardResult<Self> {
        match raw {
            [data @ .., sw1, sw2] => Ok(Self {
                data: data.to_vec(),
                sw1: *sw1,
                sw2: *sw2,
            }),
            _ => Err(CardError::Transmission(format!(
                "response of {} bytes has no status word",
                raw.len()
            ))),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.data.clone();
        bytes.extend_from_slice(&[self.sw1, self.sw2]);
        bytes
    }

    pub fn sw(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub fn is_success(&self) -> bool {
        self.sw() == SW_SUCCESS
    }
}
