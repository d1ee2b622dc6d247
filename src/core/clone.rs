//! Card memory dump and clone.
//!
//! The region always starts at offset 0. It is read block by block with READ
//! BINARY and written back with WRITE BINARY at the same offsets. There is no
//! verification pass and no rollback: when a write is rejected the
//! destination keeps the blocks written so far, and the error reports how
//! many bytes that is.

use crate::core::apdu::Command;
use crate::core::error::{CardError, CardResult};
use crate::core::reader::CardChannel;
use crate::core::session::CardSession;
use crate::core::utils::format_hex_spaced;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGION_LENGTH: usize = 256;
pub const DEFAULT_BLOCK_SIZE: u8 = 16;

/// Highest offset + 1 addressable through P1/P2 of READ/WRITE BINARY
pub const MAX_REGION_LENGTH: usize = 0x8000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneOptions {
    pub length: usize,
    pub block_size: u8,
    /// Writable bytes on the destination card, when known
    pub destination_capacity: Option<usize>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            length: DEFAULT_REGION_LENGTH,
            block_size: DEFAULT_BLOCK_SIZE,
            destination_capacity: None,
        }
    }
}

impl CloneOptions {
    pub fn validate(&self) -> CardResult<()> {
        if self.block_size == 0 {
            return Err(CardError::InvalidRegion("block size must be at least 1".into()));
        }
        if self.length == 0 || self.length > MAX_REGION_LENGTH {
            return Err(CardError::InvalidRegion(format!(
                "length must be between 1 and {MAX_REGION_LENGTH} bytes, got {}",
                self.length
            )));
        }
        Ok(())
    }

    /// Validate the region and reject a destination declared too small.
    /// Runs before any card I/O.
    pub fn check_destination(&self) -> CardResult<()> {
        self.validate()?;
        match self.destination_capacity {
            Some(available) if available < self.length => Err(CardError::InsufficientCapacity {
                required: self.length,
                available,
            }),
            _ => Ok(()),
        }
    }
}

/// Outcome of a completed clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneReport {
    pub bytes: usize,
    pub blocks: usize,
    pub source_atr: Vec<u8>,
    pub destination_atr: Vec<u8>,
}

fn blocks(length: usize, block_size: u8) -> impl Iterator<Item = (u16, usize)> {
    let block_size = block_size as usize;
    (0..length)
        .step_by(block_size)
        .map(move |offset| (offset as u16, block_size.min(length - offset)))
}

/// Read `length` bytes from offset 0
pub fn read_dump<C: CardChannel>(
    session: &mut CardSession<C>,
    length: usize,
    block_size: u8,
) -> CardResult<Vec<u8>> {
    CloneOptions {
        length,
        block_size,
        destination_capacity: None,
    }
    .validate()?;

    let mut dump = Vec::with_capacity(length);
    for (offset, size) in blocks(length, block_size) {
        log::info!("Reading block at offset {offset:04X}");
        let response = session.transmit(&Command::read_binary(offset, size as u8))?;

        if !response.is_success() {
            log::error!(
                "Read at offset {offset:04X} failed: status {:02X} {:02X}",
                response.sw1,
                response.sw2
            );
            return Err(CardError::UnexpectedStatus {
                operation: "READ BINARY",
                offset,
                sw1: response.sw1,
                sw2: response.sw2,
                completed: dump.len(),
            });
        }
        if response.data.len() != size {
            return Err(CardError::Transmission(format!(
                "short read at offset {offset:04X}: expected {size} bytes, got {}",
                response.data.len()
            )));
        }

        log::info!("Block {offset:04X} read: {}", format_hex_spaced(&response.data));
        dump.extend_from_slice(&response.data);
    }
    Ok(dump)
}

/// Write `data` from offset 0, returning the number of bytes written
pub fn write_dump<C: CardChannel>(
    session: &mut CardSession<C>,
    data: &[u8],
    block_size: u8,
) -> CardResult<usize> {
    CloneOptions {
        length: data.len(),
        block_size,
        destination_capacity: None,
    }
    .validate()?;

    let mut written = 0;
    for (offset, size) in blocks(data.len(), block_size) {
        let block = &data[offset as usize..offset as usize + size];
        log::info!("Writing block at offset {offset:04X}: {}", format_hex_spaced(block));
        let response = session.transmit(&Command::write_binary(offset, block))?;

        if !response.is_success() {
            log::error!(
                "Write at offset {offset:04X} failed: status {:02X} {:02X}",
                response.sw1,
                response.sw2
            );
            return Err(CardError::UnexpectedStatus {
                operation: "WRITE BINARY",
                offset,
                sw1: response.sw1,
                sw2: response.sw2,
                completed: written,
            });
        }
        written += size;
    }
    Ok(written)
}

/// Copy the configured region from `source` to `destination`
pub fn clone_card<S: CardChannel, D: CardChannel>(
    source: &mut CardSession<S>,
    destination: &mut CardSession<D>,
    options: &CloneOptions,
) -> CardResult<CloneReport> {
    options.check_destination()?;

    log::info!(
        "Cloning {} bytes from {} to {}",
        options.length,
        source.reader(),
        destination.reader()
    );

    let dump = read_dump(source, options.length, options.block_size)?;
    let bytes = write_dump(destination, &dump, options.block_size)?;

    Ok(CloneReport {
        bytes,
        blocks: blocks(bytes, options.block_size).count(),
        source_atr: source.atr().to_vec(),
        destination_atr: destination.atr().to_vec(),
    })
}
