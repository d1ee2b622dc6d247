//! Software card emulation.
//!
//! A [`VirtualCard`] is a transparent binary file of fixed capacity that
//! answers SELECT, READ BINARY, WRITE BINARY and UPDATE BINARY. A fresh card
//! holds the pattern `byte[i] = i & 0xFF`. [`VirtualBackend`] exposes virtual
//! cards behind named readers so the whole tool chain can run without
//! hardware.

use crate::core::apdu::{
    Command, Response, INS_READ_BINARY, INS_SELECT, INS_UPDATE_BINARY, INS_WRITE_BINARY,
    SW_INS_NOT_SUPPORTED, SW_SUCCESS, SW_WRONG_LENGTH, SW_WRONG_OFFSET,
};
use crate::core::error::{CardError, CardResult};
use crate::core::reader::{CardBackend, CardChannel, ReaderInfo, ShareMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// ATR reported by emulated cards
pub const VIRTUAL_ATR: [u8; 14] = [
    0x3B, 0x13, 0x00, 0x81, 0x31, 0xFE, 0x45, 0x80, 0x31, 0xC0, 0x64, 0xB0, 0x01, 0x00,
];

const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
const SW_END_OF_FILE: u16 = 0x6282;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualCard {
    memory: Vec<u8>,
    atr: Vec<u8>,
}

impl VirtualCard {
    /// Card of `capacity` bytes holding the default pattern
    pub fn new(capacity: usize) -> Self {
        Self {
            memory: (0..capacity).map(|i| (i & 0xFF) as u8).collect(),
            atr: VIRTUAL_ATR.to_vec(),
        }
    }

    /// Card of `capacity` zero bytes
    pub fn blank(capacity: usize) -> Self {
        Self {
            memory: vec![0; capacity],
            atr: VIRTUAL_ATR.to_vec(),
        }
    }

    pub fn with_atr(mut self, atr: &[u8]) -> Self {
        self.atr = atr.to_vec();
        self
    }

    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Execute one APDU against the card
    pub fn process(&mut self, apdu: &[u8]) -> Response {
        let Some(command) = Command::parse(apdu) else {
            log::debug!("Virtual card rejected malformed APDU ({} bytes)", apdu.len());
            return Response::status(SW_WRONG_LENGTH);
        };

        if command.cla != 0x00 {
            return Response::status(SW_CLA_NOT_SUPPORTED);
        }

        match command.ins {
            INS_SELECT => Response::status(SW_SUCCESS),
            INS_READ_BINARY => self.read(command.offset() as usize, command.le),
            INS_WRITE_BINARY | INS_UPDATE_BINARY => {
                self.write(command.offset() as usize, &command.data)
            }
            _ => Response::status(SW_INS_NOT_SUPPORTED),
        }
    }

    fn read(&self, offset: usize, le: Option<u8>) -> Response {
        let requested = match le {
            None => 0,
            Some(0) => 256,
            Some(n) => n as usize,
        };
        if offset >= self.memory.len() {
            return Response::status(SW_WRONG_OFFSET);
        }

        let end = (offset + requested).min(self.memory.len());
        let data = self.memory[offset..end].to_vec();
        if end - offset < requested {
            Response::new(data, SW_END_OF_FILE)
        } else {
            Response::new(data, SW_SUCCESS)
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Response {
        if data.is_empty() {
            return Response::status(SW_WRONG_LENGTH);
        }
        // Rejected writes leave memory untouched
        if offset + data.len() > self.memory.len() {
            return Response::status(SW_WRONG_OFFSET);
        }
        self.memory[offset..offset + data.len()].copy_from_slice(data);
        Response::status(SW_SUCCESS)
    }
}

impl CardChannel for VirtualCard {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, apdu: &[u8]) -> CardResult<Vec<u8>> {
        Ok(self.process(apdu).to_bytes())
    }

    fn disconnect(&mut self) -> CardResult<()> {
        Ok(())
    }
}

struct Slot {
    name: String,
    card: Option<Arc<Mutex<VirtualCard>>>,
    busy: Arc<AtomicBool>,
}

/// Named readers holding virtual cards
#[derive(Default)]
pub struct VirtualBackend {
    slots: Vec<Slot>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two readers: a patterned source card and a blank destination card
    pub fn workbench(capacity: usize) -> Self {
        Self::new()
            .with_card("Virtual Reader 0", VirtualCard::new(capacity))
            .with_card("Virtual Reader 1", VirtualCard::blank(capacity))
    }

    pub fn with_card(mut self, name: &str, card: VirtualCard) -> Self {
        self.slots.push(Slot {
            name: name.to_string(),
            card: Some(Arc::new(Mutex::new(card))),
            busy: Arc::new(AtomicBool::new(false)),
        });
        self
    }

    /// A reader with nothing inserted
    pub fn with_empty_reader(mut self, name: &str) -> Self {
        self.slots.push(Slot {
            name: name.to_string(),
            card: None,
            busy: Arc::new(AtomicBool::new(false)),
        });
        self
    }

    /// Snapshot of the card in `reader`
    pub fn card(&self, reader: &str) -> Option<VirtualCard> {
        let slot = self.slots.iter().find(|s| s.name == reader)?;
        let card = slot.card.as_ref()?.lock().ok()?;
        Some(card.clone())
    }
}

impl CardBackend for VirtualBackend {
    type Channel = VirtualChannel;

    fn list_readers(&self) -> CardResult<Vec<ReaderInfo>> {
        if self.slots.is_empty() {
            return Err(CardError::NoReaderFound(None));
        }

        Ok(self
            .slots
            .iter()
            .map(|slot| {
                let atr = slot
                    .card
                    .as_ref()
                    .and_then(|card| card.lock().ok().map(|c| c.atr.clone()));
                ReaderInfo {
                    name: slot.name.clone(),
                    card_present: slot.card.is_some(),
                    atr,
                }
            })
            .collect())
    }

    fn connect(&self, reader: &str, _share_mode: ShareMode) -> CardResult<VirtualChannel> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.name == reader)
            .ok_or_else(|| CardError::connection(reader, "reader not available"))?;

        let card = slot
            .card
            .clone()
            .ok_or_else(|| CardError::connection(reader, "no card present"))?;

        if slot.busy.swap(true, Ordering::SeqCst) {
            return Err(CardError::connection(
                reader,
                "reader is in use by another session",
            ));
        }

        let atr = card
            .lock()
            .map(|c| c.atr.clone())
            .map_err(|_| CardError::connection(reader, "virtual card state poisoned"))?;

        log::info!("Connected to virtual reader {reader}");
        Ok(VirtualChannel {
            reader: reader.to_string(),
            card,
            atr,
            busy: Some(slot.busy.clone()),
        })
    }
}

/// Session channel to a card held by [`VirtualBackend`]
#[derive(Debug)]
pub struct VirtualChannel {
    reader: String,
    card: Arc<Mutex<VirtualCard>>,
    atr: Vec<u8>,
    busy: Option<Arc<AtomicBool>>,
}

impl CardChannel for VirtualChannel {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, apdu: &[u8]) -> CardResult<Vec<u8>> {
        if self.busy.is_none() {
            return Err(CardError::Transmission(format!(
                "no card connected on {}",
                self.reader
            )));
        }
        let mut card = self
            .card
            .lock()
            .map_err(|_| CardError::Transmission("virtual card state poisoned".to_string()))?;
        Ok(card.process(apdu).to_bytes())
    }

    fn disconnect(&mut self) -> CardResult<()> {
        if let Some(busy) = self.busy.take() {
            busy.store(false, Ordering::SeqCst);
            log::info!("Disconnected from virtual reader {}", self.reader);
        }
        Ok(())
    }
}

impl Drop for VirtualChannel {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
