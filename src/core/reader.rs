use crate::core::error::{CardError, CardResult};
use crate::core::utils::format_hex_spaced;
use pcsc::{Card, Context, Disposition, Protocols, ReaderState, Scope, State, MAX_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::str::FromStr;
use std::time::Duration;

/// Information about a connected reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderInfo {
    pub name: String,
    pub card_present: bool,
    pub atr: Option<Vec<u8>>,
}

/// Connection share mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    #[default]
    Shared,
    Exclusive,
    Direct,
}

impl FromStr for ShareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shared" => Ok(ShareMode::Shared),
            "exclusive" => Ok(ShareMode::Exclusive),
            "direct" => Ok(ShareMode::Direct),
            _ => Err(format!("Invalid share mode: {s}")),
        }
    }
}

impl From<ShareMode> for pcsc::ShareMode {
    fn from(mode: ShareMode) -> Self {
        match mode {
            ShareMode::Shared => pcsc::ShareMode::Shared,
            ShareMode::Exclusive => pcsc::ShareMode::Exclusive,
            ShareMode::Direct => pcsc::ShareMode::Direct,
        }
    }
}

/// A live link to one inserted card.
///
/// `transmit` carries raw APDU bytes both ways; the response still ends with
/// SW1 SW2.
pub trait CardChannel {
    /// Answer-to-reset bytes captured when the card was connected
    fn atr(&self) -> &[u8];

    fn transmit(&mut self, apdu: &[u8]) -> CardResult<Vec<u8>>;

    /// Release the card. Calling it twice is a no-op.
    fn disconnect(&mut self) -> CardResult<()>;
}

impl<C: CardChannel + ?Sized> CardChannel for Box<C> {
    fn atr(&self) -> &[u8] {
        (**self).atr()
    }

    fn transmit(&mut self, apdu: &[u8]) -> CardResult<Vec<u8>> {
        (**self).transmit(apdu)
    }

    fn disconnect(&mut self) -> CardResult<()> {
        (**self).disconnect()
    }
}

/// Reader discovery and connection
pub trait CardBackend {
    type Channel: CardChannel;

    /// List readers; fails with `NoReaderFound` when there are none
    fn list_readers(&self) -> CardResult<Vec<ReaderInfo>>;

    fn connect(&self, reader: &str, share_mode: ShareMode) -> CardResult<Self::Channel>;
}

/// Backend talking to the platform PC/SC service
pub struct PcscBackend {
    context: Context,
}

impl PcscBackend {
    pub fn new() -> CardResult<Self> {
        let context = Context::establish(Scope::User).map_err(|e| {
            CardError::NoReaderFound(Some(format!("PC/SC service unavailable: {e}")))
        })?;
        Ok(Self { context })
    }

    fn probe(&self, name: &CString) -> (bool, Option<Vec<u8>>) {
        let mut states = [ReaderState::new(name.clone(), State::UNAWARE)];
        if let Err(e) = self.context.get_status_change(Duration::ZERO, &mut states) {
            log::debug!("Status query for {:?} failed: {e}", name);
            return (false, None);
        }

        let state = &states[0];
        let present = state.event_state().contains(State::PRESENT);
        let atr = (present && !state.atr().is_empty()).then(|| state.atr().to_vec());
        (present, atr)
    }
}

impl CardBackend for PcscBackend {
    type Channel = PcscChannel;

    fn list_readers(&self) -> CardResult<Vec<ReaderInfo>> {
        let names = match self.context.list_readers_owned() {
            Ok(names) => names,
            Err(pcsc::Error::NoReadersAvailable) => return Err(CardError::NoReaderFound(None)),
            Err(e) => return Err(CardError::NoReaderFound(Some(e.to_string()))),
        };

        if names.is_empty() {
            return Err(CardError::NoReaderFound(None));
        }

        let readers: Vec<ReaderInfo> = names
            .iter()
            .map(|name| {
                let (card_present, atr) = self.probe(name);
                ReaderInfo {
                    name: name.to_string_lossy().into_owned(),
                    card_present,
                    atr,
                }
            })
            .collect();

        log::info!(
            "Readers found: {:?}",
            readers.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()
        );
        Ok(readers)
    }

    fn connect(&self, reader: &str, share_mode: ShareMode) -> CardResult<PcscChannel> {
        log::info!("Connecting to reader: {reader}");

        let reader_cstr =
            CString::new(reader).map_err(|_| CardError::connection(reader, "invalid reader name"))?;
        let card = self
            .context
            .connect(&reader_cstr, share_mode.into(), Protocols::ANY)
            .map_err(|e| {
                log::error!("Connection to reader {reader} failed: {e}");
                CardError::connection(reader, connect_failure_reason(e))
            })?;

        let atr = match card.status2_owned() {
            Ok(status) => status.atr().to_vec(),
            Err(e) => {
                log::info!("ATR not available for reader {reader}: {e}");
                Vec::new()
            }
        };
        if !atr.is_empty() {
            log::info!("ATR read: {}", format_hex_spaced(&atr));
        }

        Ok(PcscChannel {
            reader: reader.to_string(),
            card: Some(card),
            atr,
        })
    }
}

fn connect_failure_reason(error: pcsc::Error) -> String {
    match error {
        pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => "no card present".to_string(),
        pcsc::Error::UnpoweredCard => "card is not powered".to_string(),
        pcsc::Error::UnresponsiveCard => "card does not answer to reset".to_string(),
        pcsc::Error::ProtoMismatch | pcsc::Error::UnsupportedCard => {
            "card protocol not supported".to_string()
        }
        pcsc::Error::UnknownReader | pcsc::Error::ReaderUnavailable => {
            "reader not available".to_string()
        }
        pcsc::Error::SharingViolation => "reader is in use by another session".to_string(),
        other => other.to_string(),
    }
}

/// Card connected through PC/SC
pub struct PcscChannel {
    reader: String,
    card: Option<Card>,
    atr: Vec<u8>,
}

impl PcscChannel {
    pub fn reader(&self) -> &str {
        &self.reader
    }
}

impl CardChannel for PcscChannel {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, apdu: &[u8]) -> CardResult<Vec<u8>> {
        let card = self
            .card
            .as_ref()
            .ok_or_else(|| CardError::Transmission(format!("no card connected on {}", self.reader)))?;

        let mut response_buf = [0; MAX_BUFFER_SIZE];
        match card.transmit(apdu, &mut response_buf) {
            Ok(response) => Ok(response.to_vec()),
            Err(e) => {
                if matches!(e, pcsc::Error::RemovedCard | pcsc::Error::ResetCard) {
                    // The handle is useless once the card is gone
                    self.card = None;
                }
                Err(CardError::Transmission(e.to_string()))
            }
        }
    }

    fn disconnect(&mut self) -> CardResult<()> {
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::LeaveCard).map_err(|(_, e)| {
                log::warn!("Failed to disconnect cleanly from {}: {e}", self.reader);
                CardError::Transmission(format!("disconnect failed: {e}"))
            })?;
            log::info!("Disconnected from reader {}", self.reader);
        }
        Ok(())
    }
}

impl Drop for PcscChannel {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
