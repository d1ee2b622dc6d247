use crate::core::apdu::{Command, Response};
use crate::core::error::{CardError, CardResult};
use crate::core::reader::{CardBackend, CardChannel, ShareMode};
use crate::core::timeout::TimedChannel;
use crate::core::utils::format_hex_spaced;
use anyhow::Context as AnyhowContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One command/response exchange, kept in the session transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub timestamp: DateTime<Utc>,
    pub command: Vec<u8>,
    pub response: Vec<u8>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Aggregate figures over a transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptStatistics {
    pub total: usize,
    pub failed: usize,
    pub average_duration_ms: u64,
}

/// How a session is opened
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub share_mode: ShareMode,
    /// Deadline for each transmit; `None` waits indefinitely
    pub transmit_timeout: Option<Duration>,
}

/// Session types produced by [`CardSession::open`]
pub type DynChannel = Box<dyn CardChannel + Send>;

/// An exclusive session with one card in one reader.
///
/// The card is released when the session is disconnected or dropped, so
/// early returns and `?` never leave the reader locked.
pub struct CardSession<C: CardChannel> {
    reader: String,
    channel: C,
    transcript: Vec<Exchange>,
    closed: bool,
}

impl CardSession<DynChannel> {
    /// Connect to `reader` through `backend`
    pub fn open<B>(backend: &B, reader: &str, options: &SessionOptions) -> CardResult<Self>
    where
        B: CardBackend,
        B::Channel: Send + 'static,
    {
        let channel = backend.connect(reader, options.share_mode)?;
        let channel: DynChannel = match options.transmit_timeout {
            Some(timeout) => Box::new(TimedChannel::spawn(channel, timeout)?),
            None => Box::new(channel),
        };
        Ok(Self::new(reader, channel))
    }
}

impl<C: CardChannel> CardSession<C> {
    pub fn new(reader: &str, channel: C) -> Self {
        Self {
            reader: reader.to_string(),
            channel,
            transcript: Vec::new(),
            closed: false,
        }
    }

    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Answer-to-reset of the connected card (may be empty)
    pub fn atr(&self) -> &[u8] {
        self.channel.atr()
    }

    pub fn transmit(&mut self, command: &Command) -> CardResult<Response> {
        let apdu = command.to_bytes()?;
        self.transmit_raw(&apdu)
    }

    /// Send an already framed APDU. The status word is returned, not judged.
    pub fn transmit_raw(&mut self, apdu: &[u8]) -> CardResult<Response> {
        if apdu.is_empty() {
            return Err(CardError::Transmission("APDU cannot be empty".to_string()));
        }

        log::info!("APDU sent: {}", format_hex_spaced(apdu));
        let timestamp = Utc::now();
        let start = Instant::now();

        let result = self
            .channel
            .transmit(apdu)
            .and_then(|raw| Response::from_bytes(&raw).map(|response| (raw, response)));
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((raw, response)) => {
                log::info!(
                    "APDU response: data={} SW={:02X} {:02X}",
                    format_hex_spaced(&response.data),
                    response.sw1,
                    response.sw2
                );
                self.transcript.push(Exchange {
                    timestamp,
                    command: apdu.to_vec(),
                    response: raw,
                    success: true,
                    error: None,
                    duration_ms,
                });
                Ok(response)
            }
            Err(e) => {
                log::error!("Transmission to {} failed: {e}", self.reader);
                self.transcript.push(Exchange {
                    timestamp,
                    command: apdu.to_vec(),
                    response: Vec::new(),
                    success: false,
                    error: Some(e.to_string()),
                    duration_ms,
                });
                Err(e)
            }
        }
    }

    pub fn transcript(&self) -> &[Exchange] {
        &self.transcript
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    /// Transcript as pretty JSON
    pub fn export_transcript(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(&self.transcript).context("Failed to serialize transcript")
    }

    pub fn statistics(&self) -> TranscriptStatistics {
        let total = self.transcript.len();
        let failed = self.transcript.iter().filter(|e| !e.success).count();
        let average_duration_ms = if total == 0 {
            0
        } else {
            self.transcript.iter().map(|e| e.duration_ms).sum::<u64>() / total as u64
        };

        TranscriptStatistics {
            total,
            failed,
            average_duration_ms,
        }
    }

    /// Release the card
    pub fn disconnect(mut self) -> CardResult<()> {
        self.closed = true;
        let result = self.channel.disconnect();
        log::info!("Session on {} closed", self.reader);
        result
    }
}

impl<C: CardChannel> Drop for CardSession<C> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.channel.disconnect() {
                log::warn!("Error while releasing {}: {e}", self.reader);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::emulator::VirtualCard;

    fn session() -> CardSession<VirtualCard> {
        CardSession::new("Virtual Reader 0", VirtualCard::new(256))
    }

    #[test]
    fn test_transmit_records_transcript() {
        let mut session = session();
        let response = session.transmit(&Command::read_binary(0, 4)).unwrap();
        assert_eq!(response.data, vec![0x00, 0x01, 0x02, 0x03]);
        assert!(response.is_success());

        let transcript = session.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].command, vec![0x00, 0xB0, 0x00, 0x00, 0x04]);
        assert_eq!(transcript[0].response, vec![0x00, 0x01, 0x02, 0x03, 0x90, 0x00]);
        assert!(transcript[0].success);
    }

    #[test]
    fn test_status_words_are_not_interpreted() {
        let mut session = session();
        let response = session.transmit_raw(&[0x80, 0xFF, 0x00, 0x00]).unwrap();
        assert_eq!((response.sw1, response.sw2), (0x6D, 0x00));
        assert_eq!(session.statistics().failed, 0);
    }

    #[test]
    fn test_empty_apdu_is_rejected() {
        let mut session = session();
        assert!(session.transmit_raw(&[]).unwrap_err().is_transmission());
        assert!(session.transcript().is_empty());
    }

    #[test]
    fn test_statistics_and_export() {
        let mut session = session();
        assert_eq!(
            session.statistics(),
            TranscriptStatistics {
                total: 0,
                failed: 0,
                average_duration_ms: 0
            }
        );

        session.transmit(&Command::new(0x00, 0xA4, 0x04, 0x00)).unwrap();
        session.transmit(&Command::read_binary(0x10, 2)).unwrap();
        assert_eq!(session.statistics().total, 2);

        let json = session.export_transcript().unwrap();
        let parsed: Vec<Exchange> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].response, vec![0x10, 0x11, 0x90, 0x00]);

        session.clear_transcript();
        assert_eq!(session.export_transcript().unwrap().trim(), "[]");
    }

    #[test]
    fn test_atr_is_exposed() {
        let session = session();
        assert_eq!(session.atr()[0], 0x3B);
        assert_eq!(session.reader(), "Virtual Reader 0");
    }
}
