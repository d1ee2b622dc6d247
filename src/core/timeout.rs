//! Transmit deadline for card channels.
//!
//! PC/SC offers no way to abort a transmit that never returns, so the channel
//! is moved onto a worker thread and the caller waits on the reply with a
//! deadline. A channel that missed its deadline is poisoned: the worker may
//! still be blocked inside the driver, so nothing else is sent to it.

use crate::core::error::{CardError, CardResult};
use crate::core::reader::CardChannel;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum Request {
    Transmit(Vec<u8>, mpsc::Sender<CardResult<Vec<u8>>>),
    Disconnect(mpsc::Sender<CardResult<()>>),
}

/// A card channel driven from a worker thread with a per-transmit deadline
pub struct TimedChannel {
    atr: Vec<u8>,
    timeout: Duration,
    requests: Option<mpsc::Sender<Request>>,
    worker: Option<JoinHandle<()>>,
    poisoned: bool,
}

impl TimedChannel {
    pub fn spawn<C>(mut channel: C, timeout: Duration) -> CardResult<Self>
    where
        C: CardChannel + Send + 'static,
    {
        let atr = channel.atr().to_vec();
        let (tx, rx) = mpsc::channel::<Request>();

        let worker = thread::Builder::new()
            .name("card-io".to_string())
            .spawn(move || {
                for request in rx {
                    match request {
                        Request::Transmit(apdu, reply) => {
                            let _ = reply.send(channel.transmit(&apdu));
                        }
                        Request::Disconnect(reply) => {
                            let _ = reply.send(channel.disconnect());
                            return;
                        }
                    }
                }
                // Owner went away without an explicit disconnect
                let _ = channel.disconnect();
            })
            .map_err(|e| CardError::Transmission(format!("failed to start card worker: {e}")))?;

        Ok(Self {
            atr,
            timeout,
            requests: Some(tx),
            worker: Some(worker),
            poisoned: false,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn wait<T>(&mut self, reply: mpsc::Receiver<CardResult<T>>) -> CardResult<T> {
        match reply.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.poisoned = true;
                log::error!(
                    "Card did not answer within {} ms, abandoning channel",
                    self.timeout.as_millis()
                );
                Err(CardError::Transmission(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(CardError::Transmission("card worker stopped".to_string()))
            }
        }
    }
}

impl CardChannel for TimedChannel {
    fn atr(&self) -> &[u8] {
        &self.atr
    }

    fn transmit(&mut self, apdu: &[u8]) -> CardResult<Vec<u8>> {
        if self.poisoned {
            return Err(CardError::Transmission(
                "channel abandoned after an earlier timeout".to_string(),
            ));
        }

        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| CardError::Transmission("channel already disconnected".to_string()))?;

        let (reply_tx, reply_rx) = mpsc::channel();
        requests
            .send(Request::Transmit(apdu.to_vec(), reply_tx))
            .map_err(|_| CardError::Transmission("card worker stopped".to_string()))?;
        self.wait(reply_rx)
    }

    fn disconnect(&mut self) -> CardResult<()> {
        let Some(requests) = self.requests.take() else {
            return Ok(());
        };

        if self.poisoned {
            // Dropping the sender lets the worker release the card if the
            // driver ever returns; joining could block forever.
            drop(requests);
            self.worker.take();
            return Ok(());
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        let result = match requests.send(Request::Disconnect(reply_tx)) {
            Ok(()) => self.wait(reply_rx),
            Err(_) => Ok(()),
        };

        if !self.poisoned {
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
        result
    }
}

impl Drop for TimedChannel {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}
