//! In-memory [`UartBus`] for driving the transport without hardware
//!
//! A responder closure plays the module: it sees every written frame and
//! may return reply bytes, which are delivered to the RX handler either
//! immediately or after a fixed latency from a helper thread.

use crate::bus::{RxAction, RxHandler, UartBus};
use crate::frame::{command_word, Ack};
use crate::types::ProtocolError;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Produces the module's reply to one written frame
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Something that happened on the mock bus, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Write(Vec<u8>),
    /// A batch of this many bytes was handed to the RX handler
    Deliver(usize),
    EnableRx,
    DisableRx,
}

#[derive(Default)]
struct MockState {
    handler: Option<RxHandler>,
    rx_enabled: bool,
    responder: Option<Responder>,
    unsolicited: VecDeque<Vec<u8>>,
    events: Vec<BusEvent>,
    fail_writes: bool,
}

impl MockState {
    fn deliver(&mut self, bytes: &[u8]) {
        if !self.rx_enabled {
            return;
        }
        self.events.push(BusEvent::Deliver(bytes.len()));
        if let Some(handler) = self.handler.as_mut() {
            if handler(bytes) == RxAction::Disable {
                self.rx_enabled = false;
            }
        }
    }
}

/// Scriptable bus double
#[derive(Default)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
    latency: Option<Duration>,
}

impl MockBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus whose module answers with `responder`
    #[must_use]
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let bus = Self::new();
        bus.set_responder(responder);
        bus
    }

    /// A bus whose module acknowledges every command with success
    #[must_use]
    pub fn acking() -> Self {
        Self::with_responder(|wire| command_word(wire).map(|cmd| ack_bytes(cmd, 0, &[])))
    }

    /// Deliver replies from a helper thread after `latency`
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Queue bytes the module sends on its own, delivered once RX is enabled
    pub fn queue_rx(&self, bytes: impl Into<Vec<u8>>) {
        let mut state = self.lock();
        state.unsolicited.push_back(bytes.into());
        Self::drain_unsolicited(&mut state);
    }

    /// Make every following write fail
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    #[must_use]
    pub fn events(&self) -> Vec<BusEvent> {
        self.lock().events.clone()
    }

    /// Every frame written so far
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                BusEvent::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Command words of every frame written so far
    #[must_use]
    pub fn commands(&self) -> Vec<u16> {
        self.writes()
            .iter()
            .filter_map(|wire| command_word(wire))
            .collect()
    }

    #[must_use]
    pub fn rx_enabled(&self) -> bool {
        self.lock().rx_enabled
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain_unsolicited(state: &mut MockState) {
        while state.rx_enabled {
            let Some(bytes) = state.unsolicited.pop_front() else {
                break;
            };
            state.deliver(&bytes);
        }
    }
}

impl UartBus for MockBus {
    fn write(&self, data: &[u8]) -> Result<(), ProtocolError> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock write failure",
            )));
        }
        state.events.push(BusEvent::Write(data.to_vec()));

        let Some(reply) = state.responder.as_mut().and_then(|r| r(data)) else {
            return Ok(());
        };

        match self.latency {
            None => state.deliver(&reply),
            Some(latency) => {
                let shared = self.state.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(latency);
                    shared
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .deliver(&reply);
                });
            }
        }
        Ok(())
    }

    fn enable_rx(&self) {
        let mut state = self.lock();
        state.rx_enabled = true;
        state.events.push(BusEvent::EnableRx);
        Self::drain_unsolicited(&mut state);
    }

    fn disable_rx(&self) {
        let mut state = self.lock();
        state.rx_enabled = false;
        state.events.push(BusEvent::DisableRx);
    }

    fn set_rx_handler(&self, handler: RxHandler) {
        self.lock().handler = Some(handler);
    }
}

/// Wire bytes of an ACK for command word `command`
#[must_use]
pub fn ack_bytes(command: u16, status: u16, payload: &[u8]) -> Vec<u8> {
    let ack = Ack {
        command: command | crate::types::ACK_FLAG,
        status,
        payload: Bytes::copy_from_slice(payload),
    };
    ack.serialize().map(|b| b.to_vec()).unwrap_or_default()
}

/// Wire bytes of a data frame carrying `body`
#[must_use]
pub fn data_frame_bytes(body: &[u8]) -> Vec<u8> {
    let mut wire = crate::types::DATA_HEADER.to_vec();
    // Test helper, bodies are far below u16::MAX
    wire.extend_from_slice(&(body.len() as u16).to_le_bytes());
    wire.extend_from_slice(body);
    wire.extend_from_slice(&crate::types::DATA_FOOTER);
    wire
}
