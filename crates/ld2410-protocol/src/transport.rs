//! Command/ACK transaction engine
//!
//! The RX handler registered on the bus runs the [`FrameBuffer`] and, once a
//! frame of the awaited family completes, hands it to the single waiting
//! caller through a oneshot channel and disables RX. Callers park on that
//! channel with a bounded timeout.
//!
//! Only one frame family is awaited at a time. Bytes of the other family
//! arriving meanwhile (for instance cyclic data frames during a command
//! exchange) are not filtered specially: they fail header matching and are
//! discarded as noise by the resynchronizer.

use crate::bus::{RxAction, UartBus};
use crate::commands::{CommandId, ENTER_CONFIG_VALUE};
use crate::frame::{Ack, Frame};
use crate::framer::{FrameBuffer, FrameResult};
use crate::types::{le_u16, FrameType, ProtocolError};

use bytes::{Buf, Bytes};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, MutexGuard, OwnedSemaphorePermit, Semaphore};

/// Default bound on every wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);

/// Receive-side state shared with the RX handler
struct RxState {
    framer: FrameBuffer,
    /// Family currently awaited, `None` when idle
    awaited: Option<FrameType>,
    /// Waiting caller
    pending: Option<oneshot::Sender<Frame>>,
}

impl RxState {
    /// Handle one batch of received bytes
    fn on_rx(&mut self, data: &[u8]) -> RxAction {
        let Some(expected) = self.awaited else {
            return RxAction::Disable;
        };

        let mut src = data;
        while src.has_remaining() {
            match self.framer.feed(&mut src, expected) {
                FrameResult::Incomplete => {}
                FrameResult::Complete(frame) => {
                    tracing::debug!(
                        "Received {} frame, body {:02X?}",
                        frame.frame_type,
                        &frame.body[..]
                    );
                    self.awaited = None;
                    if let Some(tx) = self.pending.take() {
                        let _ = tx.send(frame);
                    }
                    return RxAction::Disable;
                }
                FrameResult::Rejected(e) => {
                    tracing::debug!("Dropped corrupt {} frame: {}", expected, e);
                }
            }
        }
        RxAction::Continue
    }
}

/// Async transaction engine for one LD2410
pub struct Ld2410Transport<B: UartBus> {
    bus: Arc<B>,
    rx: Arc<StdMutex<RxState>>,
    /// Single outstanding exchange on the wire
    slot: Arc<Semaphore>,
    /// Serializes config-mode sequences
    config_lock: Mutex<()>,
    timeout: Duration,
}

impl<B: UartBus> Ld2410Transport<B> {
    /// Create a transport and register its RX handler on `bus`
    pub fn new(bus: Arc<B>) -> Self {
        Self::with_timeout(bus, DEFAULT_TIMEOUT)
    }

    /// Create a transport with a custom bound on waits
    pub fn with_timeout(bus: Arc<B>, timeout: Duration) -> Self {
        let rx = Arc::new(StdMutex::new(RxState {
            framer: FrameBuffer::new(),
            awaited: None,
            pending: None,
        }));

        let handler_rx = rx.clone();
        bus.disable_rx();
        bus.set_rx_handler(Box::new(move |data: &[u8]| {
            handler_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .on_rx(data)
        }));

        Self {
            bus,
            rx,
            slot: Arc::new(Semaphore::new(1)),
            config_lock: Mutex::new(()),
            timeout,
        }
    }

    fn lock_rx(&self) -> StdMutexGuard<'_, RxState> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the transmit slot
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, ProtocolError> {
        match tokio::time::timeout(self.timeout, self.slot.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ProtocolError::NotConnected),
            Err(_) => Err(ProtocolError::Busy),
        }
    }

    /// Arm the receiver for `awaited`, optionally transmit, and wait for the frame
    async fn exchange(
        &self,
        awaited: FrameType,
        request: Option<Bytes>,
    ) -> Result<Frame, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock_rx();
            state.framer.reset();
            state.awaited = Some(awaited);
            state.pending = Some(tx);
        }
        self.bus.enable_rx();

        if let Some(request) = request {
            if let Err(e) = self.bus.write(&request) {
                self.abort();
                return Err(e);
            }
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => {
                self.abort();
                Err(ProtocolError::Timeout)
            }
            Err(_) => {
                tracing::warn!("Timed out waiting for {} frame", awaited);
                self.abort();
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Stop receiving and return to idle
    fn abort(&self) {
        self.bus.disable_rx();
        let mut state = self.lock_rx();
        state.awaited = None;
        state.pending = None;
        state.framer.reset();
    }

    /// Send one command and wait for its acknowledgement
    ///
    /// # Errors
    ///
    /// `Busy` if another exchange holds the wire past the timeout, `Timeout`
    /// if no ACK arrives, `BadResponse` if the ACK echoes a different command
    /// or carries a nonzero status.
    pub async fn transceive_command(
        &self,
        command: CommandId,
        payload: &[u8],
    ) -> Result<Ack, ProtocolError> {
        let wire = Frame::encode_command(command, payload)?;
        let _permit = self.acquire_slot().await?;

        tracing::debug!("Sending {:?}: {:02X?}", command, &wire[..]);
        let frame = self.exchange(FrameType::Ack, Some(wire)).await?;

        let ack = Ack::parse(&frame)?;
        ack.check(command)?;
        Ok(ack)
    }

    /// Wait for the next cyclic data frame
    pub async fn fetch_data_frame(&self) -> Result<Frame, ProtocolError> {
        let _permit = self.acquire_slot().await?;
        self.exchange(FrameType::Data, None).await
    }

    /// Enter config mode, holding the config lock until the session is closed
    ///
    /// # Errors
    ///
    /// Any failure of the ENTER_CONFIG_MODE exchange; no session is opened.
    pub async fn config_session(&self) -> Result<ConfigSession<'_, B>, ProtocolError> {
        let guard = self.config_lock.lock().await;

        let ack = self
            .transceive_command(CommandId::EnterConfigMode, &ENTER_CONFIG_VALUE.to_le_bytes())
            .await?;
        if let (Some(version), Some(buffer_size)) = (le_u16(&ack.payload, 0), le_u16(&ack.payload, 2))
        {
            tracing::debug!(
                "Entered config mode: protocol version {}, buffer size {}",
                version,
                buffer_size
            );
        }

        Ok(ConfigSession {
            transport: self,
            _guard: guard,
        })
    }

    /// Run one command inside config mode
    ///
    /// LEAVE_CONFIG_MODE is issued whatever the command's outcome.
    ///
    /// # Errors
    ///
    /// The command's own error first, otherwise a failure to leave config mode.
    pub async fn transceive_in_config_mode(
        &self,
        command: CommandId,
        payload: &[u8],
    ) -> Result<Ack, ProtocolError> {
        let session = self.config_session().await?;
        let result = session.command(command, payload).await;
        let closed = session.close().await;
        let ack = result?;
        closed?;
        Ok(ack)
    }
}

/// Exclusive config-mode sequence, ended with [`ConfigSession::close`]
pub struct ConfigSession<'a, B: UartBus> {
    transport: &'a Ld2410Transport<B>,
    _guard: MutexGuard<'a, ()>,
}

impl<B: UartBus> ConfigSession<'_, B> {
    /// Send one command within the session
    pub async fn command(&self, command: CommandId, payload: &[u8]) -> Result<Ack, ProtocolError> {
        self.transport.transceive_command(command, payload).await
    }

    /// Leave config mode and release the config lock
    pub async fn close(self) -> Result<(), ProtocolError> {
        let result = self
            .transport
            .transceive_command(CommandId::LeaveConfigMode, &[])
            .await;
        if let Err(ref e) = result {
            tracing::warn!("Failed to leave config mode: {}", e);
        }
        result.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::command_word;
    use crate::mock::{ack_bytes, data_frame_bytes, BusEvent, MockBus};

    fn transport(bus: MockBus) -> (Arc<MockBus>, Ld2410Transport<MockBus>) {
        let bus = Arc::new(bus);
        (bus.clone(), Ld2410Transport::new(bus))
    }

    #[tokio::test]
    async fn test_transceive_command_success() {
        let (bus, transport) = transport(MockBus::with_responder(|wire| {
            let cmd = command_word(wire)?;
            Some(ack_bytes(cmd, 0, &[0x01, 0x00]))
        }));

        let ack = transport
            .transceive_command(CommandId::GetDistanceResolution, &[])
            .await
            .unwrap();
        assert_eq!(ack.command, 0x01AB);
        assert_eq!(&ack.payload[..], &[0x01, 0x00]);
        assert_eq!(bus.commands(), vec![0x00AB]);
        assert!(!bus.rx_enabled());
    }

    #[tokio::test]
    async fn test_wrong_echo_is_bad_response() {
        let (_bus, transport) =
            transport(MockBus::with_responder(|_| Some(ack_bytes(0x0062, 0, &[]))));
        let result = transport
            .transceive_command(CommandId::ReadSettings, &[])
            .await;
        assert!(matches!(
            result,
            Err(ProtocolError::BadResponse {
                command: 0x0061,
                echo: 0x0162,
                status: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_timeout_disables_rx() {
        let (bus, transport) = transport(MockBus::new());
        let result = transport
            .transceive_command(CommandId::ReadSettings, &[])
            .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
        assert!(!bus.rx_enabled());
        assert_eq!(bus.events().last(), Some(&BusEvent::DisableRx));
    }

    #[tokio::test]
    async fn test_write_failure_reported() {
        let (bus, transport) = transport(MockBus::acking());
        bus.fail_writes(true);
        let result = transport
            .transceive_command(CommandId::ReadSettings, &[])
            .await;
        assert!(matches!(result, Err(ProtocolError::Io(_))));
        assert!(!bus.rx_enabled());
    }

    #[tokio::test]
    async fn test_timed_out_exchange_leaves_clean_state() {
        let (bus, transport) = transport(MockBus::new());
        assert!(transport
            .transceive_command(CommandId::ReadSettings, &[])
            .await
            .is_err());

        bus.set_responder(|wire| command_word(wire).map(|cmd| ack_bytes(cmd, 0, &[])));
        assert!(transport
            .transceive_command(CommandId::ReadSettings, &[])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_single_transaction_in_flight() {
        let (bus, transport) =
            transport(MockBus::acking().with_latency(Duration::from_millis(30)));
        let transport = Arc::new(transport);

        let a = {
            let t = transport.clone();
            tokio::spawn(async move { t.transceive_command(CommandId::ReadSettings, &[]).await })
        };
        let b = {
            let t = transport.clone();
            tokio::spawn(async move {
                t.transceive_command(CommandId::GetDistanceResolution, &[])
                    .await
            })
        };
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a.is_ok());
        assert!(b.is_ok());

        // Every write is answered before the next one goes out
        let mut outstanding = false;
        for event in bus.events() {
            match event {
                BusEvent::Write(_) => {
                    assert!(!outstanding, "second frame written before first ack");
                    outstanding = true;
                }
                BusEvent::Deliver(_) => outstanding = false,
                _ => {}
            }
        }
        assert_eq!(bus.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_command_waits_for_outstanding_fetch() {
        let (bus, transport) = transport(MockBus::acking());
        let transport = Arc::new(transport);

        let holder = {
            let t = transport.clone();
            tokio::spawn(async move { t.fetch_data_frame().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = transport
            .transceive_command(CommandId::ReadSettings, &[])
            .await;
        assert!(result.is_ok());
        assert!(matches!(holder.await.unwrap(), Err(ProtocolError::Timeout)));

        let events = bus.events();
        // Index 0 is the disable issued when the transport registers its handler
        let fetch_timed_out = events
            .iter()
            .skip(1)
            .position(|e| *e == BusEvent::DisableRx)
            .unwrap()
            + 1;
        let first_write = events
            .iter()
            .position(|e| matches!(e, BusEvent::Write(_)))
            .unwrap();
        assert!(first_write > fetch_timed_out);
    }

    #[tokio::test]
    async fn test_config_mode_leaves_after_failure() {
        let (bus, transport) = transport(MockBus::with_responder(|wire| {
            let cmd = command_word(wire)?;
            let status = if cmd == CommandId::SetDistanceResolution.code() {
                1
            } else {
                0
            };
            Some(ack_bytes(cmd, status, &[]))
        }));

        let result = transport
            .transceive_in_config_mode(CommandId::SetDistanceResolution, &[0x01, 0x00])
            .await;
        assert!(matches!(result, Err(ProtocolError::BadResponse { .. })));
        assert_eq!(bus.commands(), vec![0x00FF, 0x00AA, 0x00FE]);
        let leaves = bus
            .commands()
            .iter()
            .filter(|&&c| c == CommandId::LeaveConfigMode.code())
            .count();
        assert_eq!(leaves, 1);
    }

    #[tokio::test]
    async fn test_config_mode_enter_failure_skips_leave() {
        let (bus, transport) = transport(MockBus::with_responder(|wire| {
            let cmd = command_word(wire)?;
            Some(ack_bytes(cmd, 1, &[]))
        }));
        let result = transport
            .transceive_in_config_mode(CommandId::ReadSettings, &[])
            .await;
        assert!(result.is_err());
        assert_eq!(bus.commands(), vec![0x00FF]);
    }

    #[tokio::test]
    async fn test_leave_failure_reported_after_success() {
        let (_bus, transport) = transport(MockBus::with_responder(|wire| {
            let cmd = command_word(wire)?;
            let status = u16::from(cmd == CommandId::LeaveConfigMode.code());
            Some(ack_bytes(cmd, status, &[]))
        }));
        let result = transport
            .transceive_in_config_mode(CommandId::ReadSettings, &[])
            .await;
        assert!(matches!(
            result,
            Err(ProtocolError::BadResponse { command: 0x00FE, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_data_frame_skips_ack_noise() {
        let (bus, transport) = transport(MockBus::new());
        bus.queue_rx(ack_bytes(0x0061, 0, &[0xAA]));
        bus.queue_rx(data_frame_bytes(&[0x02, 0xAA, 0x00]));

        let frame = transport.fetch_data_frame().await.unwrap();
        assert_eq!(frame.frame_type, FrameType::Data);
        assert_eq!(&frame.body[..], &[0x02, 0xAA, 0x00]);
        assert!(!bus.rx_enabled());
    }

    #[tokio::test]
    async fn test_fetch_data_frame_times_out() {
        let (bus, transport) = transport(MockBus::new());
        let result = transport.fetch_data_frame().await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
        assert!(!bus.rx_enabled());
    }
}
