//! LD2410 device instance

use crate::config::DeviceConfig;
use crate::error::{GateFailure, SensorError};
use crate::settings::{
    check_gate, check_sensitivities, DeviceSettings, DistanceResolution, FirmwareVersion,
};
use crate::trigger::{PresencePin, Trigger, TriggerDispatch, TriggerHandler};
use ld2410_protocol::commands::{gate_sensitivity_payload, max_gates_payload};
use ld2410_protocol::{CommandId, Ld2410Transport, Sample, UartBus, GATE_COUNT};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// State cached from the module's replies
#[derive(Debug, Default)]
pub(crate) struct DeviceState {
    pub(crate) settings: DeviceSettings,
    pub(crate) sample: Option<Sample>,
}

/// One HLK-LD2410 radar on a UART
pub struct Ld2410<B: UartBus> {
    transport: Ld2410Transport<B>,
    state: Mutex<DeviceState>,
    pin: Option<Arc<dyn PresencePin>>,
    trigger: Mutex<Option<TriggerDispatch>>,
}

impl<B: UartBus> Ld2410<B> {
    /// Bring up the module with `config`
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an out-of-range config; otherwise the first
    /// failing initialization step fails the whole call.
    pub async fn new(
        bus: Arc<B>,
        config: DeviceConfig,
        pin: Option<Arc<dyn PresencePin>>,
    ) -> Result<Self, SensorError> {
        config.validate()?;

        let device = Self {
            transport: Ld2410Transport::with_timeout(bus, config.response_timeout()),
            state: Mutex::new(DeviceState::default()),
            pin,
            trigger: Mutex::new(None),
        };

        device
            .set_max_gates_and_duration(
                config.max_motion_gate,
                config.max_stationary_gate,
                config.presence_timeout,
            )
            .await?;
        device
            .set_gate_sensitivities(&config.motion_sensitivity, &config.stationary_sensitivity)
            .await?;
        device
            .set_distance_resolution(config.distance_resolution)
            .await?;
        device.set_engineering_mode(config.engineering_mode).await?;
        let settings = device.read_settings().await?;

        tracing::info!(
            "LD2410 initialized: max gates {}/{}, timeout {} s, resolution {:?}, engineering {}",
            settings.max_motion_gate,
            settings.max_stationary_gate,
            settings.presence_timeout,
            config.distance_resolution,
            config.engineering_mode
        );
        Ok(device)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settings as last read from or written to the module
    pub fn settings(&self) -> DeviceSettings {
        self.lock_state().settings
    }

    /// Most recent decoded data frame
    pub fn last_sample(&self) -> Option<Sample> {
        self.lock_state().sample
    }

    pub async fn set_engineering_mode(&self, enable: bool) -> Result<(), SensorError> {
        let command = if enable {
            CommandId::EnterEngineeringMode
        } else {
            CommandId::LeaveEngineeringMode
        };
        self.transport.transceive_in_config_mode(command, &[]).await?;
        tracing::debug!("Engineering mode {}", if enable { "on" } else { "off" });
        Ok(())
    }

    pub async fn set_distance_resolution(
        &self,
        resolution: DistanceResolution,
    ) -> Result<(), SensorError> {
        self.transport
            .transceive_in_config_mode(
                CommandId::SetDistanceResolution,
                &resolution.wire_value().to_le_bytes(),
            )
            .await?;
        Ok(())
    }

    pub async fn get_distance_resolution(&self) -> Result<DistanceResolution, SensorError> {
        let ack = self
            .transport
            .transceive_in_config_mode(CommandId::GetDistanceResolution, &[])
            .await?;
        let Some(&[lo, hi]) = ack.payload.get(..2).map(<&[u8; 2]>::try_from).and_then(Result::ok)
        else {
            return Err(SensorError::Protocol(
                ld2410_protocol::ProtocolError::BadMessage(
                    "distance resolution reply too short".to_string(),
                ),
            ));
        };
        DistanceResolution::try_from(u16::from_le_bytes([lo, hi]))
    }

    /// Read the parameter set and cache it
    pub async fn read_settings(&self) -> Result<DeviceSettings, SensorError> {
        let ack = self
            .transport
            .transceive_in_config_mode(CommandId::ReadSettings, &[])
            .await?;
        let settings = DeviceSettings::parse(&ack.payload)?;
        self.lock_state().settings = settings;
        tracing::debug!("Read settings: {:?}", settings);
        Ok(settings)
    }

    /// Write per-gate sensitivities, one transaction per gate
    ///
    /// Every gate is attempted even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// [`SensorError::GateSensitivity`] listing each failed gate.
    pub async fn set_gate_sensitivities(
        &self,
        motion: &[u8; GATE_COUNT],
        stationary: &[u8; GATE_COUNT],
    ) -> Result<(), SensorError> {
        check_sensitivities("motion sensitivity", motion)?;
        check_sensitivities("stationary sensitivity", stationary)?;

        let session = self.transport.config_session().await?;
        let mut failures = Vec::new();
        for (gate, (&m, &s)) in (0u8..).zip(motion.iter().zip(stationary.iter())) {
            let payload = gate_sensitivity_payload(gate, m, s);
            match session
                .command(CommandId::SetGateSensitivityConfig, &payload)
                .await
            {
                Ok(_) => {
                    let mut state = self.lock_state();
                    state.settings.motion_gate_sensitivity[usize::from(gate)] = m;
                    state.settings.stationary_gate_sensitivity[usize::from(gate)] = s;
                }
                Err(error) => {
                    tracing::warn!("Failed to set sensitivity of gate {}: {}", gate, error);
                    failures.push(GateFailure { gate, error });
                }
            }
        }
        let closed = session.close().await;

        if !failures.is_empty() {
            return Err(SensorError::GateSensitivity { failures });
        }
        closed?;
        Ok(())
    }

    /// Write both max gates and the presence timeout in one transaction
    ///
    /// A `presence_timeout` of 0 is passed through to the module.
    pub async fn set_max_gates_and_duration(
        &self,
        max_motion_gate: u8,
        max_stationary_gate: u8,
        presence_timeout: u16,
    ) -> Result<(), SensorError> {
        check_gate("max motion gate", max_motion_gate)?;
        check_gate("max stationary gate", max_stationary_gate)?;

        self.transport
            .transceive_in_config_mode(
                CommandId::SetMaxGatesAndDuration,
                &max_gates_payload(max_motion_gate, max_stationary_gate, presence_timeout),
            )
            .await?;

        let mut state = self.lock_state();
        state.settings.max_motion_gate = max_motion_gate;
        state.settings.max_stationary_gate = max_stationary_gate;
        state.settings.presence_timeout = presence_timeout;
        Ok(())
    }

    /// Wait for the next data frame and decode it into the device state
    ///
    /// Must not run concurrently with configuration operations; the
    /// transport serializes them but a fetch started first will hold the
    /// wire until its data frame or timeout.
    pub async fn sample_fetch(&self) -> Result<(), SensorError> {
        let frame = self.transport.fetch_data_frame().await?;
        let sample = Sample::decode(&frame.body)?;
        self.lock_state().sample = Some(sample);
        Ok(())
    }

    pub async fn firmware_version(&self) -> Result<FirmwareVersion, SensorError> {
        let ack = self
            .transport
            .transceive_in_config_mode(CommandId::ReadFirmwareVersion, &[])
            .await?;
        let version = FirmwareVersion::parse(&ack.payload)?;
        tracing::info!("LD2410 firmware {}", version);
        Ok(version)
    }

    /// Restore factory settings; takes effect after a restart
    pub async fn factory_reset(&self) -> Result<(), SensorError> {
        self.transport
            .transceive_in_config_mode(CommandId::FactoryReset, &[])
            .await?;
        tracing::info!("LD2410 factory reset");
        Ok(())
    }

    /// Reboot the module
    pub async fn restart(&self) -> Result<(), SensorError> {
        let session = self.transport.config_session().await?;
        let result = session.command(CommandId::Restart, &[]).await;
        // The module may already be rebooting and miss the leave; close logs it
        let _ = session.close().await;
        result?;
        self.lock_state().sample = None;
        tracing::info!("LD2410 restarting");
        Ok(())
    }

    /// Install or remove the presence handler
    pub fn trigger_set(
        &self,
        trigger: Trigger,
        handler: Option<TriggerHandler>,
    ) -> Result<(), SensorError> {
        let Trigger::Presence = trigger;
        let Some(pin) = self.pin.as_ref() else {
            return Err(SensorError::NotSupported(
                "no presence pin configured".to_string(),
            ));
        };

        let mut slot = self.trigger.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop the old dispatch first so it unhooks the pin before the new one hooks it
        slot.take();
        if let Some(handler) = handler {
            *slot = Some(TriggerDispatch::start(pin.clone(), handler));
        }
        Ok(())
    }

    /// Current level of the presence pin
    pub fn presence(&self) -> Option<bool> {
        self.pin.as_ref().map(|pin| pin.is_active())
    }
}
