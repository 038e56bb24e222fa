//! LD2410 protocol command definitions

/// Command words understood by the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CommandId {
    /// Set max motion/stationary gate and presence timeout
    SetMaxGatesAndDuration = 0x0060,
    /// Read the full parameter set
    ReadSettings = 0x0061,
    /// Start reporting per-gate energies
    EnterEngineeringMode = 0x0062,
    /// Stop reporting per-gate energies
    LeaveEngineeringMode = 0x0063,
    /// Set motion/stationary sensitivity of one gate
    SetGateSensitivityConfig = 0x0064,
    /// Read firmware type and version
    ReadFirmwareVersion = 0x00A0,
    /// Restore factory settings
    FactoryReset = 0x00A2,
    /// Reboot the module
    Restart = 0x00A3,
    /// Select 0.75 m or 0.2 m gate size
    SetDistanceResolution = 0x00AA,
    /// Read the gate size
    GetDistanceResolution = 0x00AB,
    /// Leave configuration mode
    LeaveConfigMode = 0x00FE,
    /// Enter configuration mode
    EnterConfigMode = 0x00FF,
}

impl CommandId {
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0060 => Some(CommandId::SetMaxGatesAndDuration),
            0x0061 => Some(CommandId::ReadSettings),
            0x0062 => Some(CommandId::EnterEngineeringMode),
            0x0063 => Some(CommandId::LeaveEngineeringMode),
            0x0064 => Some(CommandId::SetGateSensitivityConfig),
            0x00A0 => Some(CommandId::ReadFirmwareVersion),
            0x00A2 => Some(CommandId::FactoryReset),
            0x00A3 => Some(CommandId::Restart),
            0x00AA => Some(CommandId::SetDistanceResolution),
            0x00AB => Some(CommandId::GetDistanceResolution),
            0x00FE => Some(CommandId::LeaveConfigMode),
            0x00FF => Some(CommandId::EnterConfigMode),
            _ => None,
        }
    }

    /// The command word as sent on the wire
    #[must_use]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// The command word the module echoes back in its ACK
    #[must_use]
    pub fn ack_code(self) -> u16 {
        self.code() | crate::types::ACK_FLAG
    }
}

/// Parameter words inside a SET_GATE_SENSITIVITY_CONFIG payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum GateSensitivityParam {
    DistanceGate = 0x0000,
    MotionSensitivity = 0x0001,
    StationarySensitivity = 0x0002,
}

/// Parameter words inside a SET_MAX_GATES_AND_DURATION payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MaxGatesParam {
    MaxMotionGate = 0x0000,
    MaxStationaryGate = 0x0001,
    PresenceTimeout = 0x0002,
}

/// Value word sent along with ENTER_CONFIG_MODE
pub const ENTER_CONFIG_VALUE: u16 = 0x0001;

/// Append a `(parameter word, u32 value)` pair in wire order
pub fn push_param(payload: &mut Vec<u8>, word: u16, value: u32) {
    payload.extend_from_slice(&word.to_le_bytes());
    payload.extend_from_slice(&value.to_le_bytes());
}

/// Payload for one SET_GATE_SENSITIVITY_CONFIG transaction
#[must_use]
pub fn gate_sensitivity_payload(gate: u8, motion: u8, stationary: u8) -> Vec<u8> {
    let mut payload = Vec::with_capacity(18);
    push_param(
        &mut payload,
        GateSensitivityParam::DistanceGate as u16,
        u32::from(gate),
    );
    push_param(
        &mut payload,
        GateSensitivityParam::MotionSensitivity as u16,
        u32::from(motion),
    );
    push_param(
        &mut payload,
        GateSensitivityParam::StationarySensitivity as u16,
        u32::from(stationary),
    );
    payload
}

/// Payload for a SET_MAX_GATES_AND_DURATION transaction
#[must_use]
pub fn max_gates_payload(max_motion_gate: u8, max_stationary_gate: u8, timeout: u16) -> Vec<u8> {
    let mut payload = Vec::with_capacity(18);
    push_param(
        &mut payload,
        MaxGatesParam::MaxMotionGate as u16,
        u32::from(max_motion_gate),
    );
    push_param(
        &mut payload,
        MaxGatesParam::MaxStationaryGate as u16,
        u32::from(max_stationary_gate),
    );
    push_param(
        &mut payload,
        MaxGatesParam::PresenceTimeout as u16,
        u32::from(timeout),
    );
    payload
}
