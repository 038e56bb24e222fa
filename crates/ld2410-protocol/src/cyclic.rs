//! Cyclic data frame decoding
//!
//! Body layout of a data frame:
//! ```text
//! [data type: 1] [head 0xAA: 1] [target state: 1]
//! [motion distance: 2 LE] [motion energy: 1]
//! [stationary distance: 2 LE] [stationary energy: 1]
//! [detection distance: 2 LE]
//! (engineering only)
//! [max motion gate: 1] [max stationary gate: 1]
//! [motion energy per gate: 9] [stationary energy per gate: 9]
//! [light level: 1] [out pin: 1]
//! [magic word 0x0055: 2 LE]
//! ```

use crate::types::{le_u16, ProtocolError, GATE_COUNT};
use serde::Serialize;

/// Size of the basic cyclic record
pub const CYCLIC_DATA_SIZE: usize = 11;
/// Size of the engineering record following the cyclic record
pub const ENGINEERING_DATA_SIZE: usize = 2 + 2 * GATE_COUNT + 2;
/// Head byte inside the cyclic record
pub const CYCLIC_HEAD: u8 = 0xAA;
/// Magic word closing the cyclic body
pub const CYCLIC_BODY_FOOTER: u16 = 0x0055;

/// Data type byte of frames carrying engineering data
pub const CYCLIC_WITH_ENGIN_DATA: u8 = 0x01;
/// Data type byte of basic frames
pub const CYCLIC_BASIC_DATA: u8 = 0x02;

/// Target state reported by the radar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    None,
    Moving,
    Stationary,
    Both,
    Unknown(u8),
}

impl From<u8> for TargetState {
    fn from(value: u8) -> Self {
        match value {
            0x00 => TargetState::None,
            0x01 => TargetState::Moving,
            0x02 => TargetState::Stationary,
            0x03 => TargetState::Both,
            v => TargetState::Unknown(v),
        }
    }
}

impl From<TargetState> for u8 {
    fn from(state: TargetState) -> Self {
        match state {
            TargetState::None => 0x00,
            TargetState::Moving => 0x01,
            TargetState::Stationary => 0x02,
            TargetState::Both => 0x03,
            TargetState::Unknown(v) => v,
        }
    }
}

impl TargetState {
    /// Check if any target is detected
    #[must_use]
    pub fn has_target(&self) -> bool {
        matches!(
            self,
            TargetState::Moving | TargetState::Stationary | TargetState::Both
        )
    }
}

/// Basic measurement present in every data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CyclicData {
    pub target_state: TargetState,
    /// Distance to the moving target in cm
    pub motion_distance: u16,
    pub motion_energy: u8,
    /// Distance to the stationary target in cm
    pub stationary_distance: u16,
    pub stationary_energy: u8,
    /// Detection distance in cm
    pub detection_distance: u16,
}

impl CyclicData {
    fn decode(record: &[u8; CYCLIC_DATA_SIZE]) -> Self {
        Self {
            target_state: TargetState::from(record[2]),
            motion_distance: u16::from_le_bytes([record[3], record[4]]),
            motion_energy: record[5],
            stationary_distance: u16::from_le_bytes([record[6], record[7]]),
            stationary_energy: record[8],
            detection_distance: u16::from_le_bytes([record[9], record[10]]),
        }
    }
}

/// Per-gate detail present only in engineering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineeringData {
    pub max_motion_gate: u8,
    pub max_stationary_gate: u8,
    pub motion_energy: [u8; GATE_COUNT],
    pub stationary_energy: [u8; GATE_COUNT],
    pub light_level: u8,
    pub out_pin: u8,
}

impl EngineeringData {
    fn decode(record: &[u8; ENGINEERING_DATA_SIZE]) -> Self {
        let mut motion_energy = [0u8; GATE_COUNT];
        let mut stationary_energy = [0u8; GATE_COUNT];
        motion_energy.copy_from_slice(&record[2..2 + GATE_COUNT]);
        stationary_energy.copy_from_slice(&record[2 + GATE_COUNT..2 + 2 * GATE_COUNT]);
        Self {
            max_motion_gate: record[0],
            max_stationary_gate: record[1],
            motion_energy,
            stationary_energy,
            light_level: record[2 + 2 * GATE_COUNT],
            out_pin: record[3 + 2 * GATE_COUNT],
        }
    }
}

/// One decoded data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Sample {
    Basic {
        #[serde(flatten)]
        data: CyclicData,
    },
    Engineering {
        #[serde(flatten)]
        data: CyclicData,
        engineering: EngineeringData,
    },
}

impl Sample {
    /// Decode the body of a data frame
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let Some(record) = body
            .get(..CYCLIC_DATA_SIZE)
            .and_then(|r| <&[u8; CYCLIC_DATA_SIZE]>::try_from(r).ok())
        else {
            return Err(ProtocolError::BadMessage(format!(
                "cyclic body too short: {} bytes",
                body.len()
            )));
        };

        let engineering = record[0] == CYCLIC_WITH_ENGIN_DATA;
        if record[1] != CYCLIC_HEAD {
            return Err(ProtocolError::BadMessage(format!(
                "bad cyclic head byte {:#04X}",
                record[1]
            )));
        }

        let data_end = CYCLIC_DATA_SIZE + if engineering { ENGINEERING_DATA_SIZE } else { 0 };
        match le_u16(body, data_end) {
            Some(CYCLIC_BODY_FOOTER) => {}
            Some(word) => {
                return Err(ProtocolError::BadMessage(format!(
                    "bad cyclic footer word {:#06X}",
                    word
                )))
            }
            None => {
                return Err(ProtocolError::BadMessage(format!(
                    "cyclic body truncated at {} bytes",
                    body.len()
                )))
            }
        }

        let data = CyclicData::decode(record);
        if !engineering {
            return Ok(Sample::Basic { data });
        }

        let record = <&[u8; ENGINEERING_DATA_SIZE]>::try_from(&body[CYCLIC_DATA_SIZE..data_end])
            .map_err(|_| ProtocolError::BadMessage("engineering record truncated".to_string()))?;
        Ok(Sample::Engineering {
            data,
            engineering: EngineeringData::decode(record),
        })
    }

    /// The basic measurement
    #[must_use]
    pub fn data(&self) -> &CyclicData {
        match self {
            Sample::Basic { data } | Sample::Engineering { data, .. } => data,
        }
    }

    /// Per-gate detail, if the module was in engineering mode
    #[must_use]
    pub fn engineering(&self) -> Option<&EngineeringData> {
        match self {
            Sample::Basic { .. } => None,
            Sample::Engineering { engineering, .. } => Some(engineering),
        }
    }

    #[must_use]
    pub fn is_engineering(&self) -> bool {
        self.engineering().is_some()
    }
}
