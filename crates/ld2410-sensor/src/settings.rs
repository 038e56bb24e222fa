//! Device settings as stored on the module

use crate::error::SensorError;
use ld2410_protocol::GATE_COUNT;
use serde::{Deserialize, Serialize};

/// Head byte of the READ_SETTINGS response record
pub const SETTINGS_HEAD: u8 = 0xAA;
/// Size of the READ_SETTINGS response record
pub const SETTINGS_RECORD_SIZE: usize = 4 + 2 * GATE_COUNT + 2;

/// Smallest configurable max gate
pub const MIN_GATE: u8 = 2;
/// Largest configurable max gate
pub const MAX_GATE: u8 = 8;
/// Largest per-gate sensitivity
pub const MAX_SENSITIVITY: u8 = 100;

/// Size of one range gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceResolution {
    /// 0.75 m per gate, 6 m range
    #[default]
    #[serde(rename = "75cm")]
    Cm75,
    /// 0.2 m per gate, 1.6 m range
    #[serde(rename = "20cm")]
    Cm20,
}

impl DistanceResolution {
    /// Value word sent with SET_DISTANCE_RESOLUTION
    #[must_use]
    pub fn wire_value(self) -> u16 {
        match self {
            DistanceResolution::Cm75 => 0x0000,
            DistanceResolution::Cm20 => 0x0001,
        }
    }

    /// Gate size in centimeters
    #[must_use]
    pub fn gate_size_cm(self) -> u32 {
        match self {
            DistanceResolution::Cm75 => 75,
            DistanceResolution::Cm20 => 20,
        }
    }
}

impl TryFrom<u16> for DistanceResolution {
    type Error = SensorError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(DistanceResolution::Cm75),
            0x0001 => Ok(DistanceResolution::Cm20),
            v => Err(SensorError::InvalidArgument(format!(
                "distance resolution {:#06X}",
                v
            ))),
        }
    }
}

/// Parameters reported by READ_SETTINGS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub maximum_distance_gate: u8,
    pub max_motion_gate: u8,
    pub max_stationary_gate: u8,
    pub motion_gate_sensitivity: [u8; GATE_COUNT],
    pub stationary_gate_sensitivity: [u8; GATE_COUNT],
    /// Seconds without detection before reporting no presence
    pub presence_timeout: u16,
}

impl DeviceSettings {
    /// Decode the READ_SETTINGS ACK payload
    pub fn parse(payload: &[u8]) -> Result<Self, SensorError> {
        if payload.len() < SETTINGS_RECORD_SIZE {
            return Err(SensorError::Protocol(
                ld2410_protocol::ProtocolError::BadMessage(format!(
                    "settings record too short: {} bytes",
                    payload.len()
                )),
            ));
        }
        if payload[0] != SETTINGS_HEAD {
            return Err(SensorError::Protocol(
                ld2410_protocol::ProtocolError::BadMessage(format!(
                    "bad settings head byte {:#04X}",
                    payload[0]
                )),
            ));
        }

        let mut motion_gate_sensitivity = [0u8; GATE_COUNT];
        let mut stationary_gate_sensitivity = [0u8; GATE_COUNT];
        motion_gate_sensitivity.copy_from_slice(&payload[4..4 + GATE_COUNT]);
        stationary_gate_sensitivity.copy_from_slice(&payload[4 + GATE_COUNT..4 + 2 * GATE_COUNT]);
        let timeout_at = 4 + 2 * GATE_COUNT;

        Ok(Self {
            maximum_distance_gate: payload[1],
            max_motion_gate: payload[2],
            max_stationary_gate: payload[3],
            motion_gate_sensitivity,
            stationary_gate_sensitivity,
            presence_timeout: u16::from_le_bytes([payload[timeout_at], payload[timeout_at + 1]]),
        })
    }

    /// Encode as the module reports it
    #[must_use]
    pub fn to_record(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(SETTINGS_RECORD_SIZE);
        record.push(SETTINGS_HEAD);
        record.push(self.maximum_distance_gate);
        record.push(self.max_motion_gate);
        record.push(self.max_stationary_gate);
        record.extend_from_slice(&self.motion_gate_sensitivity);
        record.extend_from_slice(&self.stationary_gate_sensitivity);
        record.extend_from_slice(&self.presence_timeout.to_le_bytes());
        record
    }
}

/// Check a max gate value
pub(crate) fn check_gate(name: &str, gate: u8) -> Result<(), SensorError> {
    if !(MIN_GATE..=MAX_GATE).contains(&gate) {
        return Err(SensorError::InvalidArgument(format!(
            "{} {} outside {}..={}",
            name, gate, MIN_GATE, MAX_GATE
        )));
    }
    Ok(())
}

/// Check a per-gate sensitivity array
pub(crate) fn check_sensitivities(name: &str, values: &[u8; GATE_COUNT]) -> Result<(), SensorError> {
    if let Some((gate, value)) = values
        .iter()
        .enumerate()
        .find(|&(_, &v)| v > MAX_SENSITIVITY)
    {
        return Err(SensorError::InvalidArgument(format!(
            "{} of gate {} is {}, maximum is {}",
            name, gate, value, MAX_SENSITIVITY
        )));
    }
    Ok(())
}

/// Firmware identification returned by READ_FIRMWARE_VERSION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareVersion {
    pub firmware_type: u16,
    pub major: u8,
    pub minor: u8,
    pub build: u32,
}

impl FirmwareVersion {
    pub fn parse(payload: &[u8]) -> Result<Self, SensorError> {
        if payload.len() < 8 {
            return Err(SensorError::Protocol(
                ld2410_protocol::ProtocolError::BadMessage(format!(
                    "firmware record too short: {} bytes",
                    payload.len()
                )),
            ));
        }
        Ok(Self {
            firmware_type: u16::from_le_bytes([payload[0], payload[1]]),
            minor: payload[2],
            major: payload[3],
            build: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
        })
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "V{}.{:02X}.{:08X}", self.major, self.minor, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_settings_record() {
        let mut payload = vec![0xAA, 0x08, 0x08, 0x08];
        payload.extend_from_slice(&[50; 9]);
        payload.extend_from_slice(&[50; 9]);
        payload.extend_from_slice(&[0x05, 0x00]);

        let settings = DeviceSettings::parse(&payload).unwrap();
        assert_eq!(settings.maximum_distance_gate, 8);
        assert_eq!(settings.max_motion_gate, 8);
        assert_eq!(settings.max_stationary_gate, 8);
        assert_eq!(settings.motion_gate_sensitivity, [50; 9]);
        assert_eq!(settings.stationary_gate_sensitivity, [50; 9]);
        assert_eq!(settings.presence_timeout, 5);
        assert_eq!(settings.to_record(), payload);
    }

    #[test]
    fn test_parse_settings_bad_head() {
        let mut payload = DeviceSettings::default().to_record();
        payload[0] = 0xAB;
        assert!(matches!(
            DeviceSettings::parse(&payload),
            Err(SensorError::Protocol(
                ld2410_protocol::ProtocolError::BadMessage(_)
            ))
        ));
    }

    #[test]
    fn test_parse_settings_truncated() {
        let payload = DeviceSettings::default().to_record();
        assert!(DeviceSettings::parse(&payload[..SETTINGS_RECORD_SIZE - 1]).is_err());
    }

    #[test]
    fn test_distance_resolution_values() {
        assert_eq!(
            DistanceResolution::try_from(1).unwrap(),
            DistanceResolution::Cm20
        );
        assert_eq!(DistanceResolution::Cm75.wire_value(), 0);
        assert!(matches!(
            DistanceResolution::try_from(2),
            Err(SensorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_firmware_version_display() {
        let version =
            FirmwareVersion::parse(&[0x00, 0x00, 0x07, 0x01, 0x16, 0x15, 0x09, 0x22]).unwrap();
        assert_eq!(version.major, 1);
        assert_eq!(version.minor, 7);
        assert_eq!(version.to_string(), "V1.07.22091516");
    }

    #[test]
    fn test_check_limits() {
        assert!(check_gate("max motion gate", 2).is_ok());
        assert!(check_gate("max motion gate", 9).is_err());
        assert!(check_sensitivities("motion sensitivity", &[100; 9]).is_ok());
        let mut values = [10; 9];
        values[4] = 101;
        assert!(check_sensitivities("motion sensitivity", &values).is_err());
    }
}
