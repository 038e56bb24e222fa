//! Generic channel and attribute access
//!
//! Maps sensor-style `(channel, attribute, value)` requests onto the
//! device's configuration operations and cached sample.

use crate::device::Ld2410;
use crate::error::SensorError;
use crate::settings::{DistanceResolution, MAX_SENSITIVITY};
use ld2410_protocol::{UartBus, GATE_COUNT};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Readable measurement channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    TargetState,
    MotionDistance,
    MotionEnergy,
    StationaryDistance,
    StationaryEnergy,
    DetectionDistance,
    /// Engineering mode only
    MotionEnergyPerGate,
    /// Engineering mode only
    StationaryEnergyPerGate,
    /// Engineering mode only
    LightLevel,
    /// Engineering mode only
    OutPin,
    All,
}

/// Configurable parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    EngineeringMode,
    /// Gate size in cm, 75 or 20
    DistanceResolution,
    MotionSensitivity,
    StationarySensitivity,
    MaxMotionGate,
    MaxStationaryGate,
    /// Seconds
    PresenceTimeout,
    /// Read only
    MaxDistanceGate,
}

impl Attribute {
    pub const ALL: [Attribute; 8] = [
        Attribute::EngineeringMode,
        Attribute::DistanceResolution,
        Attribute::MotionSensitivity,
        Attribute::StationarySensitivity,
        Attribute::MaxMotionGate,
        Attribute::MaxStationaryGate,
        Attribute::PresenceTimeout,
        Attribute::MaxDistanceGate,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Attribute::EngineeringMode => "engineering_mode",
            Attribute::DistanceResolution => "distance_resolution",
            Attribute::MotionSensitivity => "motion_sensitivity",
            Attribute::StationarySensitivity => "stationary_sensitivity",
            Attribute::MaxMotionGate => "max_motion_gate",
            Attribute::MaxStationaryGate => "max_stationary_gate",
            Attribute::PresenceTimeout => "presence_timeout",
            Attribute::MaxDistanceGate => "max_distance_gate",
        }
    }

    /// Channels the attribute may be addressed through
    fn accepts(self, channel: Channel) -> bool {
        match (self, channel) {
            (_, Channel::All) => true,
            (
                Attribute::MotionSensitivity,
                Channel::MotionEnergy | Channel::MotionEnergyPerGate,
            ) => true,
            (
                Attribute::StationarySensitivity,
                Channel::StationaryEnergy | Channel::StationaryEnergyPerGate,
            ) => true,
            _ => false,
        }
    }
}

impl FromStr for Attribute {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| SensorError::NotSupported(format!("unknown attribute '{}'", s)))
    }
}

/// A channel reading or attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Scalar(u32),
    Gates([u8; GATE_COUNT]),
}

impl SensorValue {
    fn scalar(self, attribute: Attribute) -> Result<u32, SensorError> {
        match self {
            SensorValue::Scalar(v) => Ok(v),
            SensorValue::Gates(_) => Err(SensorError::InvalidArgument(format!(
                "{} takes a single value",
                attribute.name()
            ))),
        }
    }

    /// A per-gate array, broadcasting a scalar to every gate
    fn gates(self, attribute: Attribute) -> Result<[u8; GATE_COUNT], SensorError> {
        match self {
            SensorValue::Gates(g) => Ok(g),
            SensorValue::Scalar(v) => match u8::try_from(v) {
                Ok(v) if v <= MAX_SENSITIVITY => Ok([v; GATE_COUNT]),
                _ => Err(SensorError::InvalidArgument(format!(
                    "{} {} exceeds {}",
                    attribute.name(),
                    v,
                    MAX_SENSITIVITY
                ))),
            },
        }
    }
}

fn narrow<T: TryFrom<u32>>(attribute: Attribute, value: u32) -> Result<T, SensorError> {
    T::try_from(value).map_err(|_| {
        SensorError::InvalidArgument(format!("{} {} out of range", attribute.name(), value))
    })
}

impl<B: UartBus> Ld2410<B> {
    /// Read a channel from the last fetched sample
    pub fn channel_get(&self, channel: Channel) -> Result<SensorValue, SensorError> {
        let sample = self.last_sample().ok_or(SensorError::NoData)?;
        let data = sample.data();
        let value = match channel {
            Channel::TargetState => SensorValue::Scalar(u8::from(data.target_state).into()),
            Channel::MotionDistance => SensorValue::Scalar(data.motion_distance.into()),
            Channel::MotionEnergy => SensorValue::Scalar(data.motion_energy.into()),
            Channel::StationaryDistance => SensorValue::Scalar(data.stationary_distance.into()),
            Channel::StationaryEnergy => SensorValue::Scalar(data.stationary_energy.into()),
            Channel::DetectionDistance => SensorValue::Scalar(data.detection_distance.into()),
            Channel::MotionEnergyPerGate
            | Channel::StationaryEnergyPerGate
            | Channel::LightLevel
            | Channel::OutPin => {
                let eng = sample.engineering().ok_or(SensorError::NoData)?;
                match channel {
                    Channel::MotionEnergyPerGate => SensorValue::Gates(eng.motion_energy),
                    Channel::StationaryEnergyPerGate => SensorValue::Gates(eng.stationary_energy),
                    Channel::LightLevel => SensorValue::Scalar(eng.light_level.into()),
                    _ => SensorValue::Scalar(eng.out_pin.into()),
                }
            }
            Channel::All => {
                return Err(SensorError::NotSupported(
                    "read channels individually".to_string(),
                ))
            }
        };
        Ok(value)
    }

    /// Write one attribute
    pub async fn attr_set(
        &self,
        channel: Channel,
        attribute: Attribute,
        value: SensorValue,
    ) -> Result<(), SensorError> {
        check_channel(channel, attribute)?;
        let current = self.settings();

        match attribute {
            Attribute::EngineeringMode => match value.scalar(attribute)? {
                0 => self.set_engineering_mode(false).await,
                1 => self.set_engineering_mode(true).await,
                v => Err(SensorError::InvalidArgument(format!(
                    "engineering mode {} is not 0 or 1",
                    v
                ))),
            },
            Attribute::DistanceResolution => {
                let resolution = match value.scalar(attribute)? {
                    75 => DistanceResolution::Cm75,
                    20 => DistanceResolution::Cm20,
                    v => {
                        return Err(SensorError::InvalidArgument(format!(
                            "distance resolution {} cm is not 75 or 20",
                            v
                        )))
                    }
                };
                self.set_distance_resolution(resolution).await
            }
            Attribute::MotionSensitivity => {
                let motion = value.gates(attribute)?;
                self.set_gate_sensitivities(&motion, &current.stationary_gate_sensitivity)
                    .await
            }
            Attribute::StationarySensitivity => {
                let stationary = value.gates(attribute)?;
                self.set_gate_sensitivities(&current.motion_gate_sensitivity, &stationary)
                    .await
            }
            Attribute::MaxMotionGate => {
                let gate = narrow(attribute, value.scalar(attribute)?)?;
                self.set_max_gates_and_duration(
                    gate,
                    current.max_stationary_gate,
                    current.presence_timeout,
                )
                .await
            }
            Attribute::MaxStationaryGate => {
                let gate = narrow(attribute, value.scalar(attribute)?)?;
                self.set_max_gates_and_duration(
                    current.max_motion_gate,
                    gate,
                    current.presence_timeout,
                )
                .await
            }
            Attribute::PresenceTimeout => {
                let timeout = narrow(attribute, value.scalar(attribute)?)?;
                self.set_max_gates_and_duration(
                    current.max_motion_gate,
                    current.max_stationary_gate,
                    timeout,
                )
                .await
            }
            Attribute::MaxDistanceGate => Err(SensorError::NotSupported(
                "max distance gate is read only".to_string(),
            )),
        }
    }

    /// Read one attribute back from the module
    pub async fn attr_get(
        &self,
        channel: Channel,
        attribute: Attribute,
    ) -> Result<SensorValue, SensorError> {
        check_channel(channel, attribute)?;

        let value = match attribute {
            Attribute::EngineeringMode => {
                let sample = self.last_sample().ok_or(SensorError::NoData)?;
                SensorValue::Scalar(u32::from(sample.is_engineering()))
            }
            Attribute::DistanceResolution => {
                SensorValue::Scalar(self.get_distance_resolution().await?.gate_size_cm())
            }
            _ => {
                let settings = self.read_settings().await?;
                match attribute {
                    Attribute::MotionSensitivity => {
                        SensorValue::Gates(settings.motion_gate_sensitivity)
                    }
                    Attribute::StationarySensitivity => {
                        SensorValue::Gates(settings.stationary_gate_sensitivity)
                    }
                    Attribute::MaxMotionGate => SensorValue::Scalar(settings.max_motion_gate.into()),
                    Attribute::MaxStationaryGate => {
                        SensorValue::Scalar(settings.max_stationary_gate.into())
                    }
                    Attribute::PresenceTimeout => {
                        SensorValue::Scalar(settings.presence_timeout.into())
                    }
                    _ => SensorValue::Scalar(settings.maximum_distance_gate.into()),
                }
            }
        };
        Ok(value)
    }
}

fn check_channel(channel: Channel, attribute: Attribute) -> Result<(), SensorError> {
    if attribute.accepts(channel) {
        Ok(())
    } else {
        Err(SensorError::NotSupported(format!(
            "{} on channel {:?}",
            attribute.name(),
            channel
        )))
    }
}
