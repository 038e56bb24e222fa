//! LD2410 presence radar
//!
//! This crate provides the device-level API of the HLK-LD2410 on top of
//! the frame and transaction layer in `ld2410-protocol`.

pub mod attributes;
pub mod config;
pub mod device;
pub mod error;
pub mod settings;
pub mod trigger;

pub use attributes::{Attribute, Channel, SensorValue};
pub use config::DeviceConfig;
pub use device::Ld2410;
pub use error::{GateFailure, SensorError};
pub use settings::{DeviceSettings, DistanceResolution, FirmwareVersion};
pub use trigger::{EdgeCallback, PresenceEvent, PresencePin, Trigger, TriggerHandler};
