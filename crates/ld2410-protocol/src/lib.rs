//! HiLink LD2410 serial protocol implementation
//!
//! This crate implements the UART framing and command/ACK transaction
//! protocol of the HLK-LD2410 24 GHz presence radar.

pub mod bus;
pub mod commands;
pub mod cyclic;
pub mod frame;
pub mod framer;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transport;
pub mod types;

pub use bus::{RxAction, RxHandler, SerialBus, UartBus, BAUD_RATE};
pub use commands::CommandId;
pub use cyclic::{CyclicData, EngineeringData, Sample, TargetState};
pub use frame::{Ack, Frame};
pub use framer::{FrameBuffer, FrameResult};
pub use transport::{ConfigSession, Ld2410Transport, DEFAULT_TIMEOUT};
pub use types::*;
