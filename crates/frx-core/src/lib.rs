//! Shared building blocks for the frx detector data-acquisition pipeline.
//!
//! The ingest side (`frx-ingest`) and the persistence side (`frx-writer`)
//! communicate exclusively through the message types defined here, and both
//! derive their wire and buffer arithmetic from [`sensor::SensorGeometry`].

pub mod error;
pub mod frame;
pub mod sensor;
pub mod time;

pub use error::DecodeError;
pub use frame::{BufferRelease, FrameReady, FrameState};
pub use sensor::{PacketHeader, PacketType, SensorGeometry, SensorKind};
