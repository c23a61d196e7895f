//! Chunk-aligned frame persistence.
//!
//! Completed frames arrive from the ingest side, are mapped from hardware
//! frame numbers onto dataset rows, and land as direct chunk writes in an
//! extensible HDF5 dataset. Configuration and status flow through a small
//! JSON-shaped control adapter.

pub mod control;
pub mod dataset;
pub mod error;
pub mod offset;
pub mod service;
pub mod writer;

pub use dataset::{DatasetDefinition, DatasetRegistry, PixelKind};
pub use error::{ControlError, WriterError};
pub use offset::FrameOffsetMapper;
pub use service::{run_writer, ControlRequest};
pub use writer::{FrameView, FrameWriter, SubframeLayout};
