//! Frame reassembly engine: maps detector UDP packets into a bounded pool of
//! preallocated frame buffers, detects completion and timeout, and publishes
//! finished buffers to the writer side.

pub mod assembler;
pub mod error;
pub mod pool;
pub mod receiver;

pub use assembler::{FrameAssembler, PayloadTarget};
pub use error::{AssemblyError, PoolError};
pub use pool::FrameBufferPool;
pub use receiver::{run_ingest, IngestStats};
