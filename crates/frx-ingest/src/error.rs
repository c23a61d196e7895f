use thiserror::Error;

/// Buffer pool lifecycle failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("unknown buffer id {0}")]
    UnknownBuffer(usize),

    #[error("buffer {id}: released {len} bytes, pool buffers are {expected}")]
    SizeMismatch {
        id: usize,
        len: usize,
        expected: usize,
    },
}

/// Packet rejected by the assembler before payload selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("packet field {field} = {value} out of range for sensor geometry")]
    PacketOutOfRange { field: &'static str, value: u32 },
}
