use thiserror::Error;

/// Failures while mapping or persisting frames.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("no file open")]
    FileNotOpen,

    #[error("unknown dataset '{0}'")]
    UnknownDataset(String),

    #[error("frame {frame} out of order: precedes start frame offset {start}")]
    FrameOutOfOrder { frame: u64, start: u64 },

    #[error("frame {frame} does not belong to rank {rank} of {processes}")]
    WrongRank {
        frame: u64,
        rank: u64,
        processes: u64,
    },

    #[error("frame data for dataset '{dataset}' too short: need {expected} bytes, got {actual}")]
    TruncatedFrame {
        dataset: String,
        expected: usize,
        actual: usize,
    },

    #[error("direct chunk write failed for dataset '{dataset}' at row {row}")]
    ChunkWrite { dataset: String, row: u64 },

    #[error(transparent)]
    Hdf5(#[from] hdf5::Error),
}

/// Rejections of control-plane configuration deltas.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("cannot change {0} while writing")]
    WriteInProgress(&'static str),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    BadValue {
        field: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Writer(#[from] WriterError),
}
