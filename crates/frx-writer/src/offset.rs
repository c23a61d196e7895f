//! Hardware frame number to dataset row mapping.
//!
//! The detector firmware never resets its frame counter, so the first frame
//! seen latches a start offset that is subtracted from every subsequent
//! frame. Under multi-rank striping, frames are partitioned by 1-based
//! modular assignment to match the firmware's numbering.

use crate::error::WriterError;

#[derive(Debug, Clone, Copy)]
pub struct FrameOffsetMapper {
    start_frame: Option<u64>,
    processes: u64,
    rank: u64,
}

impl FrameOffsetMapper {
    pub fn new(processes: u64, rank: u64) -> Self {
        Self {
            start_frame: None,
            processes: processes.max(1),
            rank,
        }
    }

    /// Latch the start offset explicitly instead of on the first frame.
    pub fn set_start(&mut self, frame: u64) {
        self.start_frame = Some(frame);
    }

    pub fn start(&self) -> Option<u64> {
        self.start_frame
    }

    /// Map a raw hardware frame number to this rank's dataset row.
    pub fn map(&mut self, frame: u64) -> Result<u64, WriterError> {
        let start = *self.start_frame.get_or_insert(frame);
        if frame < start {
            return Err(WriterError::FrameOutOfOrder { frame, start });
        }
        let local = frame - start;
        if self.processes > 1 {
            // Firmware frame numbering starts at 1.
            if frame == 0 || (frame - 1) % self.processes != self.rank {
                return Err(WriterError::WrongRank {
                    frame,
                    rank: self.rank,
                    processes: self.processes,
                });
            }
            Ok(local / self.processes)
        } else {
            Ok(local)
        }
    }
}
