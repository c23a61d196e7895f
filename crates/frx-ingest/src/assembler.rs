//! Frame assembler state machine.
//!
//! Maps each incoming packet to a slot in a frame buffer, tracks per-packet
//! arrival, and emits a [`FrameReady`] when a frame completes or times out.
//! When the pool is exhausted, packets are sunk into a single reusable drop
//! buffer and the affected frames are accounted but never emitted.
//!
//! All operations are synchronous and non-blocking; the ingest loop drives
//! them between socket reads and feeds completions into its output queue.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use frx_core::time::elapsed_ms;
use frx_core::{BufferRelease, FrameReady, FrameState, PacketHeader, SensorGeometry};
use tracing::{debug, error, warn};

use crate::error::{AssemblyError, PoolError};
use crate::pool::FrameBufferPool;

/// Where the next payload will land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTarget {
    /// Byte offset of the packet's slot within the frame buffer.
    pub offset: usize,
    /// Read limit for the payload; primary or tail packet size.
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Pool(usize),
    Drop,
}

/// Per-frame receive metadata, preallocated one per pool slot plus one for
/// the drop buffer and reset on assignment.
struct FrameTracker {
    frame_number: u32,
    state: FrameState,
    packets_received: u32,
    packet_seen: Vec<bool>,
    started: Instant,
}

impl FrameTracker {
    fn new(geometry: &SensorGeometry) -> Self {
        Self {
            frame_number: 0,
            state: FrameState::Incomplete,
            packets_received: 0,
            packet_seen: vec![false; geometry.packet_state_slots()],
            started: Instant::now(),
        }
    }

    fn reset(&mut self, frame_number: u32, now: Instant) {
        self.frame_number = frame_number;
        self.state = FrameState::Incomplete;
        self.packets_received = 0;
        self.packet_seen.fill(false);
        self.started = now;
    }

    /// Distinct packet slots seen; duplicates inflate `packets_received`
    /// above this.
    fn distinct_packets(&self) -> usize {
        self.packet_seen.iter().filter(|&&seen| seen).count()
    }
}

struct Pending {
    binding: Binding,
    offset: usize,
    capacity: usize,
}

pub struct FrameAssembler {
    geometry: SensorGeometry,
    timeout: Duration,
    pool: FrameBufferPool,
    trackers: Vec<FrameTracker>,
    drop_tracker: FrameTracker,
    drop_buffer: Box<[u8]>,
    /// In-flight frames only; dropped frames never enter the map.
    frame_map: HashMap<u32, usize>,
    /// Last frame number observed, and where its packets are going.
    current: Option<(u32, Binding)>,
    dropping: bool,
    pending: Option<Pending>,
    frames_completed: u64,
    frames_timed_out: u64,
}

impl FrameAssembler {
    pub fn new(geometry: SensorGeometry, timeout: Duration, pool: FrameBufferPool) -> Self {
        assert_eq!(
            pool.buffer_size(),
            geometry.frame_buffer_size(),
            "pool buffer size must match sensor frame size"
        );
        let trackers = (0..pool.num_buffers())
            .map(|_| FrameTracker::new(&geometry))
            .collect();
        Self {
            drop_tracker: FrameTracker::new(&geometry),
            drop_buffer: vec![0u8; geometry.frame_buffer_size()].into_boxed_slice(),
            trackers,
            geometry,
            timeout,
            pool,
            frame_map: HashMap::new(),
            current: None,
            dropping: false,
            pending: None,
            frames_completed: 0,
            frames_timed_out: 0,
        }
    }

    pub fn geometry(&self) -> &SensorGeometry {
        &self.geometry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Select the landing slot for the packet described by `header`.
    ///
    /// Binds a buffer to the frame on its first packet (or the drop buffer
    /// when the pool is exhausted) and marks the packet's arrival bit.
    pub fn process_header(
        &mut self,
        header: &PacketHeader,
        now: Instant,
    ) -> Result<PayloadTarget, AssemblyError> {
        let g = &self.geometry;
        let type_index = header.packet_type.plane_index();
        let subframe = header.subframe_number as usize;
        let packet = header.packet_number as usize;
        if type_index >= g.num_packet_types {
            return Err(AssemblyError::PacketOutOfRange {
                field: "packet_type",
                value: type_index as u32,
            });
        }
        if subframe >= g.num_subframes {
            return Err(AssemblyError::PacketOutOfRange {
                field: "subframe_number",
                value: subframe as u32,
            });
        }
        if packet >= g.num_frame_packets() {
            return Err(AssemblyError::PacketOutOfRange {
                field: "packet_number",
                value: packet as u32,
            });
        }

        let frame = self.geometry.effective_frame_number(header);

        if self.current.map(|(f, _)| f) != Some(frame) {
            let binding = if let Some(&id) = self.frame_map.get(&frame) {
                Binding::Pool(id)
            } else {
                match self.pool.acquire() {
                    Some(id) => {
                        if self.dropping {
                            self.dropping = false;
                            debug!(frame, buffer_id = id, "free buffer available again");
                        } else {
                            debug!(frame, buffer_id = id, "first packet of frame");
                        }
                        self.frame_map.insert(frame, id);
                        self.trackers[id].reset(frame, now);
                        Binding::Pool(id)
                    }
                    None => {
                        if !self.dropping {
                            self.dropping = true;
                            error!(
                                frame,
                                "first packet of frame but no free buffers, dropping frame data"
                            );
                        }
                        self.drop_tracker.reset(frame, now);
                        Binding::Drop
                    }
                }
            };
            self.current = Some((frame, binding));
        }

        let (_, binding) = self.current.expect("current frame bound above");
        let tracker = match binding {
            Binding::Pool(id) => &mut self.trackers[id],
            Binding::Drop => &mut self.drop_tracker,
        };
        // Arrival bit is idempotent; the received count (below) is not.
        let slot = (type_index * g.num_subframes + subframe) * g.num_frame_packets() + packet;
        tracker.packet_seen[slot] = true;

        let offset = type_index * g.plane_bytes()
            + subframe * g.subframe_bytes()
            + packet * g.primary_packet_size;
        let capacity = g.payload_size_for(header.packet_number);
        self.pending = Some(Pending {
            binding,
            offset,
            capacity,
        });
        Ok(PayloadTarget { offset, capacity })
    }

    /// Record the payload for the most recent header and emit the frame if it
    /// completed. Every arrival counts towards completion, duplicates
    /// included.
    pub fn process_payload(&mut self, payload: &[u8], now: Instant) -> Option<FrameReady> {
        let Pending {
            binding,
            offset,
            capacity,
        } = self.pending.take()?;
        let len = payload.len().min(capacity);
        match binding {
            Binding::Pool(id) => {
                let buf = self.pool.frame_mut(id).ok()?;
                buf[offset..offset + len].copy_from_slice(&payload[..len]);
            }
            Binding::Drop => {
                self.drop_buffer[offset..offset + len].copy_from_slice(&payload[..len]);
            }
        }

        let tracker = match binding {
            Binding::Pool(id) => &mut self.trackers[id],
            Binding::Drop => &mut self.drop_tracker,
        };
        tracker.packets_received += 1;
        if tracker.packets_received < self.geometry.num_frame_packets() as u32 {
            return None;
        }

        tracker.state = FrameState::Complete;
        let Binding::Pool(id) = binding else {
            // Drop-buffer frames complete silently and are never emitted.
            return None;
        };

        let frame_number = tracker.frame_number;
        let state = tracker.state;
        let packets_received = tracker.packets_received;
        let elapsed = elapsed_ms(tracker.started, now);
        self.frame_map.remove(&frame_number);
        // Reset the latch so a following identical frame number starts fresh.
        self.current = None;
        let data = self
            .pool
            .take(id)
            .expect("completed frame buffer missing from pool");
        self.frames_completed += 1;
        debug!(frame = frame_number, buffer_id = id, "frame complete");
        Some(FrameReady {
            buffer_id: id,
            frame_number,
            state,
            packets_received,
            elapsed_ms: elapsed,
            data,
        })
    }

    /// Evict frames older than the configured timeout.
    pub fn tick(&mut self, now: Instant) -> Vec<FrameReady> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let expired: Vec<(u32, usize)> = self
            .frame_map
            .iter()
            .filter(|&(_, &id)| elapsed_ms(self.trackers[id].started, now) > timeout_ms)
            .map(|(&frame, &id)| (frame, id))
            .collect();

        let mut ready = Vec::with_capacity(expired.len());
        for (frame, id) in expired {
            self.frame_map.remove(&frame);
            if self.current.map(|(f, _)| f) == Some(frame) {
                self.current = None;
            }
            let tracker = &mut self.trackers[id];
            tracker.state = FrameState::TimedOut;
            debug!(
                frame,
                buffer_id = id,
                packets = tracker.packets_received,
                distinct = tracker.distinct_packets(),
                "frame timed out"
            );
            let data = self
                .pool
                .take(id)
                .expect("in-flight frame buffer missing from pool");
            ready.push(FrameReady {
                buffer_id: id,
                frame_number: frame,
                state: tracker.state,
                packets_received: tracker.packets_received,
                elapsed_ms: elapsed_ms(tracker.started, now),
                data,
            });
            self.frames_timed_out += 1;
        }
        if !ready.is_empty() {
            warn!(count = ready.len(), "released timed out incomplete frames");
        }
        ready
    }

    /// Shutdown: emit every in-flight frame as timed out.
    pub fn drain(&mut self, now: Instant) -> Vec<FrameReady> {
        let in_flight: Vec<(u32, usize)> = self
            .frame_map
            .drain()
            .collect();
        self.current = None;
        let mut ready = Vec::with_capacity(in_flight.len());
        for (frame, id) in in_flight {
            let tracker = &mut self.trackers[id];
            tracker.state = FrameState::TimedOut;
            let data = self
                .pool
                .take(id)
                .expect("in-flight frame buffer missing from pool");
            ready.push(FrameReady {
                buffer_id: id,
                frame_number: frame,
                state: tracker.state,
                packets_received: tracker.packets_received,
                elapsed_ms: elapsed_ms(tracker.started, now),
                data,
            });
            self.frames_timed_out += 1;
        }
        ready
    }

    /// Apply a buffer release from the writer side.
    pub fn release(&mut self, release: BufferRelease) -> Result<(), PoolError> {
        self.pool.release(release.buffer_id, release.data)
    }

    pub fn num_free_buffers(&self) -> usize {
        self.pool.num_free()
    }

    pub fn num_in_flight(&self) -> usize {
        self.frame_map.len()
    }

    pub fn is_dropping(&self) -> bool {
        self.dropping
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    pub fn frames_timed_out(&self) -> u64 {
        self.frames_timed_out
    }
}
