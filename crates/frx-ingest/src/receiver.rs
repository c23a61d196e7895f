//! UDP ingest loop.
//!
//! One task owns the socket, the assembler and (through it) the buffer pool.
//! Datagrams are received whole into a scratch buffer, header prefix plus
//! payload in a single read, then decoded and handed to the assembler. Buffer
//! releases from the writer are applied between packets so the free list has
//! a single writer, and a periodic tick drives timeout eviction at half the
//! frame timeout.

use std::time::{Duration, Instant};

use frx_core::{BufferRelease, DecodeError, FrameReady};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::assembler::FrameAssembler;

/// Packet-level accounting for the ingest loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub datagrams: u64,
    pub short_headers: u64,
    pub bad_headers: u64,
    pub oversize_payloads: u64,
    pub frames_completed: u64,
    pub frames_timed_out: u64,
}

/// Run the ingest loop until shutdown is signalled or the frame queue
/// closes. Returns the final packet accounting.
pub async fn run_ingest(
    socket: UdpSocket,
    mut assembler: FrameAssembler,
    frame_tx: mpsc::Sender<FrameReady>,
    mut release_rx: mpsc::Receiver<BufferRelease>,
    mut shutdown: watch::Receiver<bool>,
) -> IngestStats {
    let geometry = *assembler.geometry();
    let mut scratch = vec![0u8; geometry.packet_header_size + geometry.max_payload()];
    let mut ticker = tokio::time::interval(tick_period(assembler.timeout()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut releases_open = true;
    let mut stats = IngestStats::default();

    'ingest: loop {
        tokio::select! {
            received = socket.recv_from(&mut scratch) => {
                let (len, _from) = match received {
                    Ok(v) => v,
                    Err(err) => {
                        warn!(%err, "udp receive failed");
                        continue;
                    }
                };
                stats.datagrams += 1;
                let header = match geometry.decode_header(&scratch[..len]) {
                    Ok(header) => header,
                    Err(err @ DecodeError::ShortHeader { .. }) => {
                        stats.short_headers += 1;
                        debug!(%err, len, "dropping datagram");
                        continue;
                    }
                    Err(err) => {
                        stats.bad_headers += 1;
                        debug!(%err, "dropping datagram");
                        continue;
                    }
                };
                let target = match assembler.process_header(&header, Instant::now()) {
                    Ok(target) => target,
                    Err(err) => {
                        stats.bad_headers += 1;
                        debug!(%err, "dropping datagram");
                        continue;
                    }
                };
                let payload = &scratch[geometry.packet_header_size..len];
                if payload.len() > target.capacity {
                    stats.oversize_payloads += 1;
                    warn!(
                        len = payload.len(),
                        capacity = target.capacity,
                        frame = header.frame_number,
                        packet = header.packet_number,
                        "oversize payload, dropping datagram"
                    );
                    continue;
                }
                if let Some(frame) = assembler.process_payload(payload, Instant::now()) {
                    if frame_tx.send(frame).await.is_err() {
                        warn!("frame queue closed, stopping ingest");
                        break 'ingest;
                    }
                }
            }
            _ = ticker.tick() => {
                for frame in assembler.tick(Instant::now()) {
                    if frame_tx.send(frame).await.is_err() {
                        warn!("frame queue closed, stopping ingest");
                        break 'ingest;
                    }
                }
            }
            release = release_rx.recv(), if releases_open => {
                match release {
                    Some(release) => {
                        if let Err(err) = assembler.release(release) {
                            warn!(%err, "buffer release rejected");
                        }
                    }
                    None => releases_open = false,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break 'ingest;
                }
            }
        }
    }

    // Flush every in-flight frame so the writer can account for it and the
    // buffers complete their round trip (or die with the queue).
    for frame in assembler.drain(Instant::now()) {
        if frame_tx.send(frame).await.is_err() {
            break;
        }
    }

    stats.frames_completed = assembler.frames_completed();
    stats.frames_timed_out = assembler.frames_timed_out();
    info!(
        datagrams = stats.datagrams,
        short_headers = stats.short_headers,
        bad_headers = stats.bad_headers,
        oversize = stats.oversize_payloads,
        completed = stats.frames_completed,
        timed_out = stats.frames_timed_out,
        "ingest loop finished"
    );
    stats
}

fn tick_period(timeout: Duration) -> Duration {
    // Monitor cadence stays at or below half the frame timeout, so a stale
    // frame waits at most one extra half-timeout before eviction.
    let period = timeout / 2;
    if period.is_zero() {
        // The interval itself needs a non-zero period.
        Duration::from_millis(1)
    } else {
        period
    }
}
