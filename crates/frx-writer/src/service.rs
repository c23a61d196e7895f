//! Writer service loop.
//!
//! Sole consumer of the frame queue from the ingest side and the request
//! queue from the control side, so file and dataset state stay single-owner.
//! Each completed raw frame is decomposed into one plane per packet type and
//! routed to the dataset of that plane's name; the buffer then goes back to
//! the ingest task over the release queue. HDF5 calls run inside
//! `block_in_place` so they never stall the runtime.

use frx_core::{BufferRelease, FrameReady, FrameState, PacketType, SensorGeometry};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{ControlError, WriterError};
use crate::writer::{FrameView, FrameWriter, SubframeLayout};

/// One configuration delta with its reply channel.
#[derive(Debug)]
pub struct ControlRequest {
    pub message: Value,
    pub reply: oneshot::Sender<Result<Value, ControlError>>,
}

/// Run the writer until both input queues close. Returns the writer so the
/// caller can log its final status.
pub async fn run_writer(
    mut writer: FrameWriter,
    geometry: SensorGeometry,
    mut frame_rx: mpsc::Receiver<FrameReady>,
    mut control_rx: mpsc::Receiver<ControlRequest>,
    release_tx: mpsc::Sender<BufferRelease>,
) -> FrameWriter {
    let mut frames_open = true;
    let mut control_open = true;
    loop {
        tokio::select! {
            frame = frame_rx.recv(), if frames_open => match frame {
                Some(frame) => {
                    let FrameReady { buffer_id, frame_number, state, packets_received, data, .. } = frame;
                    tokio::task::block_in_place(|| {
                        write_frame_planes(&mut writer, &geometry, frame_number, state, packets_received, &data);
                    });
                    if release_tx
                        .send(BufferRelease { buffer_id, data })
                        .await
                        .is_err()
                    {
                        debug!("release queue closed");
                    }
                }
                None => frames_open = false,
            },
            request = control_rx.recv(), if control_open => match request {
                Some(ControlRequest { message, reply }) => {
                    let result = tokio::task::block_in_place(|| writer.configure(&message));
                    let _ = reply.send(result);
                }
                None => control_open = false,
            },
            else => break,
        }
    }
    tokio::task::block_in_place(|| writer.stop_writing());
    writer
}

fn write_frame_planes(
    writer: &mut FrameWriter,
    geometry: &SensorGeometry,
    frame_number: u32,
    state: FrameState,
    packets_received: u32,
    data: &[u8],
) {
    if !writer.writing() {
        return;
    }
    if state == FrameState::TimedOut {
        warn!(
            frame = frame_number,
            packets = packets_received,
            "persisting partially received frame"
        );
    }
    for index in 0..geometry.num_packet_types {
        let Some(packet_type) = PacketType::from_u8(index as u8) else {
            break;
        };
        let dataset = packet_type.dataset_name();
        let start = index * geometry.plane_bytes();
        let Some(plane) = data.get(start..start + geometry.plane_bytes()) else {
            warn!(frame = frame_number, dataset, "frame buffer too small for plane");
            break;
        };
        let view = FrameView {
            dataset,
            frame_number: frame_number as u64,
            data: plane,
            subframes: subframe_layout(writer, geometry, dataset),
        };
        match writer.process_frame(&view) {
            Ok(_) => {}
            Err(
                err @ (WriterError::UnknownDataset(_)
                | WriterError::FrameOutOfOrder { .. }
                | WriterError::WrongRank { .. }),
            ) => {
                warn!(frame = frame_number, dataset, %err, "frame rejected");
            }
            Err(err) => {
                error!(frame = frame_number, dataset, %err, "frame write failed");
                writer.record_error(&err);
            }
        }
        if !writer.writing() {
            // Acquisition target reached mid-frame; remaining planes are
            // dropped like any other post-stop frame.
            break;
        }
    }
}

/// Frames split into subframe writes when the target dataset is chunked at
/// subframe width; otherwise they go as one whole-frame chunk.
fn subframe_layout(
    writer: &FrameWriter,
    geometry: &SensorGeometry,
    dataset: &str,
) -> Option<SubframeLayout> {
    if geometry.num_subframes < 2 {
        return None;
    }
    let def = writer.registry().get(dataset).ok()?;
    let chunks = def.chunk_dims();
    let width = geometry.subframe_width() as u64;
    let cols = *def.frame_dimensions.last()?;
    if *chunks.last()? == width && width < cols {
        Some(SubframeLayout {
            count: geometry.num_subframes,
            size_bytes: geometry.subframe_bytes(),
            width,
        })
    } else {
        None
    }
}
