//! `frx`, the detector frame ingest node.
//!
//! Reassembles detector UDP packets into whole frames and hands them to the
//! chunked HDF5 writer. Three tasks cooperate over bounded queues: the
//! ingest loop owns the socket and buffer pool, the writer owns the file and
//! datasets, and a control task feeds newline-delimited JSON configuration
//! messages from stdin to the writer (replies go to stdout).
//!
//! With `--write`, the node bootstraps the configuration an external control
//! client would normally send (`data`/`reset` datasets chunked per subframe,
//! master dataset, frame budget) and starts writing immediately.

#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use frx_core::{SensorGeometry, SensorKind};
use frx_ingest::{run_ingest, FrameAssembler, FrameBufferPool};
use frx_writer::{run_writer, ControlRequest, FrameWriter};
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SensorTypeArg {
    #[value(name = "percival2m")]
    Percival2M,
    #[value(name = "percival13m")]
    Percival13M,
    #[value(name = "excalibur3m")]
    Excalibur3M,
}

impl From<SensorTypeArg> for SensorKind {
    fn from(arg: SensorTypeArg) -> Self {
        match arg {
            SensorTypeArg::Percival2M => SensorKind::Percival2M,
            SensorTypeArg::Percival13M => SensorKind::Percival13M,
            SensorTypeArg::Excalibur3M => SensorKind::Excalibur3M,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "frx", about = "Detector frame receiver and file writer")]
struct Cli {
    /// Node id, used for log correlation only.
    #[arg(long, default_value_t = 1)]
    node: u32,

    /// Memory budget for frame buffers in bytes.
    #[arg(long = "max-buffer-mem", default_value_t = 1_048_576)]
    max_buffer_mem: u64,

    /// Detector kind driving packet and frame geometry.
    #[arg(long = "sensor-type", value_enum)]
    sensor_type: SensorTypeArg,

    /// UDP port to receive packets on.
    #[arg(long = "rx-port", default_value_t = 8989)]
    rx_port: u16,

    /// Address to bind the receive socket to.
    #[arg(long = "rx-address", default_value = "0.0.0.0")]
    rx_address: String,

    /// Incomplete frames older than this are released as timed out.
    #[arg(long = "frame-timeout-ms", default_value_t = 1000)]
    frame_timeout_ms: u64,

    /// Output directory for the data file.
    #[arg(long = "file-path", default_value = "./")]
    file_path: String,

    /// Name of the data file.
    #[arg(long = "file-name", default_value = "test_file.h5")]
    file_name: String,

    /// Number of frames to write before stopping.
    #[arg(long, default_value_t = 3)]
    frames: u64,

    /// Number of cooperating writer processes striping one acquisition.
    #[arg(long, default_value_t = 1)]
    processes: u64,

    /// This writer's rank within the cooperating set.
    #[arg(long, default_value_t = 0)]
    rank: u64,

    /// Create the default datasets and start writing immediately.
    #[arg(long)]
    write: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let kind = SensorKind::from(cli.sensor_type);
    let geometry = SensorGeometry::for_kind(kind);

    let buffer_size = geometry.frame_buffer_size();
    let num_buffers = cli.max_buffer_mem as usize / buffer_size;
    if num_buffers == 0 {
        warn!(
            max_buffer_mem = cli.max_buffer_mem,
            buffer_size, "buffer memory holds no whole frame, all frames will be dropped"
        );
    }
    let pool = FrameBufferPool::new(num_buffers, buffer_size);
    let assembler = FrameAssembler::new(
        geometry,
        Duration::from_millis(cli.frame_timeout_ms),
        pool,
    );

    let socket = UdpSocket::bind((cli.rx_address.as_str(), cli.rx_port))
        .await
        .with_context(|| format!("binding {}:{}", cli.rx_address, cli.rx_port))?;
    info!(
        node = cli.node,
        sensor = %kind,
        addr = %socket.local_addr()?,
        buffers = num_buffers,
        "ingest node listening"
    );

    let queue_depth = num_buffers.max(1);
    let (frame_tx, frame_rx) = mpsc::channel(queue_depth);
    let (release_tx, release_rx) = mpsc::channel(queue_depth);
    let (control_tx, control_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut writer = FrameWriter::new();
    writer
        .configure(&json!({
            "process": {"number": cli.processes, "rank": cli.rank},
            "file": {"path": cli.file_path, "name": cli.file_name},
            "frames": cli.frames,
        }))
        .map_err(|err| anyhow::anyhow!("startup configuration rejected: {err}"))?;
    if cli.write {
        let dims = [geometry.rows, geometry.cols];
        let chunks = [1, geometry.rows, geometry.subframe_width()];
        writer
            .configure(&json!({
                "dataset": {"cmd": "create", "name": "data", "datatype": 1, "dims": dims, "chunks": chunks},
            }))
            .and_then(|_| {
                writer.configure(&json!({
                    "dataset": {"cmd": "create", "name": "reset", "datatype": 1, "dims": dims, "chunks": chunks},
                    "master": "data",
                    "write": true,
                }))
            })
            .map_err(|err| anyhow::anyhow!("write bootstrap rejected: {err}"))?;
    }

    let writer_task = tokio::spawn(run_writer(
        writer,
        geometry,
        frame_rx,
        control_rx,
        release_tx,
    ));
    let ingest_task = tokio::spawn(run_ingest(
        socket,
        assembler,
        frame_tx,
        release_rx,
        shutdown_rx.clone(),
    ));
    let control_task = tokio::spawn(serve_control(control_tx, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown_tx.send(true).ok();

    let stats = ingest_task.await?;
    control_task.await?;
    let writer = writer_task.await?;
    info!(
        datagrams = stats.datagrams,
        completed = stats.frames_completed,
        timed_out = stats.frames_timed_out,
        frames_written = writer.frames_written(),
        "shutdown complete"
    );
    Ok(())
}

/// Feed newline-delimited JSON control messages from stdin to the writer and
/// print each reply. Stands in for the external control bus.
async fn serve_control(
    control_tx: mpsc::Sender<ControlRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => return,
        };
        if line.trim().is_empty() {
            continue;
        }
        let message: serde_json::Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                println!("{}", json!({"error": format!("bad control message: {err}")}));
                continue;
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if control_tx
            .send(ControlRequest {
                message,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return;
        }
        match reply_rx.await {
            Ok(Ok(status)) => println!("{status}"),
            Ok(Err(err)) => println!("{}", json!({"error": err.to_string()})),
            Err(_) => return,
        }
    }
}
