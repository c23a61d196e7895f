//! The chunked file writer.
//!
//! Frames are persisted as direct chunk writes: the payload is already one
//! chunk-shaped blob (whole frame or one subframe strip), so it bypasses the
//! filter pipeline and lands straight at its `[row, 0, 0, ...]` coordinate.
//! The dataset grows along its unlimited outer dimension as frames arrive in
//! any order; gaps stay as fill-value rows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use hdf5::plist::file_access::{FileCloseDegree, LibraryVersion};
use hdf5::{Extent, SimpleExtents};
use tracing::{debug, info, trace};

use crate::dataset::{DatasetDefinition, DatasetRegistry, PixelKind};
use crate::error::WriterError;
use crate::offset::FrameOffsetMapper;

/// Objects of 64 KiB and above are aligned to 4 MiB boundaries.
const CHUNK_ALIGN_THRESHOLD: u64 = 65536;
const CHUNK_ALIGN: u64 = 4 * 1024 * 1024;

/// How a frame splits into horizontal subframe strips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubframeLayout {
    pub count: usize,
    /// Bytes per strip.
    pub size_bytes: usize,
    /// Strip width in pixels; the column coordinate steps by this.
    pub width: u64,
}

/// One plane of a completed frame, addressed to a named dataset.
#[derive(Debug)]
pub struct FrameView<'a> {
    pub dataset: &'a str,
    pub frame_number: u64,
    pub data: &'a [u8],
    pub subframes: Option<SubframeLayout>,
}

struct OpenDataset {
    dataset: hdf5::Dataset,
    dims: Vec<u64>,
}

struct OpenFile {
    file: hdf5::File,
    datasets: HashMap<String, OpenDataset>,
}

pub struct FrameWriter {
    pub(crate) writing: bool,
    pub(crate) frames_to_write: u64,
    pub(crate) frames_written: u64,
    pub(crate) sub_frames_written: u64,
    pub(crate) file_path: PathBuf,
    pub(crate) file_name: String,
    pub(crate) processes: u64,
    pub(crate) rank: u64,
    pub(crate) master_dataset: Option<String>,
    pub(crate) registry: DatasetRegistry,
    pub(crate) mapper: FrameOffsetMapper,
    pub(crate) last_error: Option<String>,
    file: Option<OpenFile>,
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameWriter {
    pub fn new() -> Self {
        Self {
            writing: false,
            frames_to_write: 3,
            frames_written: 0,
            sub_frames_written: 0,
            file_path: PathBuf::from("./"),
            file_name: "test_file.h5".to_string(),
            processes: 1,
            rank: 0,
            master_dataset: None,
            registry: DatasetRegistry::default(),
            mapper: FrameOffsetMapper::new(1, 0),
            last_error: None,
            file: None,
        }
    }

    /// Create (truncating) the output file: strong close semantics, latest
    /// format bounds, 4 MiB chunk boundary alignment.
    pub fn create_file(&mut self, path: &Path) -> Result<(), WriterError> {
        info!(path = %path.display(), "creating file");
        let file = hdf5::FileBuilder::new()
            .with_fapl(|fapl| {
                fapl.fclose_degree(FileCloseDegree::Strong)
                    .alignment(CHUNK_ALIGN_THRESHOLD, CHUNK_ALIGN)
                    .libver_bounds(LibraryVersion::V110, LibraryVersion::V110)
            })
            .create(path)?;
        self.file = Some(OpenFile {
            file,
            datasets: HashMap::new(),
        });
        Ok(())
    }

    /// Create a dataset in the open file: unlimited outer (frame) dimension
    /// starting at one row, byte-zero fill, chunked per the definition.
    pub fn create_dataset(&mut self, def: &DatasetDefinition) -> Result<(), WriterError> {
        let open = self.file.as_mut().ok_or(WriterError::FileNotOpen)?;
        let dims = def.dataset_dims();
        let chunks = def.chunk_dims();
        debug!(name = %def.name, ?dims, ?chunks, "creating dataset");

        let mut extents = Vec::with_capacity(dims.len());
        extents.push(Extent::resizable(1));
        extents.extend(dims[1..].iter().map(|&d| Extent::from(d as usize)));
        let shape = SimpleExtents::from_vec(extents);
        let chunk: Vec<usize> = chunks.iter().map(|&c| c as usize).collect();

        let dataset = match def.pixel {
            PixelKind::Raw8Bit => create_typed::<u8>(&open.file, &def.name, shape, chunk)?,
            PixelKind::Raw16Bit => create_typed::<u16>(&open.file, &def.name, shape, chunk)?,
            // Float payloads are stored as their raw 32-bit words.
            PixelKind::Float32 => create_typed::<u32>(&open.file, &def.name, shape, chunk)?,
        };
        open.datasets.insert(
            def.name.clone(),
            OpenDataset { dataset, dims },
        );
        Ok(())
    }

    /// Write one whole frame as a single direct chunk at `[row, 0, 0, ...]`.
    pub fn write_frame(&mut self, frame: &FrameView<'_>) -> Result<u64, WriterError> {
        let row = self.mapper.map(frame.frame_number)?;
        let open = self.file.as_mut().ok_or(WriterError::FileNotOpen)?;
        let dset = open
            .datasets
            .get_mut(frame.dataset)
            .ok_or_else(|| WriterError::UnknownDataset(frame.dataset.to_string()))?;
        extend_dataset(dset, row + 1)?;
        debug!(frame = frame.frame_number, row, dataset = frame.dataset, "writing frame");

        let mut offset = vec![0u64; dset.dims.len()];
        offset[0] = row;
        direct_chunk_write(&dset.dataset, frame.dataset, &offset, frame.data)
    }

    /// Write a frame as one direct chunk per horizontal subframe strip,
    /// stepping the column coordinate by the strip width.
    pub fn write_subframes(
        &mut self,
        frame: &FrameView<'_>,
        layout: &SubframeLayout,
    ) -> Result<u64, WriterError> {
        let row = self.mapper.map(frame.frame_number)?;
        let open = self.file.as_mut().ok_or(WriterError::FileNotOpen)?;
        let dset = open
            .datasets
            .get_mut(frame.dataset)
            .ok_or_else(|| WriterError::UnknownDataset(frame.dataset.to_string()))?;
        extend_dataset(dset, row + 1)?;
        debug!(
            frame = frame.frame_number,
            row,
            dataset = frame.dataset,
            subframes = layout.count,
            "writing subframes"
        );

        let mut offset = vec![0u64; dset.dims.len()];
        offset[0] = row;
        for index in 0..layout.count {
            offset[2] = index as u64 * layout.width;
            let start = index * layout.size_bytes;
            let chunk = frame
                .data
                .get(start..start + layout.size_bytes)
                .ok_or_else(|| WriterError::TruncatedFrame {
                    dataset: frame.dataset.to_string(),
                    expected: (index + 1) * layout.size_bytes,
                    actual: frame.data.len(),
                })?;
            direct_chunk_write(&dset.dataset, frame.dataset, &offset, chunk)?;
            self.sub_frames_written += 1;
        }
        Ok(row)
    }

    /// Route one frame plane to its dataset; no-op while idle. Returns
    /// whether the frame was written.
    pub fn process_frame(&mut self, frame: &FrameView<'_>) -> Result<bool, WriterError> {
        if !self.writing {
            return Ok(false);
        }
        match &frame.subframes {
            Some(layout) => {
                let layout = *layout;
                self.write_subframes(frame, &layout)?;
            }
            None => {
                self.write_frame(frame)?;
            }
        }

        // Only the master dataset (or every dataset, when no master is set)
        // counts towards the acquisition total.
        if self
            .master_dataset
            .as_deref()
            .map_or(true, |master| master == frame.dataset)
        {
            self.frames_written += 1;
            if self.frames_written == self.frames_to_write {
                info!(frames = self.frames_written, "acquisition complete");
                self.stop_writing();
            }
        }
        Ok(true)
    }

    /// Open the file, materialise every registered dataset and start
    /// accepting frames. A failure leaves the writer idle with no file open.
    pub fn start_writing(&mut self) -> Result<(), WriterError> {
        if self.writing {
            return Ok(());
        }
        let path = self.file_path.join(&self.file_name);
        self.create_file(&path)?;
        let defs: Vec<DatasetDefinition> = self.registry.values().cloned().collect();
        for def in &defs {
            if let Err(err) = self.create_dataset(def) {
                self.close_file();
                return Err(err);
            }
        }
        self.mapper = FrameOffsetMapper::new(self.processes, self.rank);
        self.frames_written = 0;
        self.sub_frames_written = 0;
        self.last_error = None;
        self.writing = true;
        info!(
            path = %path.display(),
            datasets = defs.len(),
            frames = self.frames_to_write,
            "writing started"
        );
        Ok(())
    }

    pub fn stop_writing(&mut self) {
        if self.writing {
            self.writing = false;
            info!(frames_written = self.frames_written, "writing stopped");
        }
        self.close_file();
    }

    pub fn close_file(&mut self) {
        if self.file.take().is_some() {
            trace!("closing file");
        }
    }

    pub fn writing(&self) -> bool {
        self.writing
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn sub_frames_written(&self) -> u64 {
        self.sub_frames_written
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub(crate) fn record_error(&mut self, err: &WriterError) {
        self.last_error = Some(err.to_string());
    }
}

fn create_typed<T: hdf5::H5Type + Default>(
    file: &hdf5::File,
    name: &str,
    shape: SimpleExtents,
    chunk: Vec<usize>,
) -> Result<hdf5::Dataset, WriterError> {
    Ok(file
        .new_dataset::<T>()
        .shape(shape)
        .chunk(chunk)
        .fill_value(T::default())
        .create(name)?)
}

fn extend_dataset(dset: &mut OpenDataset, rows: u64) -> Result<(), WriterError> {
    if rows > dset.dims[0] {
        trace!(rows, "extending dataset");
        dset.dims[0] = rows;
        let shape: Vec<usize> = dset.dims.iter().map(|&d| d as usize).collect();
        dset.dataset.resize(shape)?;
    }
    Ok(())
}

/// Place a pre-formed chunk directly at `offset`, bypassing the filter
/// pipeline (filter mask 0).
fn direct_chunk_write(
    dataset: &hdf5::Dataset,
    name: &str,
    offset: &[u64],
    data: &[u8],
) -> Result<u64, WriterError> {
    let coords: Vec<hdf5_sys::h5::hsize_t> = offset.iter().map(|&o| o as _).collect();
    let status = unsafe {
        hdf5_sys::h5d::H5Dwrite_chunk(
            dataset.id(),
            hdf5_sys::h5p::H5P_DEFAULT,
            0,
            coords.as_ptr(),
            data.len(),
            data.as_ptr().cast(),
        )
    };
    if status < 0 {
        return Err(WriterError::ChunkWrite {
            dataset: name.to_string(),
            row: offset[0],
        });
    }
    Ok(offset[0])
}
