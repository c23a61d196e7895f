//! File writer integration tests; these exercise a real HDF5 library against
//! scratch files in a temporary directory.

use frx_writer::{FrameView, FrameWriter, SubframeLayout, WriterError};
use serde_json::json;
use tempfile::TempDir;

const ROWS: usize = 4;
const COLS: usize = 6;

/// One whole frame of u16 pixels, all set to `value`, as raw bytes.
fn plane(value: u16) -> Vec<u8> {
    (0..ROWS * COLS)
        .flat_map(|_| value.to_ne_bytes())
        .collect()
}

fn writer_with_dataset(dir: &TempDir, chunks: Option<Vec<u64>>) -> FrameWriter {
    let mut writer = FrameWriter::new();
    let mut dataset = json!({
        "cmd": "create",
        "name": "data",
        "datatype": 1,
        "dims": [ROWS, COLS],
    });
    if let Some(chunks) = &chunks {
        dataset["chunks"] = json!(chunks);
    }
    writer
        .configure(&json!({
            "file": {
                "path": dir.path().display().to_string(),
                "name": "frames.h5",
            },
            "dataset": dataset,
            "frames": 1000,
        }))
        .unwrap();
    writer
}

fn whole_frame<'a>(frame_number: u64, data: &'a [u8]) -> FrameView<'a> {
    FrameView {
        dataset: "data",
        frame_number,
        data,
        subframes: None,
    }
}

#[test]
fn sparse_frames_extend_the_dataset_with_zero_fill() {
    let dir = TempDir::new().unwrap();
    let mut writer = writer_with_dataset(&dir, None);
    writer.configure(&json!({"write": true})).unwrap();

    let first = plane(0x1111);
    let second = plane(0x2222);
    assert!(writer.process_frame(&whole_frame(100, &first)).unwrap());
    assert!(writer.process_frame(&whole_frame(200, &second)).unwrap());
    writer.configure(&json!({"write": false})).unwrap();

    let file = hdf5::File::open(dir.path().join("frames.h5")).unwrap();
    let dataset = file.dataset("data").unwrap();
    // Start offset latched at 100, so frame 200 lands in row 100.
    assert_eq!(dataset.shape(), vec![101, ROWS, COLS]);

    let values = dataset.read_raw::<u16>().unwrap();
    let frame_len = ROWS * COLS;
    assert!(values[..frame_len].iter().all(|&v| v == 0x1111));
    assert!(values[100 * frame_len..].iter().all(|&v| v == 0x2222));
    // Rows in the gap were never written and stay at the fill value.
    assert!(values[50 * frame_len..51 * frame_len].iter().all(|&v| v == 0));
}

#[test]
fn contiguous_frames_grow_extent_to_frame_span() {
    let dir = TempDir::new().unwrap();
    let mut writer = writer_with_dataset(&dir, None);
    writer.configure(&json!({"write": true})).unwrap();

    let data = plane(7);
    for frame in 5..15u64 {
        assert!(writer.process_frame(&whole_frame(frame, &data)).unwrap());
    }
    writer.configure(&json!({"write": false})).unwrap();

    let file = hdf5::File::open(dir.path().join("frames.h5")).unwrap();
    let dataset = file.dataset("data").unwrap();
    // Extent equals max_frame - start_frame + 1.
    assert_eq!(dataset.shape()[0], 10);
}

#[test]
fn subframe_strips_interleave_across_the_row() {
    let dir = TempDir::new().unwrap();
    let mut writer = writer_with_dataset(&dir, Some(vec![1, ROWS as u64, 3]));
    writer.configure(&json!({"write": true})).unwrap();

    // Two strips of 4x3 pixels: left strip 0xaaaa, right strip 0xbbbb.
    let strip_len = ROWS * 3 * 2;
    let mut data = Vec::with_capacity(2 * strip_len);
    data.extend((0..ROWS * 3).flat_map(|_| 0xaaaau16.to_ne_bytes()));
    data.extend((0..ROWS * 3).flat_map(|_| 0xbbbbu16.to_ne_bytes()));

    let layout = SubframeLayout {
        count: 2,
        size_bytes: strip_len,
        width: 3,
    };
    let view = whole_frame(1, &data);
    writer.write_subframes(&view, &layout).unwrap();
    assert_eq!(writer.sub_frames_written(), 2);
    writer.configure(&json!({"write": false})).unwrap();

    let file = hdf5::File::open(dir.path().join("frames.h5")).unwrap();
    let values = file.dataset("data").unwrap().read_raw::<u16>().unwrap();
    for row in 0..ROWS {
        let row = &values[row * COLS..(row + 1) * COLS];
        assert_eq!(row, &[0xaaaa, 0xaaaa, 0xaaaa, 0xbbbb, 0xbbbb, 0xbbbb]);
    }
}

#[test]
fn only_master_dataset_frames_count_towards_the_target() {
    let dir = TempDir::new().unwrap();
    let mut writer = writer_with_dataset(&dir, None);
    writer
        .configure(&json!({
            "dataset": {"cmd": "create", "name": "reset", "datatype": 1, "dims": [ROWS, COLS]},
            "master": "data",
            "frames": 2,
            "write": true,
        }))
        .unwrap();

    let data = plane(1);
    for frame in 1..=2u64 {
        writer.process_frame(&whole_frame(frame, &data)).unwrap();
        let reset = FrameView {
            dataset: "reset",
            frame_number: frame,
            data: &data,
            subframes: None,
        };
        // The reset plane of the final frame arrives after the target is
        // reached and is dropped like any post-stop frame.
        let _ = writer.process_frame(&reset).unwrap();
    }

    assert_eq!(writer.frames_written(), 2);
    // Reaching the target stopped the acquisition and closed the file.
    assert!(!writer.writing());
    let file = hdf5::File::open(dir.path().join("frames.h5")).unwrap();
    assert_eq!(file.dataset("data").unwrap().shape()[0], 2);
}

#[test]
fn without_a_master_every_dataset_counts() {
    let dir = TempDir::new().unwrap();
    let mut writer = writer_with_dataset(&dir, None);
    writer
        .configure(&json!({
            "dataset": {"cmd": "create", "name": "reset", "datatype": 1, "dims": [ROWS, COLS]},
            "frames": 2,
            "write": true,
        }))
        .unwrap();

    // A single logical frame hits the target: both planes count.
    let data = plane(1);
    writer.process_frame(&whole_frame(1, &data)).unwrap();
    let reset = FrameView {
        dataset: "reset",
        frame_number: 1,
        data: &data,
        subframes: None,
    };
    writer.process_frame(&reset).unwrap();
    assert_eq!(writer.frames_written(), 2);
    assert!(!writer.writing());
}

#[test]
fn rejected_frames_do_not_stop_the_acquisition() {
    let dir = TempDir::new().unwrap();
    let mut writer = writer_with_dataset(&dir, None);
    writer.configure(&json!({"write": true})).unwrap();

    let data = plane(3);
    writer.process_frame(&whole_frame(10, &data)).unwrap();

    // Unknown dataset and out-of-order frames are rejected but recoverable.
    let stray = FrameView {
        dataset: "nope",
        frame_number: 11,
        data: &data,
        subframes: None,
    };
    assert!(matches!(
        writer.process_frame(&stray),
        Err(WriterError::UnknownDataset(_))
    ));
    assert!(matches!(
        writer.process_frame(&whole_frame(5, &data)),
        Err(WriterError::FrameOutOfOrder { .. })
    ));

    assert!(writer.writing());
    writer.process_frame(&whole_frame(11, &data)).unwrap();
    assert_eq!(writer.frames_written(), 2);
}

#[test]
fn float_datasets_are_stored_as_raw_32bit_words() {
    let dir = TempDir::new().unwrap();
    let mut writer = FrameWriter::new();
    writer
        .configure(&json!({
            "file": {
                "path": dir.path().display().to_string(),
                "name": "float.h5",
            },
            "dataset": {"cmd": "create", "name": "data", "datatype": "float32", "dims": [2, 2]},
            "write": true,
        }))
        .unwrap();
    writer.configure(&json!({"write": false})).unwrap();

    let file = hdf5::File::open(dir.path().join("float.h5")).unwrap();
    let dtype = file.dataset("data").unwrap().dtype().unwrap();
    assert_eq!(dtype.size(), 4);
}
