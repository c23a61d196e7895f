//! Control plane adapter: applies JSON-shaped configuration deltas to the
//! writer and exports its status mirror. The transport carrying the messages
//! lives outside this crate; anything that can hand over a
//! `serde_json::Value` can drive it.

use serde_json::{json, Value};
use tracing::debug;

use crate::dataset::{DatasetDefinition, PixelKind};
use crate::error::ControlError;
use crate::writer::FrameWriter;

impl FrameWriter {
    /// Apply a configuration message. Recognised top-level options are
    /// applied in order: `process`, `file`, `dataset`, `master`, `frames`,
    /// `write`. Returns the refreshed status mirror.
    pub fn configure(&mut self, config: &Value) -> Result<Value, ControlError> {
        debug!(%config, "applying configuration");
        if let Some(process) = config.get("process") {
            self.configure_process(process)?;
        }
        if let Some(file) = config.get("file") {
            self.configure_file(file)?;
        }
        if let Some(dataset) = config.get("dataset") {
            self.configure_dataset(dataset)?;
        }
        if let Some(master) = config.get("master") {
            if self.writing {
                return Err(ControlError::WriteInProgress("master dataset"));
            }
            let name = master.as_str().ok_or(ControlError::BadValue {
                field: "master",
                reason: "expected string".to_string(),
            })?;
            self.master_dataset = (!name.is_empty()).then(|| name.to_string());
        }
        if let Some(frames) = config.get("frames") {
            self.frames_to_write = frames.as_u64().ok_or(ControlError::BadValue {
                field: "frames",
                reason: "expected unsigned integer".to_string(),
            })?;
        }
        if let Some(write) = config.get("write") {
            let write = write.as_bool().ok_or(ControlError::BadValue {
                field: "write",
                reason: "expected boolean".to_string(),
            })?;
            if write {
                self.start_writing()?;
            } else {
                self.stop_writing();
            }
        }
        Ok(self.status())
    }

    fn configure_process(&mut self, config: &Value) -> Result<(), ControlError> {
        if self.writing {
            return Err(ControlError::WriteInProgress("process topology"));
        }
        if let Some(number) = config.get("number") {
            let number = number
                .as_u64()
                .filter(|&n| n > 0)
                .ok_or(ControlError::BadValue {
                    field: "process.number",
                    reason: "expected positive integer".to_string(),
                })?;
            self.processes = number;
            debug!(processes = number, "concurrent process count changed");
        }
        if let Some(rank) = config.get("rank") {
            let rank = rank.as_u64().ok_or(ControlError::BadValue {
                field: "process.rank",
                reason: "expected unsigned integer".to_string(),
            })?;
            self.rank = rank;
            debug!(rank, "process rank changed");
        }
        Ok(())
    }

    fn configure_file(&mut self, config: &Value) -> Result<(), ControlError> {
        if self.writing {
            return Err(ControlError::WriteInProgress("file target"));
        }
        if let Some(path) = config.get("path") {
            let path = path.as_str().ok_or(ControlError::BadValue {
                field: "file.path",
                reason: "expected string".to_string(),
            })?;
            self.file_path = path.into();
            debug!(path, "file path changed");
        }
        if let Some(name) = config.get("name") {
            let name = name.as_str().ok_or(ControlError::BadValue {
                field: "file.name",
                reason: "expected string".to_string(),
            })?;
            self.file_name = name.to_string();
            debug!(name, "file name changed");
        }
        Ok(())
    }

    fn configure_dataset(&mut self, config: &Value) -> Result<(), ControlError> {
        if self.writing {
            return Err(ControlError::WriteInProgress("datasets"));
        }
        let cmd = config
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or(ControlError::MissingField("cmd"))?;
        if cmd != "create" {
            return Err(ControlError::BadValue {
                field: "dataset.cmd",
                reason: format!("unknown command '{cmd}'"),
            });
        }

        let name = config
            .get("name")
            .and_then(Value::as_str)
            .ok_or(ControlError::MissingField("name"))?;
        let pixel = parse_pixel(
            config
                .get("datatype")
                .ok_or(ControlError::MissingField("datatype"))?,
        )?;
        let dims = parse_dims(
            config.get("dims").ok_or(ControlError::MissingField("dims"))?,
            "dataset.dims",
        )?;
        if dims.len() < 2 {
            return Err(ControlError::BadValue {
                field: "dataset.dims",
                reason: "frame rank must be at least 2".to_string(),
            });
        }
        let chunks = config
            .get("chunks")
            .map(|value| parse_dims(value, "dataset.chunks"))
            .transpose()?;

        debug!(name, "registering dataset");
        self.registry.create(DatasetDefinition {
            name: name.to_string(),
            pixel,
            frame_dimensions: dims,
            chunks,
        });
        Ok(())
    }

    /// Status mirror of the configuration plus write progress and the
    /// per-dataset shapes.
    pub fn status(&self) -> Value {
        let mut datasets = serde_json::Map::new();
        for def in self.registry.values() {
            datasets.insert(
                def.name.clone(),
                json!({
                    "type": def.pixel.type_code(),
                    "dimensions": def.frame_dimensions,
                    "chunks": def.chunk_dims(),
                }),
            );
        }
        json!({
            "writing": self.writing,
            "frames_max": self.frames_to_write,
            "frames_written": self.frames_written,
            "file_path": self.file_path.display().to_string(),
            "file_name": self.file_name,
            "processes": self.processes,
            "rank": self.rank,
            "master": self.master_dataset.clone().unwrap_or_default(),
            "last_error": self.last_error,
            "datasets": datasets,
        })
    }
}

fn parse_pixel(value: &Value) -> Result<PixelKind, ControlError> {
    let kind = match value {
        Value::Number(n) => n.as_u64().and_then(PixelKind::from_code),
        Value::String(s) => PixelKind::from_name(s),
        _ => None,
    };
    kind.ok_or(ControlError::BadValue {
        field: "dataset.datatype",
        reason: format!("unrecognised datatype {value}"),
    })
}

fn parse_dims(value: &Value, field: &'static str) -> Result<Vec<u64>, ControlError> {
    let items = value.as_array().ok_or(ControlError::BadValue {
        field,
        reason: "expected array of dimensions".to_string(),
    })?;
    items
        .iter()
        .map(|item| {
            item.as_u64().filter(|&d| d > 0).ok_or(ControlError::BadValue {
                field,
                reason: format!("bad dimension {item}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_registers_a_dataset() {
        let mut writer = FrameWriter::new();
        let status = writer
            .configure(&json!({
                "dataset": {
                    "cmd": "create",
                    "name": "data",
                    "datatype": 1,
                    "dims": [1484, 1408],
                    "chunks": [1, 1484, 704],
                }
            }))
            .unwrap();

        let def = writer.registry().get("data").unwrap();
        assert_eq!(def.pixel, PixelKind::Raw16Bit);
        assert_eq!(def.frame_dimensions, vec![1484, 1408]);
        assert_eq!(def.chunk_dims(), vec![1, 1484, 704]);
        assert_eq!(status["datasets"]["data"]["type"], 1);
    }

    #[test]
    fn datatype_accepts_names() {
        let mut writer = FrameWriter::new();
        writer
            .configure(&json!({
                "dataset": {"cmd": "create", "name": "x", "datatype": "float32", "dims": [2, 2]}
            }))
            .unwrap();
        assert_eq!(writer.registry().get("x").unwrap().pixel, PixelKind::Float32);
    }

    #[test]
    fn create_without_required_fields_is_rejected() {
        let mut writer = FrameWriter::new();
        for (config, missing) in [
            (json!({"dataset": {"cmd": "create"}}), "name"),
            (json!({"dataset": {"cmd": "create", "name": "d"}}), "datatype"),
            (
                json!({"dataset": {"cmd": "create", "name": "d", "datatype": 1}}),
                "dims",
            ),
        ] {
            match writer.configure(&config) {
                Err(ControlError::MissingField(field)) => assert_eq!(field, missing),
                other => panic!("expected MissingField({missing}), got {other:?}"),
            }
        }
    }

    #[test]
    fn structural_options_are_locked_while_writing() {
        let mut writer = FrameWriter::new();
        writer.writing = true;

        for config in [
            json!({"process": {"number": 2}}),
            json!({"file": {"path": "/tmp"}}),
            json!({"dataset": {"cmd": "create", "name": "d", "datatype": 1, "dims": [2, 2]}}),
            json!({"master": "data"}),
        ] {
            assert!(
                matches!(
                    writer.configure(&config),
                    Err(ControlError::WriteInProgress(_))
                ),
                "{config} should be rejected while writing"
            );
        }

        // Frame budget updates stay allowed.
        writer.configure(&json!({"frames": 10})).unwrap();
        assert_eq!(writer.frames_to_write, 10);
    }

    #[test]
    fn process_and_file_options_apply() {
        let mut writer = FrameWriter::new();
        let status = writer
            .configure(&json!({
                "process": {"number": 4, "rank": 2},
                "file": {"path": "/data", "name": "run42.h5"},
                "frames": 100,
                "master": "data",
            }))
            .unwrap();
        assert_eq!(writer.processes, 4);
        assert_eq!(writer.rank, 2);
        assert_eq!(status["file_path"], "/data");
        assert_eq!(status["file_name"], "run42.h5");
        assert_eq!(status["frames_max"], 100);
        assert_eq!(status["master"], "data");
        assert_eq!(status["writing"], false);
    }

    #[test]
    fn zero_process_count_is_rejected() {
        let mut writer = FrameWriter::new();
        assert!(matches!(
            writer.configure(&json!({"process": {"number": 0}})),
            Err(ControlError::BadValue { field: "process.number", .. })
        ));
    }
}
