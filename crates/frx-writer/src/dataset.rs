//! Dataset definitions and the named registry.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::WriterError;

/// Pixel interpretation of a dataset.
///
/// The integer codes match the control-plane wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelKind {
    Raw8Bit,
    Raw16Bit,
    Float32,
}

impl PixelKind {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(PixelKind::Raw8Bit),
            1 => Some(PixelKind::Raw16Bit),
            2 => Some(PixelKind::Float32),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uint8" => Some(PixelKind::Raw8Bit),
            "uint16" => Some(PixelKind::Raw16Bit),
            "float32" => Some(PixelKind::Float32),
            _ => None,
        }
    }

    pub fn type_code(self) -> u8 {
        match self {
            PixelKind::Raw8Bit => 0,
            PixelKind::Raw16Bit => 1,
            PixelKind::Float32 => 2,
        }
    }

    pub fn byte_width(self) -> usize {
        match self {
            PixelKind::Raw8Bit => 1,
            PixelKind::Raw16Bit => 2,
            PixelKind::Float32 => 4,
        }
    }
}

/// A named dataset as described by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDefinition {
    pub name: String,
    pub pixel: PixelKind,
    /// Per-frame image shape; rank is at least 2.
    pub frame_dimensions: Vec<u64>,
    /// Optional chunk grid over the full dataset rank (frame index included).
    pub chunks: Option<Vec<u64>>,
}

impl DatasetDefinition {
    /// Full dataset shape: frame index (initially 1) plus the frame shape.
    pub fn dataset_dims(&self) -> Vec<u64> {
        let mut dims = Vec::with_capacity(self.frame_dimensions.len() + 1);
        dims.push(1);
        dims.extend_from_slice(&self.frame_dimensions);
        dims
    }

    /// Chunk grid; one whole frame unless the caller supplied a grid of the
    /// matching rank.
    pub fn chunk_dims(&self) -> Vec<u64> {
        let dims = self.dataset_dims();
        match &self.chunks {
            Some(chunks) if chunks.len() == dims.len() => chunks.clone(),
            _ => dims,
        }
    }
}

/// Dataset definitions by name.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    defs: BTreeMap<String, DatasetDefinition>,
}

impl DatasetRegistry {
    /// Register a definition, replacing any previous one of the same name.
    pub fn create(&mut self, def: DatasetDefinition) {
        if self.defs.insert(def.name.clone(), def).is_some() {
            debug!("replaced existing dataset definition");
        }
    }

    pub fn get(&self, name: &str) -> Result<&DatasetDefinition, WriterError> {
        self.defs
            .get(name)
            .ok_or_else(|| WriterError::UnknownDataset(name.to_string()))
    }

    pub fn values(&self) -> impl Iterator<Item = &DatasetDefinition> {
        self.defs.values()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
