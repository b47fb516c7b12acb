//! Weight store
//!
//! Parses the safetensors container exported next to a program description:
//!
//! ```text
//! ┌──────────────┬──────────────────────┬───────────────────────┐
//! │ 8 bytes      │ N bytes              │ raw tensor bytes      │
//! │ header size  │ JSON header (UTF-8)  │ (little endian)       │
//! │ (u64 LE)     │                      │                       │
//! └──────────────┴──────────────────────┴───────────────────────┘
//! ```
//!
//! The header maps each tensor name to `{dtype, shape, data_offsets}`, with
//! offsets relative to the start of the raw section. An optional
//! `__metadata__` entry holds string pairs and is not a tensor.
//!
//! ```rust
//! use rnnr_core::weights::{WeightStore, WeightWriter};
//!
//! # fn main() -> rnnr_core::Result<()> {
//! let bytes = WeightWriter::new().add_f32("bias", &[3], &[0.5, 1.0, 1.5]).to_bytes()?;
//! let store = WeightStore::from_bytes(bytes)?;
//! assert_eq!(&*store.get("bias")?, &[0.5, 1.0, 1.5]);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const LENGTH_PREFIX_BYTES: usize = 8;
/// Headers above this size are rejected before parsing.
const MAX_HEADER_BYTES: u64 = 100 * 1024 * 1024;
const METADATA_KEY: &str = "__metadata__";

/// Element type tag of a stored tensor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    Other(String),
}

impl DType {
    fn parse(tag: &str) -> Self {
        match tag {
            "F16" => DType::F16,
            "BF16" => DType::BF16,
            "F32" => DType::F32,
            "F64" => DType::F64,
            "I8" => DType::I8,
            "I16" => DType::I16,
            "I32" => DType::I32,
            "I64" => DType::I64,
            "U8" => DType::U8,
            "U16" => DType::U16,
            "U32" => DType::U32,
            "U64" => DType::U64,
            "BOOL" => DType::Bool,
            other => DType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            DType::F16 => "F16",
            DType::BF16 => "BF16",
            DType::F32 => "F32",
            DType::F64 => "F64",
            DType::I8 => "I8",
            DType::I16 => "I16",
            DType::I32 => "I32",
            DType::I64 => "I64",
            DType::U8 => "U8",
            DType::U16 => "U16",
            DType::U32 => "U32",
            DType::U64 => "U64",
            DType::Bool => "BOOL",
            DType::Other(tag) => tag,
        }
    }

    /// Width of one element, unknown for unrecognised tags
    pub fn size_bytes(&self) -> Option<usize> {
        match self {
            DType::I8 | DType::U8 | DType::Bool => Some(1),
            DType::F16 | DType::BF16 | DType::I16 | DType::U16 => Some(2),
            DType::F32 | DType::I32 | DType::U32 => Some(4),
            DType::F64 | DType::I64 | DType::U64 => Some(8),
            DType::Other(_) => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the container header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorRecord {
    pub name: String,
    pub dtype: DType,
    /// Informational; the byte range alone decides what `get` decodes.
    pub shape: Vec<u64>,
    /// Half-open range relative to the start of the raw section
    pub byte_range: Range<usize>,
}

impl TensorRecord {
    pub fn byte_len(&self) -> usize {
        self.byte_range.end - self.byte_range.start
    }

    /// Number of elements implied by the byte range
    pub fn element_count(&self) -> Option<usize> {
        self.dtype.size_bytes().map(|size| self.byte_len() / size)
    }
}

#[derive(Deserialize)]
struct HeaderEntry {
    dtype: String,
    shape: Vec<u64>,
    data_offsets: [u64; 2],
}

/// Parsed weight container with lazily decoded f32 views
pub struct WeightStore {
    bytes: Vec<u8>,
    data_start: usize,
    records: BTreeMap<String, TensorRecord>,
    metadata: BTreeMap<String, String>,
    decoded: RwLock<HashMap<String, Arc<[f32]>>>,
}

impl WeightStore {
    /// Parse a container held in memory
    ///
    /// # Errors
    ///
    /// - `CorruptHeader` when the length prefix or JSON header is unusable,
    ///   when an entry's offsets are reversed, or when a range is not a
    ///   whole number of elements
    /// - `TruncatedData` when a range ends past the raw section
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let prefix: [u8; LENGTH_PREFIX_BYTES] = bytes
            .get(..LENGTH_PREFIX_BYTES)
            .and_then(|prefix| prefix.try_into().ok())
            .ok_or_else(|| Error::CorruptHeader(format!("container is only {} bytes", bytes.len())))?;
        let header_len = u64::from_le_bytes(prefix);
        if header_len > MAX_HEADER_BYTES {
            return Err(Error::CorruptHeader(format!(
                "header length {header_len} exceeds limit {MAX_HEADER_BYTES}"
            )));
        }

        let data_start = LENGTH_PREFIX_BYTES + header_len as usize;
        let header = bytes.get(LENGTH_PREFIX_BYTES..data_start).ok_or_else(|| {
            Error::CorruptHeader(format!(
                "header length {header_len} overruns container of {} bytes",
                bytes.len()
            ))
        })?;

        let entries: BTreeMap<String, serde_json::Value> =
            serde_json::from_slice(header).map_err(|err| Error::CorruptHeader(err.to_string()))?;

        let available = (bytes.len() - data_start) as u64;
        let mut records = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for (name, value) in entries {
            if name == METADATA_KEY {
                metadata = serde_json::from_value(value)
                    .map_err(|err| Error::CorruptHeader(format!("{METADATA_KEY}: {err}")))?;
                continue;
            }
            let record = parse_record(name, value, available)?;
            records.insert(record.name.clone(), record);
        }

        tracing::debug!(
            tensors = records.len(),
            header_bytes = header_len,
            data_bytes = available,
            "weights_parsed"
        );

        Ok(Self {
            bytes,
            data_start,
            records,
            metadata,
            decoded: RwLock::new(HashMap::new()),
        })
    }

    /// Read and parse a container file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;
        Self::from_bytes(bytes)
    }

    /// Decode tensor `name` as little-endian f32 values
    ///
    /// Decodes are cached, so repeated calls return the same allocation.
    ///
    /// # Errors
    ///
    /// `UnknownTensor` when absent, `UnsupportedDtype` when not stored as F32.
    pub fn get(&self, name: &str) -> Result<Arc<[f32]>> {
        if let Some(values) = self.decoded.read().get(name) {
            return Ok(Arc::clone(values));
        }

        let record = self.record(name)?;
        if record.dtype != DType::F32 {
            return Err(Error::UnsupportedDtype {
                tensor: name.to_string(),
                dtype: record.dtype.to_string(),
            });
        }

        let values: Arc<[f32]> = self
            .raw(record)
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let mut decoded = self.decoded.write();
        Ok(Arc::clone(decoded.entry(name.to_string()).or_insert(values)))
    }

    pub fn record(&self, name: &str) -> Result<&TensorRecord> {
        self.records
            .get(name)
            .ok_or_else(|| Error::UnknownTensor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Tensor names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn records(&self) -> impl Iterator<Item = &TensorRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `__metadata__` pairs, empty when the header has none
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Size of the raw tensor section in bytes
    pub fn raw_len(&self) -> usize {
        self.bytes.len() - self.data_start
    }

    fn raw(&self, record: &TensorRecord) -> &[u8] {
        let start = self.data_start + record.byte_range.start;
        let end = self.data_start + record.byte_range.end;
        &self.bytes[start..end]
    }
}

impl fmt::Debug for WeightStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightStore")
            .field("tensors", &self.records.len())
            .field("raw_len", &self.raw_len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

fn parse_record(name: String, value: serde_json::Value, available: u64) -> Result<TensorRecord> {
    let entry: HeaderEntry =
        serde_json::from_value(value).map_err(|err| Error::CorruptHeader(format!("tensor `{name}`: {err}")))?;
    let [start, end] = entry.data_offsets;
    if start > end {
        return Err(Error::CorruptHeader(format!(
            "tensor `{name}`: data_offsets [{start}, {end}] are reversed"
        )));
    }
    if end > available {
        return Err(Error::TruncatedData {
            tensor: name,
            end,
            available,
        });
    }

    let dtype = DType::parse(&entry.dtype);
    if let Some(size) = dtype.size_bytes() {
        if (end - start) % size as u64 != 0 {
            return Err(Error::CorruptHeader(format!(
                "tensor `{name}`: {} bytes is not a multiple of the {dtype} element size",
                end - start
            )));
        }
    }

    Ok(TensorRecord {
        name,
        dtype,
        shape: entry.shape,
        byte_range: start as usize..end as usize,
    })
}

#[derive(Serialize)]
struct WrittenEntry<'a> {
    dtype: &'a str,
    shape: &'a [u64],
    data_offsets: [u64; 2],
}

/// Builder that encodes f32 tensors into the container layout
///
/// Tensors are laid out contiguously in name order. The header is padded
/// with spaces so the raw section starts on an 8-byte boundary.
#[derive(Debug, Default, Clone)]
pub struct WeightWriter {
    tensors: BTreeMap<String, (Vec<u64>, Vec<f32>)>,
    metadata: BTreeMap<String, String>,
}

impl WeightWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace tensor `name`
    pub fn add_f32(mut self, name: impl Into<String>, shape: &[u64], values: &[f32]) -> Self {
        self.tensors.insert(name.into(), (shape.to_vec(), values.to_vec()));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header.insert(
                METADATA_KEY.to_string(),
                serde_json::to_value(&self.metadata).map_err(|err| Error::CorruptHeader(err.to_string()))?,
            );
        }

        let mut offset = 0u64;
        for (name, (shape, values)) in &self.tensors {
            let len = (values.len() * 4) as u64;
            let entry = WrittenEntry {
                dtype: DType::F32.as_str(),
                shape,
                data_offsets: [offset, offset + len],
            };
            header.insert(
                name.clone(),
                serde_json::to_value(&entry).map_err(|err| Error::CorruptHeader(err.to_string()))?,
            );
            offset += len;
        }

        let mut json = serde_json::to_vec(&header).map_err(|err| Error::CorruptHeader(err.to_string()))?;
        while json.len() % 8 != 0 {
            json.push(b' ');
        }

        let mut bytes = Vec::with_capacity(LENGTH_PREFIX_BYTES + json.len() + offset as usize);
        bytes.extend_from_slice(&(json.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&json);
        for (_, values) in self.tensors.values() {
            bytes.extend(values.iter().flat_map(|value| value.to_le_bytes()));
        }
        Ok(bytes)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes()?).map_err(|err| Error::io(path, err))
    }
}
