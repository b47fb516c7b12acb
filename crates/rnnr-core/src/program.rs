//! Program description
//!
//! The exporter writes a JSON document that declares the buffer layout, the
//! kernel sources and the ordered launch statements of a network:
//!
//! ```json
//! {
//!   "backend": "GPU",
//!   "input_size": {"size": 4, "dtype": "float", "id": ""},
//!   "output_size": 4,
//!   "functions": {"add": "__kernel void add(...) { ... }"},
//!   "statements": [
//!     {"kernel": "add", "args": ["outputs", "input", "bias"], "global_size": [4], "local_size": [1]}
//!   ],
//!   "buffers": {"bias": {"size": 4, "dtype": "float", "id": "bias"}}
//! }
//! ```
//!
//! Loading checks syntax and the backend tag only. Statements may name
//! buffers or kernels that do not exist; those surface when the statement
//! runs, or up front through [`Program::check_references`].

use std::collections::BTreeMap;
use std::path::Path;

use rnnr_backends::WorkSize;
use serde::Deserialize;

use crate::error::{Error, Result};

/// The only backend tag this runtime executes
pub const SUPPORTED_BACKEND_TAG: &str = "GPU";

/// Buffer key reserved for the network input
pub const INPUT_BUFFER: &str = "input";

/// Buffer key reserved for the network output
pub const OUTPUT_BUFFER: &str = "outputs";

/// Layout of one device buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    pub key: String,
    /// Number of 32-bit elements
    pub element_count: u64,
    /// Exporter dtype label, informational
    pub dtype: Option<String>,
    /// Weight tensor copied in at setup; `None` marks a scratch buffer
    pub source_name: Option<String>,
}

impl BufferDescriptor {
    /// Scratch buffers are written by kernels, sourced ones only read
    pub fn writable(&self) -> bool {
        self.source_name.is_none()
    }

    /// Element count as a host length, `None` when it does not fit
    pub fn element_len(&self) -> Option<usize> {
        usize::try_from(self.element_count).ok()
    }

    /// Device allocation size, `None` when it overflows `usize`
    pub fn byte_size(&self) -> Option<usize> {
        self.element_len()?.checked_mul(std::mem::size_of::<f32>())
    }
}

/// One kernel launch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Statement {
    #[serde(rename = "kernel")]
    pub kernel_key: String,
    /// Buffer keys bound positionally to the kernel parameters
    #[serde(rename = "args")]
    pub arg_names: Vec<String>,
    /// Work-groups per dimension as exported
    pub global_size: Vec<u64>,
    #[serde(default)]
    pub local_size: Vec<u64>,
}

impl Statement {
    /// Global and local sizes padded to three dimensions
    ///
    /// `index` is the statement's position, used to attribute the error.
    pub fn work_sizes(&self, index: usize) -> Result<(WorkSize, WorkSize)> {
        let invalid = || Error::InvalidWorkDimensions {
            statement: index,
            dims: self.global_size.len().max(self.local_size.len()),
        };
        let global = WorkSize::from_dims(&self.global_size).ok_or_else(invalid)?;
        let local = WorkSize::from_dims(&self.local_size).ok_or_else(invalid)?;
        Ok((global, local))
    }
}

#[derive(Deserialize)]
struct RawBuffer {
    size: u64,
    #[serde(default)]
    dtype: Option<String>,
    #[serde(default)]
    id: String,
}

/// Older exporters write the input and output sizes as bare integers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSize {
    Count(u64),
    Buffer(RawBuffer),
}

#[derive(Deserialize)]
struct RawProgram {
    backend: String,
    input_size: RawSize,
    output_size: RawSize,
    #[serde(default)]
    functions: BTreeMap<String, String>,
    #[serde(default)]
    statements: Vec<Statement>,
    #[serde(default)]
    buffers: BTreeMap<String, RawBuffer>,
}

fn descriptor(key: &str, raw: RawBuffer) -> BufferDescriptor {
    BufferDescriptor {
        key: key.to_string(),
        element_count: raw.size,
        dtype: raw.dtype,
        source_name: (!raw.id.is_empty()).then_some(raw.id),
    }
}

fn io_descriptor(key: &str, raw: RawSize) -> BufferDescriptor {
    match raw {
        RawSize::Count(size) => BufferDescriptor {
            key: key.to_string(),
            element_count: size,
            dtype: None,
            source_name: None,
        },
        RawSize::Buffer(raw) => BufferDescriptor {
            // The reserved buffers are never initialised from weights.
            source_name: None,
            ..descriptor(key, raw)
        },
    }
}

fn check_size(descriptor: &BufferDescriptor) -> Result<()> {
    if descriptor.byte_size().is_some() {
        return Ok(());
    }
    Err(Error::MalformedJson(serde::de::Error::custom(format!(
        "buffer `{}` declares {} elements, which overflows the addressable size",
        descriptor.key, descriptor.element_count
    ))))
}

/// Immutable description of a network's buffers, kernels and launches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    backend_tag: String,
    input_descriptor: BufferDescriptor,
    output_descriptor: BufferDescriptor,
    buffers: BTreeMap<String, BufferDescriptor>,
    kernels: BTreeMap<String, String>,
    statements: Vec<Statement>,
}

impl Program {
    /// Parse a program description
    ///
    /// # Errors
    ///
    /// `MalformedJson` when the document does not have the expected shape,
    /// `UnsupportedBackend` when it targets anything but `"GPU"`.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let raw: RawProgram = serde_json::from_slice(json).map_err(Error::MalformedJson)?;
        if raw.backend != SUPPORTED_BACKEND_TAG {
            return Err(Error::UnsupportedBackend(raw.backend));
        }

        let buffers = raw
            .buffers
            .into_iter()
            .map(|(key, buffer)| {
                let descriptor = descriptor(&key, buffer);
                (key, descriptor)
            })
            .collect::<BTreeMap<_, _>>();

        let input = io_descriptor(INPUT_BUFFER, raw.input_size);
        let output = io_descriptor(OUTPUT_BUFFER, raw.output_size);
        for descriptor in buffers.values().chain([&input, &output]) {
            check_size(descriptor)?;
        }

        tracing::debug!(
            buffers = buffers.len(),
            kernels = raw.functions.len(),
            statements = raw.statements.len(),
            "program_parsed"
        );

        Ok(Self {
            backend_tag: raw.backend,
            input_descriptor: input,
            output_descriptor: output,
            buffers,
            kernels: raw.functions,
            statements: raw.statements,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read(path).map_err(|err| Error::io(path, err))?;
        Self::from_json(&json)
    }

    /// Resolve every statement's sizes, kernel and arguments without a backend
    ///
    /// Reports the first failing statement with the same error a run would
    /// raise when reaching it.
    pub fn check_references(&self) -> Result<()> {
        for (index, statement) in self.statements.iter().enumerate() {
            statement.work_sizes(index)?;
            if !self.kernels.contains_key(&statement.kernel_key) {
                return Err(Error::UnresolvedKernelReference {
                    statement: index,
                    kernel: statement.kernel_key.clone(),
                });
            }
            if let Some(key) = statement.arg_names.iter().find(|key| !self.declares_buffer(key)) {
                return Err(Error::UnresolvedBufferReference {
                    statement: index,
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether `key` names a declared or reserved buffer
    pub fn declares_buffer(&self, key: &str) -> bool {
        key == INPUT_BUFFER || key == OUTPUT_BUFFER || self.buffers.contains_key(key)
    }

    pub fn backend_tag(&self) -> &str {
        &self.backend_tag
    }

    pub fn input(&self) -> &BufferDescriptor {
        &self.input_descriptor
    }

    pub fn output(&self) -> &BufferDescriptor {
        &self.output_descriptor
    }

    pub fn buffers(&self) -> &BTreeMap<String, BufferDescriptor> {
        &self.buffers
    }

    /// Kernel sources by key
    pub fn kernels(&self) -> &BTreeMap<String, String> {
        &self.kernels
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }
}
