//! Kernel-dispatch inference runtime
//!
//! An exporter turns a network into two artifacts: a JSON program that lists
//! buffers, kernel sources and launch statements, and a safetensors weight
//! container. This crate loads both and replays the program on a backend.
//!
//! - [`weights`]: safetensors parsing with cached f32 decoding
//! - [`program`]: program description parsing and reference checks
//! - [`model`]: the [`Model`] engine that provisions and runs a program
//! - [`config`]: artifact paths and backend selection
//!
//! # Usage
//!
//! ```rust
//! use rnnr_backends::HostBackend;
//! use rnnr_core::{Model, Program, WeightStore, WeightWriter};
//!
//! # fn main() -> rnnr_core::Result<()> {
//! let program = Program::from_json(br#"{
//!     "backend": "GPU",
//!     "input_size": 2,
//!     "output_size": 2,
//!     "functions": {"add": "__kernel void add(...)"},
//!     "statements": [{"kernel": "add", "args": ["outputs", "input", "bias"], "global_size": [2], "local_size": [1]}],
//!     "buffers": {"bias": {"size": 2, "dtype": "float", "id": "bias"}}
//! }"#)?;
//! let weights = WeightStore::from_bytes(WeightWriter::new().add_f32("bias", &[2], &[10.0, 20.0]).to_bytes()?)?;
//!
//! let backend = HostBackend::new().with_kernel("add", |item, args| {
//!     let i = item.global_id(0);
//!     let sum = args.arg(1)[i] + args.arg(2)[i];
//!     args.arg_mut(0)[i] = sum;
//! });
//!
//! let mut model = Model::new(Box::new(backend), program);
//! model.setup(&weights)?;
//! assert_eq!(model.run(&[1.0, 2.0])?, vec![11.0, 22.0]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod model;
pub mod program;
pub mod weights;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use model::{normalize_launch, Model, ModelState};
pub use program::{BufferDescriptor, Program, Statement, SUPPORTED_BACKEND_TAG};
pub use weights::{DType, TensorRecord, WeightStore, WeightWriter};
