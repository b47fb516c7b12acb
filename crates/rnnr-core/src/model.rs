//! Execution engine
//!
//! A [`Model`] binds one [`Program`] to one backend. [`Model::setup`]
//! provisions every buffer, uploads the weights and compiles the kernels;
//! afterwards [`Model::run`] only writes the input, replays the statements in
//! order and reads the output back.
//!
//! ```text
//!              setup Ok
//! Unconfigured ────────► Ready ◄──┐
//!      │                   │      │ run (Ok or Err)
//!      │ setup Err         └──────┘
//!      ▼
//!   Faulted
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use rnnr_backends::{create_backend, Backend, BackendError, BufferHandle, KernelHandle, LaunchConfig, WorkSize};
use rnnr_tracing::perf_span;

use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::program::{BufferDescriptor, Program, Statement, INPUT_BUFFER, OUTPUT_BUFFER};
use crate::weights::WeightStore;

/// Lifecycle of a [`Model`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelState {
    /// Constructed, nothing allocated on the backend yet
    Unconfigured,
    /// Buffers and kernels exist; `run` may be called any number of times
    Ready,
    /// Setup failed part way; the model cannot be used
    Faulted,
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelState::Unconfigured => "unconfigured",
            ModelState::Ready => "ready",
            ModelState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Turn exported statement sizes into a launch
///
/// Exporters describe `global` as the number of work-groups per dimension,
/// so the launch covers `global[i] * local[i]` work items.
pub fn normalize_launch(global: WorkSize, local: WorkSize) -> LaunchConfig {
    let global = WorkSize::new(
        global.x.saturating_mul(local.x),
        global.y.saturating_mul(local.y),
        global.z.saturating_mul(local.z),
    );
    LaunchConfig::new(global, local)
}

fn statement_launch(index: usize, statement: &Statement) -> Result<LaunchConfig> {
    let (global, local) = statement.work_sizes(index)?;
    Ok(normalize_launch(global, local))
}

fn allocation_size(descriptor: &BufferDescriptor) -> Result<usize> {
    descriptor.byte_size().ok_or_else(|| {
        Error::Backend(BackendError::allocation_failed(
            usize::MAX,
            format!(
                "buffer `{}` of {} elements overflows the address space",
                descriptor.key, descriptor.element_count
            ),
        ))
    })
}

/// A program bound to a backend
pub struct Model {
    backend: Box<dyn Backend + Send>,
    program: Program,
    state: ModelState,
    buffers: HashMap<String, BufferHandle>,
    kernels: HashMap<String, KernelHandle>,
}

impl Model {
    /// Bind `program` to an unconfigured `backend`
    pub fn new(backend: Box<dyn Backend + Send>, program: Program) -> Self {
        Self {
            backend,
            program,
            state: ModelState::Unconfigured,
            buffers: HashMap::new(),
            kernels: HashMap::new(),
        }
    }

    /// Load both artifacts named by `config`, create its backend and set up
    ///
    /// Artifacts are loaded before the backend is created, so a bad program
    /// never touches a device.
    pub fn load(config: &RuntimeConfig) -> Result<Self> {
        let (program, weights) = load_artifacts(config)?;
        let backend = create_backend(config.backend)?;
        Self::ready(backend, program, &weights)
    }

    /// Like [`Model::load`] with a caller-provided backend
    pub fn load_with_backend(config: &RuntimeConfig, backend: Box<dyn Backend + Send>) -> Result<Self> {
        let (program, weights) = load_artifacts(config)?;
        Self::ready(backend, program, &weights)
    }

    fn ready(backend: Box<dyn Backend + Send>, program: Program, weights: &WeightStore) -> Result<Self> {
        let mut model = Self::new(backend, program);
        model.setup(weights)?;
        Ok(model)
    }

    /// Provision buffers, upload weights and compile kernels
    ///
    /// Sourced buffers are filled from `weights` once, here. On failure the
    /// model becomes [`ModelState::Faulted`] and whatever was already
    /// allocated stays with the backend.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the model is unconfigured; otherwise the first
    /// backend or weight lookup failure.
    pub fn setup(&mut self, weights: &WeightStore) -> Result<()> {
        self.expect_state(ModelState::Unconfigured)?;

        let start = Instant::now();
        match self.provision(weights) {
            Ok(()) => {
                self.state = ModelState::Ready;
                tracing::info!(
                    backend = self.backend.name(),
                    buffers = self.buffers.len(),
                    kernels = self.kernels.len(),
                    duration_us = start.elapsed().as_micros() as u64,
                    "model_ready"
                );
                Ok(())
            }
            Err(err) => {
                self.state = ModelState::Faulted;
                tracing::error!(backend = self.backend.name(), error = %err, "model_setup_failed");
                Err(err)
            }
        }
    }

    fn provision(&mut self, weights: &WeightStore) -> Result<()> {
        self.backend.setup()?;

        for (key, descriptor) in self.program.buffers() {
            let handle = self
                .backend
                .create_buffer(allocation_size(descriptor)?, descriptor.writable())?;
            if let Some(source) = &descriptor.source_name {
                let values = weights.get(source)?;
                self.backend.write_buffer(handle, &values)?;
                tracing::trace!(buffer = %key, tensor = %source, elements = values.len(), "weights_uploaded");
            }
            self.buffers.insert(key.clone(), handle);
        }

        let input = self
            .backend
            .create_buffer(allocation_size(self.program.input())?, false)?;
        self.buffers.insert(INPUT_BUFFER.to_string(), input);
        let output = self
            .backend
            .create_buffer(allocation_size(self.program.output())?, true)?;
        self.buffers.insert(OUTPUT_BUFFER.to_string(), output);

        for (key, source) in self.program.kernels() {
            let handle = self.backend.create_kernel(key, source)?;
            tracing::debug!(kernel = %key, handle = %handle, "kernel_compiled");
            self.kernels.insert(key.clone(), handle);
        }
        Ok(())
    }

    /// Execute every statement against `input` and return the output buffer
    ///
    /// A failing statement aborts the run and leaves the model ready; later
    /// runs start over from the first statement.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the model is ready
    /// - `InputLength` unless `input` has exactly [`Model::input_len`] floats
    /// - `InvalidWorkDimensions`, `UnresolvedKernelReference` or
    ///   `UnresolvedBufferReference` for a statement, before it is dispatched
    /// - `KernelDispatchFailed` when the backend rejects a launch
    pub fn run(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        self.expect_state(ModelState::Ready)?;
        if input.len() != self.input_len() {
            return Err(Error::InputLength {
                expected: self.input_len(),
                actual: input.len(),
            });
        }
        let start = Instant::now();

        let input_buffer = self.reserved_buffer(INPUT_BUFFER)?;
        self.backend.write_buffer(input_buffer, input)?;

        for (index, statement) in self.program.statements().iter().enumerate() {
            let launch = statement_launch(index, statement)?;
            let kernel = self
                .kernels
                .get(&statement.kernel_key)
                .copied()
                .ok_or_else(|| Error::UnresolvedKernelReference {
                    statement: index,
                    kernel: statement.kernel_key.clone(),
                })?;
            let args = statement
                .arg_names
                .iter()
                .map(|key| {
                    self.buffers
                        .get(key)
                        .copied()
                        .ok_or_else(|| Error::UnresolvedBufferReference {
                            statement: index,
                            key: key.clone(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            let _span = perf_span!("statement", index = index, kernel = statement.kernel_key.as_str());
            self.backend
                .run_kernel(kernel, &launch, &args)
                .map_err(|source| Error::KernelDispatchFailed {
                    statement: index,
                    kernel: statement.kernel_key.clone(),
                    source,
                })?;
        }

        let output_buffer = self.reserved_buffer(OUTPUT_BUFFER)?;
        let mut output = vec![0.0f32; self.output_len()];
        self.backend.read_buffer(output_buffer, &mut output)?;

        tracing::debug!(
            statements = self.program.statements().len(),
            duration_us = start.elapsed().as_micros() as u64,
            "model_run_complete"
        );
        Ok(output)
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Number of floats `run` expects
    pub fn input_len(&self) -> usize {
        self.program.input().element_len().unwrap_or(usize::MAX)
    }

    /// Number of floats `run` returns
    pub fn output_len(&self) -> usize {
        self.program.output().element_len().unwrap_or(usize::MAX)
    }

    /// Handle allocated for buffer `name`, including `input` and `outputs`
    pub fn buffer(&self, name: &str) -> Option<BufferHandle> {
        self.buffers.get(name).copied()
    }

    pub fn kernel(&self, name: &str) -> Option<KernelHandle> {
        self.kernels.get(name).copied()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    fn expect_state(&self, expected: ModelState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    fn reserved_buffer(&self, key: &str) -> Result<BufferHandle> {
        self.buffer(key).ok_or(Error::InvalidState {
            expected: ModelState::Ready,
            actual: self.state,
        })
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("buffers", &self.buffers.len())
            .field("kernels", &self.kernels.len())
            .field("statements", &self.program.statements().len())
            .finish()
    }
}

fn load_artifacts(config: &RuntimeConfig) -> Result<(Program, WeightStore)> {
    let program = Program::from_file(&config.program_path)?;
    if config.eager_validation {
        program.check_references()?;
    }
    let weights = WeightStore::from_file(&config.weights_path)?;
    tracing::info!(
        program = %config.program_path.display(),
        weights = %config.weights_path.display(),
        statements = program.statements().len(),
        tensors = weights.len(),
        "artifacts_loaded"
    );
    Ok((program, weights))
}
