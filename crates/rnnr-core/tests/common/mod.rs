//! Shared fixtures for rnnr-core integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rnnr_backends::{Backend, BufferHandle, HostBackend, KernelHandle, LaunchConfig};
use rnnr_core::{Program, WeightStore, WeightWriter};

pub const ADD_SOURCE: &str = "__kernel void add(__global float *c, __global const float *b, __global const float *a) \
     { int i = get_global_id(0); c[i] = a[i] + b[i]; }";

pub const ELEMENTS: usize = 1024;

/// Program computing `outputs = b + input` over 1024 elements with `b` from the weights.
pub fn add_program_json(args: &str) -> String {
    serde_json::json!({
        "backend": "GPU",
        "input_size": {"size": ELEMENTS, "dtype": "float", "id": ""},
        "output_size": {"size": ELEMENTS, "dtype": "float", "id": ""},
        "functions": {"add": ADD_SOURCE},
        "statements": [
            {"kernel": "add", "args": serde_json::from_str::<serde_json::Value>(args).unwrap(), "global_size": [ELEMENTS], "local_size": [1]}
        ],
        "buffers": {"b": {"size": ELEMENTS, "dtype": "float", "id": "b"}}
    })
    .to_string()
}

pub fn add_program() -> Program {
    Program::from_json(add_program_json(r#"["outputs", "b", "input"]"#).as_bytes()).unwrap()
}

pub fn ramp() -> Vec<f32> {
    (0..ELEMENTS).map(|i| i as f32).collect()
}

pub fn add_weights_bytes() -> Vec<u8> {
    WeightWriter::new().add_f32("b", &[ELEMENTS as u64], &ramp()).to_bytes().unwrap()
}

pub fn add_weights() -> WeightStore {
    WeightStore::from_bytes(add_weights_bytes()).unwrap()
}

/// `outputs = a + b` with both operands uploaded from the weights and an unused one-element input.
pub fn preloaded_add_program() -> Program {
    let json = serde_json::json!({
        "backend": "GPU",
        "input_size": 1,
        "output_size": {"size": ELEMENTS, "dtype": "float", "id": ""},
        "functions": {"add": ADD_SOURCE},
        "statements": [
            {"kernel": "add", "args": ["outputs", "b", "a"], "global_size": [ELEMENTS], "local_size": [1]}
        ],
        "buffers": {
            "a": {"size": ELEMENTS, "dtype": "float", "id": "a"},
            "b": {"size": ELEMENTS, "dtype": "float", "id": "b"}
        }
    });
    Program::from_json(json.to_string().as_bytes()).unwrap()
}

pub fn preloaded_add_weights() -> WeightStore {
    let bytes = WeightWriter::new()
        .add_f32("a", &[ELEMENTS as u64], &ramp())
        .add_f32("b", &[ELEMENTS as u64], &ramp())
        .to_bytes()
        .unwrap();
    WeightStore::from_bytes(bytes).unwrap()
}

/// Host backend with a native `add` matching [`ADD_SOURCE`].
pub fn add_backend() -> HostBackend {
    HostBackend::new().with_kernel("add", |item, args| {
        let i = item.global_id(0);
        let sum = args.arg(2)[i] + args.arg(1)[i];
        args.arg_mut(0)[i] = sum;
    })
}

/// Write program and weights into `dir`, returning their paths.
pub fn write_artifacts(dir: &Path, program_json: &str) -> (PathBuf, PathBuf) {
    let program_path = dir.join("net.json");
    let weights_path = dir.join("net.safetensors");
    std::fs::write(&program_path, program_json).unwrap();
    std::fs::write(&weights_path, add_weights_bytes()).unwrap();
    (program_path, weights_path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Setup,
    CreateKernel(String),
    CreateBuffer { byte_size: usize, writable: bool },
    Write { buffer: BufferHandle, len: usize },
    Read { buffer: BufferHandle, len: usize },
    Run { kernel: KernelHandle, args: Vec<BufferHandle> },
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Host backend wrapper that logs every trait call.
pub struct RecordingBackend {
    inner: HostBackend,
    calls: CallLog,
}

impl RecordingBackend {
    pub fn new(inner: HostBackend) -> (Self, CallLog) {
        let calls = CallLog::default();
        (
            Self {
                inner,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn log(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Backend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn setup(&mut self) -> rnnr_backends::Result<()> {
        self.log(Call::Setup);
        self.inner.setup()
    }

    fn create_kernel(&mut self, name: &str, source: &str) -> rnnr_backends::Result<KernelHandle> {
        self.log(Call::CreateKernel(name.to_string()));
        self.inner.create_kernel(name, source)
    }

    fn create_buffer(&mut self, byte_size: usize, writable: bool) -> rnnr_backends::Result<BufferHandle> {
        self.log(Call::CreateBuffer { byte_size, writable });
        self.inner.create_buffer(byte_size, writable)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[f32]) -> rnnr_backends::Result<()> {
        self.log(Call::Write { buffer, len: data.len() });
        self.inner.write_buffer(buffer, data)
    }

    fn read_buffer(&mut self, buffer: BufferHandle, out: &mut [f32]) -> rnnr_backends::Result<()> {
        self.log(Call::Read { buffer, len: out.len() });
        self.inner.read_buffer(buffer, out)
    }

    fn buffer_size(&self, buffer: BufferHandle) -> rnnr_backends::Result<usize> {
        self.inner.buffer_size(buffer)
    }

    fn run_kernel(&mut self, kernel: KernelHandle, launch: &LaunchConfig, args: &[BufferHandle]) -> rnnr_backends::Result<()> {
        self.log(Call::Run {
            kernel,
            args: args.to_vec(),
        });
        self.inner.run_kernel(kernel, launch, args)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
