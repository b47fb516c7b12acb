//! Runtime configuration

use std::env;
use std::path::PathBuf;

use rnnr_backends::BackendKind;

use crate::error::{Error, Result};

pub const DEFAULT_PROGRAM_PATH: &str = "net.json";
pub const DEFAULT_WEIGHTS_PATH: &str = "net.safetensors";

/// Where to find a model's artifacts and which backend runs it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub program_path: PathBuf,
    pub weights_path: PathBuf,
    pub backend: BackendKind,
    /// Resolve every statement reference at load time instead of at run time
    pub eager_validation: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            program_path: PathBuf::from(DEFAULT_PROGRAM_PATH),
            weights_path: PathBuf::from(DEFAULT_WEIGHTS_PATH),
            backend: BackendKind::default(),
            eager_validation: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.program_path = path.into();
        self
    }

    pub fn with_weights_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.weights_path = path.into();
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_eager_validation(mut self, eager: bool) -> Self {
        self.eager_validation = eager;
        self
    }

    /// Build a configuration from the defaults and environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `RNNR_MODEL` - program description path
    /// - `RNNR_WEIGHTS` - weight container path
    /// - `RNNR_BACKEND` - `host`, `opencl` or `metal`
    /// - `RNNR_EAGER_VALIDATION` - `true`/`1`/`yes` or `false`/`0`/`no`
    ///
    /// # Errors
    ///
    /// `Config` when a variable is set to a value that cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = non_empty_var("RNNR_MODEL") {
            config.program_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_var("RNNR_WEIGHTS") {
            config.weights_path = PathBuf::from(path);
        }
        if let Some(backend) = non_empty_var("RNNR_BACKEND") {
            config.backend = backend
                .parse()
                .map_err(|err| Error::Config(format!("RNNR_BACKEND: {err}")))?;
        }
        if let Some(eager) = non_empty_var("RNNR_EAGER_VALIDATION") {
            config.eager_validation = parse_flag(&eager)
                .ok_or_else(|| Error::Config(format!("RNNR_EAGER_VALIDATION: expected a boolean, got `{eager}`")))?;
        }

        Ok(config)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
