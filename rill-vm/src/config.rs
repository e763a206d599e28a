//! Runtime Configuration
//!
//! Configuration for a [`Vm`](crate::Vm) instance. Values can be set
//! programmatically through [`VmConfig::builder`] or loaded from environment
//! variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `RILL_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RILL_QUANTUM` | Instructions per time slice before rotation | 16 |
//! | `RILL_HEAP_SIZE` | Heap size in bytes | 1048576 (1 MiB) |
//! | `RILL_DEBUG` | Informational logging flag ("true"/"false") | false |

use std::env;

use thiserror::Error;

use crate::heap::NODE_BYTES;

/// Configuration for the VM.
///
/// Use [`VmConfig::default`] for sensible defaults, `VmConfig::from_env` to
/// honor `RILL_*` environment variables, or the builder for explicit setup.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Number of instructions a task may execute before the scheduler
    /// rotates to the next runnable task.
    /// Default: 16.
    pub quantum: usize,

    /// Size of the managed heap in bytes. Grows by doubling under pressure;
    /// this is only the initial size.
    /// Default: 1 MiB.
    pub heap_size: usize,

    /// Informational logging flag, surfaced so an embedder can pick a
    /// subscriber filter level.
    /// Default: false.
    pub debug: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            quantum: 16,
            heap_size: 1024 * 1024, // 1 MiB
            debug: false,
        }
    }
}

impl VmConfig {
    /// Create a new builder.
    pub fn builder() -> VmConfigBuilder {
        VmConfigBuilder::new()
    }

    /// Load configuration from `RILL_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_usize("RILL_QUANTUM") {
            if val > 0 {
                config.quantum = val;
            }
        }

        if let Some(val) = parse_env_usize("RILL_HEAP_SIZE") {
            if val >= NODE_BYTES {
                config.heap_size = val;
            }
        }

        if let Some(val) = parse_env_bool("RILL_DEBUG") {
            config.debug = val;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quantum == 0 {
            return Err(ConfigError::InvalidValue {
                field: "quantum",
                message: "must be at least 1".into(),
            });
        }

        if self.heap_size < NODE_BYTES {
            return Err(ConfigError::InvalidValue {
                field: "heap_size",
                message: format!("must fit at least one node ({} bytes)", NODE_BYTES),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

/// Builder for [`VmConfig`].
#[derive(Debug, Clone, Default)]
pub struct VmConfigBuilder {
    config: VmConfig,
}

impl VmConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time quantum (instructions per slice).
    pub fn quantum(mut self, quantum: usize) -> Self {
        self.config.quantum = quantum;
        self
    }

    /// Set the initial heap size in bytes.
    pub fn heap_size(mut self, bytes: usize) -> Self {
        self.config.heap_size = bytes;
        self
    }

    /// Set the debug flag.
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<VmConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    ///
    /// Use this only if you're certain the configuration is valid.
    pub fn build_unchecked(self) -> VmConfig {
        self.config
    }
}

/// Parse an environment variable as usize.
fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse an environment variable as bool.
fn parse_env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|s| match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    })
}

// ============================================================================
// Tests
// ============================================================================
