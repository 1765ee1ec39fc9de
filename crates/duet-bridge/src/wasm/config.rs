//! Configuration for the bridge runtime.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// Import namespace under which guests expect the provider's exports.
pub const DEFAULT_PROVIDER_NAMESPACE: &str = "javy_quickjs_provider_v1";

/// WASI grants given to the provider beyond its three stdio channels.
///
/// Stdio is always wired to the invocation's channels; nothing else of the
/// host (filesystem, inherited environment, network) is visible unless
/// listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasiCapabilities {
    /// Environment variables to expose
    pub env_vars: Vec<(String, String)>,

    /// Command-line arguments to pass
    pub args: Vec<String>,
}

impl WasiCapabilities {
    /// Create capabilities with nothing beyond stdio
    pub fn none() -> Self {
        Self::default()
    }

    /// Builder: add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Builder: add command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Configuration for the bridge runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Import namespace the guest uses to reach the provider
    pub provider_namespace: String,

    /// WASI capability configuration
    pub capabilities: WasiCapabilities,

    /// Directory for the stdio channel files (None = system temp dir)
    pub work_dir: Option<PathBuf>,

    /// Maximum memory in bytes per invocation (default = 256MB)
    pub max_memory: usize,

    /// Maximum execution time in milliseconds (0 = unlimited)
    pub max_execution_time_ms: u64,

    /// Enable fuel-based execution limiting
    pub fuel_limit: Option<u64>,

    /// Cranelift optimization level (0-3)
    pub optimization_level: u8,

    /// Enable SIMD support
    pub enable_simd: bool,

    /// Cache compiled modules to disk (wasmtime cache config file)
    pub cache_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            provider_namespace: DEFAULT_PROVIDER_NAMESPACE.to_string(),
            capabilities: WasiCapabilities::none(),
            work_dir: None,
            max_memory: 256 * 1024 * 1024, // 256 MB
            max_execution_time_ms: 0,       // No limit
            fuel_limit: None,
            optimization_level: 2,
            enable_simd: true,
            cache_path: None,
        }
    }
}

impl BridgeConfig {
    /// Create a minimal config for untrusted guests
    pub fn minimal() -> Self {
        Self {
            max_memory: 64 * 1024 * 1024,    // 64 MB
            max_execution_time_ms: 5_000,    // 5 s
            fuel_limit: Some(1_000_000_000), // 1B fuel units
            ..Default::default()
        }
    }

    /// Create config for development/debugging
    pub fn development() -> Self {
        Self {
            optimization_level: 0, // Faster compilation
            ..Default::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| BridgeError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Directory channels are created in.
    pub fn resolved_work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Builder: set provider namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.provider_namespace = namespace.into();
        self
    }

    /// Builder: set capabilities
    pub fn capabilities(mut self, caps: WasiCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Builder: set channel directory
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set execution deadline
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.max_execution_time_ms = ms;
        self
    }

    /// Builder: set fuel limit
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: enable SIMD
    pub fn simd(mut self, enable: bool) -> Self {
        self.enable_simd = enable;
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }
}
