//! Engine construction and module loading.
//!
//! Uses wasmtime-wasi preview1, the interface provider modules are built
//! against.

use super::config::BridgeConfig;
use super::epoch::{deadline_ticks, EpochTicker};
use super::linker::ImportSurface;
use crate::error::{BridgeError, Result};

use std::io::Read;
use std::path::Path;

use wasmtime::*;
use wasmtime_wasi::pipe::MemoryInputPipe;
use wasmtime_wasi::preview1::WasiP1Ctx;

/// Host state for the store shared by the provider and guest instances.
pub struct BridgeHostState {
    preview1: WasiP1Ctx,
    limits: StoreLimits,
}

impl BridgeHostState {
    /// Get the preview1 context.
    pub(crate) fn preview1(&mut self) -> &mut WasiP1Ctx {
        &mut self.preview1
    }
}

/// Engine plus configuration, shared by every invocation.
pub struct WasmRuntime {
    engine: Engine,
    config: BridgeConfig,
    _ticker: Option<EpochTicker>,
}

/// An immutable, validated module. Cloning shares the compiled code.
#[derive(Clone)]
pub struct BinaryModule {
    module: Module,
    name: String,
}

/// One entry of a module's import section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImport {
    /// Import module (namespace) name
    pub namespace: String,
    /// Field name within the namespace
    pub name: String,
    /// Kind of the imported item (`func`, `memory`, `global`, `table`)
    pub kind: &'static str,
}

pub(crate) fn extern_kind(ty: &ExternType) -> &'static str {
    match ty {
        ExternType::Func(_) => "func",
        ExternType::Memory(_) => "memory",
        ExternType::Global(_) => "global",
        ExternType::Table(_) => "table",
        #[allow(unreachable_patterns)]
        _ => "other",
    }
}

impl WasmRuntime {
    /// Create a runtime with the given configuration.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let mut engine_config = Config::new();

        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            _ => OptLevel::Speed,
        });
        engine_config.wasm_simd(config.enable_simd);

        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        let deadline = config.max_execution_time_ms > 0;
        if deadline {
            engine_config.epoch_interruption(true);
        }

        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                tracing::warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| BridgeError::Engine(format!("engine creation failed: {}", e)))?;

        let ticker = if deadline {
            Some(EpochTicker::start(engine.clone()).map_err(|e| {
                BridgeError::Engine(format!("failed to start epoch ticker: {}", e))
            })?)
        } else {
            None
        };

        Ok(Self {
            engine,
            config,
            _ticker: ticker,
        })
    }

    /// Validate and compile module bytes (binary, or text format).
    pub fn compile(&self, name: &str, bytes: &[u8]) -> Result<BinaryModule> {
        let module = Module::new(&self.engine, bytes).map_err(|e| BridgeError::InvalidModule {
            name: name.to_string(),
            reason: format!("{:#}", e),
        })?;
        tracing::debug!(module = name, "compiled module");

        Ok(BinaryModule {
            module,
            name: name.to_string(),
        })
    }

    /// Read a module file and compile it. The module is named after the file stem.
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<BinaryModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let bytes = std::fs::read(path)?;
        self.compile(&name, &bytes)
    }

    /// Build a fresh store whose WASI context is wired to `surface`.
    pub(crate) fn new_store(&self, surface: ImportSurface) -> Result<Store<BridgeHostState>> {
        let host_state = self.build_host_state(surface)?;
        let mut store = Store::new(&self.engine, host_state);

        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| BridgeError::Engine(format!("fuel setup failed: {}", e)))?;
        }

        if self.config.max_execution_time_ms > 0 {
            store.set_epoch_deadline(deadline_ticks(self.config.max_execution_time_ms));
            store.epoch_deadline_trap();
        }

        Ok(store)
    }

    fn build_host_state(&self, surface: ImportSurface) -> Result<BridgeHostState> {
        let ImportSurface {
            capabilities,
            stdio,
        } = surface;

        // The input channel is complete before any sandbox exists, so the
        // sandbox reads a snapshot of it.
        let mut stdin = stdio.stdin;
        let mut input = Vec::new();
        stdin
            .read_to_end(&mut input)
            .map_err(|e| BridgeError::channel("read input channel", e))?;

        let mut builder = wasmtime_wasi::WasiCtxBuilder::new();
        builder
            .stdin(MemoryInputPipe::new(input))
            .stdout(wasmtime_wasi::OutputFile::new(stdio.stdout))
            .stderr(wasmtime_wasi::OutputFile::new(stdio.stderr));

        for (key, value) in &capabilities.env_vars {
            builder.env(key, value);
        }
        builder.args(&capabilities.args);

        let preview1 = builder.build_p1();

        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();

        Ok(BridgeHostState { preview1, limits })
    }

    /// Get the engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Get the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl BinaryModule {
    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn module(&self) -> &Module {
        &self.module
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// Whether the module exports a function called `name`.
    pub fn exports_func(&self, name: &str) -> bool {
        self.exports().any(|export| export == name)
    }

    /// Get declared imports.
    pub fn imports(&self) -> impl Iterator<Item = ModuleImport> + '_ {
        self.module.imports().map(|import| ModuleImport {
            namespace: import.module().to_string(),
            name: import.name().to_string(),
            kind: extern_kind(&import.ty()),
        })
    }
}

impl std::fmt::Debug for BinaryModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryModule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
