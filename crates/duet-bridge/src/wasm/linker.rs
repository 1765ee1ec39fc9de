//! Two-stage linking of the provider and guest modules.
//!
//! The provider is instantiated against WASI preview1. The guest is then
//! instantiated against a linker holding a single entry: the provider
//! instance registered under the namespace in [`LinkSpec`]. Both instances
//! live in the same store so guest calls land directly in provider code.

use std::collections::HashMap;

use wasmtime::{Instance, Linker, Memory, Store};

use super::config::WasiCapabilities;
use super::runner::{Convention, EntryPoint};
use super::runtime::{extern_kind, BinaryModule, BridgeHostState, WasmRuntime};
use crate::channel::StdioHandles;
use crate::error::{BridgeError, Result};

/// What the provider instance is given: WASI grants plus the stdio handles.
#[derive(Debug)]
pub struct ImportSurface {
    /// Environment and arguments
    pub capabilities: WasiCapabilities,
    /// Channel handles for stdin, stdout and stderr
    pub stdio: StdioHandles,
}

/// The namespace contract between guest and provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpec {
    namespace: String,
}

impl LinkSpec {
    /// Expect guests to import the provider under `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The expected import namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Check, without instantiating anything, that every guest import lives
    /// in the expected namespace and names a provider export of the same
    /// kind. Returns the guest's entry convention.
    pub fn validate(&self, provider: &BinaryModule, guest: &BinaryModule) -> Result<Convention> {
        let exports: HashMap<&str, &'static str> = provider
            .module()
            .exports()
            .map(|export| (export.name(), extern_kind(&export.ty())))
            .collect();

        for import in guest.imports() {
            if import.namespace != self.namespace {
                return Err(BridgeError::LinkError(format!(
                    "guest '{}' imports `{}::{}` but only `{}` is linked",
                    guest.name(),
                    import.namespace,
                    import.name,
                    self.namespace
                )));
            }

            match exports.get(import.name.as_str()) {
                None => {
                    return Err(BridgeError::LinkError(format!(
                        "provider '{}' does not export `{}` required by guest '{}'",
                        provider.name(),
                        import.name,
                        guest.name()
                    )))
                }
                Some(&kind) if kind != import.kind => {
                    return Err(BridgeError::LinkError(format!(
                        "guest imports `{}` as {} but provider exports a {}",
                        import.name, import.kind, kind
                    )))
                }
                Some(_) => {}
            }
        }

        Convention::detect(guest)
    }

    /// Validate, then instantiate both modules in one fresh store.
    pub fn link(
        &self,
        runtime: &WasmRuntime,
        provider: &BinaryModule,
        guest: &BinaryModule,
        surface: ImportSurface,
    ) -> Result<LinkedPair> {
        let convention = self.validate(provider, guest)?;
        let mut store = runtime.new_store(surface)?;

        let mut wasi_linker: Linker<BridgeHostState> = Linker::new(runtime.engine());
        wasmtime_wasi::preview1::add_to_linker_sync(&mut wasi_linker, |state| state.preview1())
            .map_err(|e| BridgeError::Engine(format!("WASI link failed: {}", e)))?;

        let provider_instance = wasi_linker
            .instantiate(&mut store, provider.module())
            .map_err(|e| {
                BridgeError::LinkError(format!(
                    "provider '{}' instantiation failed: {:#}",
                    provider.name(),
                    e
                ))
            })?;

        let mut guest_linker: Linker<BridgeHostState> = Linker::new(runtime.engine());
        guest_linker
            .instance(&mut store, &self.namespace, provider_instance)
            .map_err(|e| BridgeError::LinkError(format!("{:#}", e)))?;

        let guest_instance = guest_linker
            .instantiate(&mut store, guest.module())
            .map_err(|e| {
                BridgeError::LinkError(format!(
                    "guest '{}' instantiation failed: {:#}",
                    guest.name(),
                    e
                ))
            })?;

        let entry = EntryPoint::resolve(convention, &mut store, provider_instance, guest_instance)?;
        tracing::debug!(
            provider = provider.name(),
            guest = guest.name(),
            namespace = %self.namespace,
            %convention,
            "linked modules"
        );

        Ok(LinkedPair {
            store,
            provider: provider_instance,
            guest: guest_instance,
            entry,
            timeout_ms: runtime.config().max_execution_time_ms,
        })
    }
}

/// Provider and guest instances sharing one store.
pub struct LinkedPair {
    pub(crate) store: Store<BridgeHostState>,
    pub(crate) provider: Instance,
    pub(crate) guest: Instance,
    pub(crate) entry: EntryPoint,
    pub(crate) timeout_ms: u64,
}

impl LinkedPair {
    /// Entry convention resolved at link time.
    pub fn convention(&self) -> Convention {
        self.entry.convention()
    }

    /// The provider's exported linear memory, if any.
    pub fn provider_memory(&mut self) -> Option<Memory> {
        self.provider.get_memory(&mut self.store, "memory")
    }

    /// Read bytes from provider memory at the given offset.
    pub fn read_provider_memory(&mut self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let memory = self
            .provider_memory()
            .ok_or_else(|| BridgeError::Engine("provider exports no memory".to_string()))?;
        let mem_data = memory.data(&self.store);

        offset
            .checked_add(len)
            .and_then(|end| mem_data.get(offset..end))
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| BridgeError::Engine("memory read out of bounds".to_string()))
    }

    /// Names of the functions the guest instance exports.
    pub fn guest_functions(&mut self) -> Vec<String> {
        let names: Vec<_> = self
            .guest
            .exports(&mut self.store)
            .map(|e| e.name().to_string())
            .collect();
        names
            .into_iter()
            .filter(|name| self.guest.get_func(&mut self.store, name).is_some())
            .collect()
    }
}
