//! WebAssembly side of the bridge: engine, loading, linking and running.
//!
//! ## Security Model
//!
//! - **Memory isolation**: provider and guest share one store; the host only
//!   sees provider memory through explicit inspection calls
//! - **Capability-based**: the provider sees its three stdio channels plus the
//!   environment and arguments granted in [`WasiCapabilities`], nothing else
//! - **Closed import surface**: the guest may import only from the provider
//!   namespace, checked by [`LinkSpec::validate`] before instantiation
//! - **Bounded execution**: optional fuel and wall-clock deadlines
//!
//! ## Usage
//!
//! ```rust,ignore
//! use duet_bridge::wasm::{BridgeConfig, LinkSpec, Runner, WasmRuntime};
//!
//! let runtime = WasmRuntime::new(BridgeConfig::default())?;
//! let provider = runtime.load_module("provider.wasm")?;
//! let guest = runtime.load_module("script.wasm")?;
//!
//! let spec = LinkSpec::new(&runtime.config().provider_namespace);
//! let linked = spec.link(&runtime, &provider, &guest, surface)?;
//! let report = Runner::new(linked).run()?;
//! ```

mod config;
mod epoch;
mod linker;
mod runner;
mod runtime;

pub use config::{BridgeConfig, WasiCapabilities, DEFAULT_PROVIDER_NAMESPACE};
pub use linker::{ImportSurface, LinkSpec, LinkedPair};
pub use runner::{
    Convention, EntryPoint, Fault, RunOutcome, RunReport, RunState, Runner, INITIALIZE_EXPORT,
    START_EXPORT,
};
pub use runtime::{BinaryModule, BridgeHostState, ModuleImport, WasmRuntime};
