//! # duet-bridge
//!
//! Host-side bridge for two-module WebAssembly programs: a *provider* module
//! supplying a scripting runtime over WASI preview1, and a *guest* module
//! (a pre-compiled script) importing the provider under a fixed, versioned
//! namespace.
//!
//! A structured input value goes in on the sandbox's stdin; the sandbox's
//! stdout and stderr come back as decoded values or a classified error.
//!
//! ## Invocation Pipeline
//!
//! ```text
//! bytes ─▶ compile ─▶ LinkSpec::validate ─▶ Channels::open ─▶ write_input
//!       ─▶ link (provider, then guest) ─▶ Runner::run ─▶ readout ─▶ classify
//! ```
//!
//! | Outcome | Error channel | Result |
//! |---------|---------------|--------|
//! | trap / exit != 0 | any | `SandboxFault` |
//! | deadline expired | any | `Timeout` |
//! | returned | non-empty | `ApplicationError` |
//! | returned | empty | decoded output |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use duet_bridge::{Bridge, BridgeConfig};
//! use serde_json::json;
//!
//! let bridge = Bridge::new(BridgeConfig::default())?;
//! let provider = bridge.runtime().load_module("provider.wasm")?;
//! let guest = bridge.runtime().load_module("script.wasm")?;
//!
//! let result = bridge.invoke(&provider, &guest, &json!({"n": 100}))?;
//! println!("{}", result.value);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod channel;
pub mod decode;
pub mod error;
pub mod stats;
pub mod wasm;

// Re-export main types
pub use bridge::{Bridge, InvocationResult};
pub use channel::{ChannelKind, Channels, StdioHandles};
pub use decode::{classify, decode, DecodedValue, StreamReadout};
pub use error::{BridgeError, ErrorKind, Result};
pub use stats::{LatencyStats, LatencySummary};
pub use wasm::{
    BinaryModule, BridgeConfig, Convention, LinkSpec, WasiCapabilities, WasmRuntime,
    DEFAULT_PROVIDER_NAMESPACE,
};

/// Run one invocation with the default configuration.
pub fn run(provider: &[u8], guest: &[u8], input: &serde_json::Value) -> Result<DecodedValue> {
    let bridge = Bridge::new(BridgeConfig::default())?;
    Ok(bridge.invoke_bytes(provider, guest, input)?.value)
}
