//! One-shot invocation of a provider/guest pair.

use serde_json::Value;

use crate::channel::Channels;
use crate::decode::{classify, DecodedValue};
use crate::error::Result;
use crate::wasm::{BinaryModule, BridgeConfig, ImportSurface, LinkSpec, Runner, WasmRuntime};

/// Successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    /// Decoded output channel
    pub value: DecodedValue,
    /// Time spent inside the sandbox, in microseconds
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

/// Compiles modules and runs invocations against one engine.
///
/// The engine and compiled modules are reusable; channels, the store and
/// both instances are created per invocation and released before
/// [`Bridge::invoke`] returns.
pub struct Bridge {
    runtime: WasmRuntime,
    spec: LinkSpec,
}

impl Bridge {
    /// Create a bridge with the given configuration.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let spec = LinkSpec::new(config.provider_namespace.clone());
        let runtime = WasmRuntime::new(config)?;
        Ok(Self { runtime, spec })
    }

    /// Underlying runtime.
    pub fn runtime(&self) -> &WasmRuntime {
        &self.runtime
    }

    /// Namespace contract used for linking.
    pub fn link_spec(&self) -> &LinkSpec {
        &self.spec
    }

    /// Validate and compile module bytes.
    pub fn compile(&self, name: &str, bytes: &[u8]) -> Result<BinaryModule> {
        self.runtime.compile(name, bytes)
    }

    /// Compile both modules, then invoke. Invalid modules fail before any
    /// channel exists.
    pub fn invoke_bytes(
        &self,
        provider: &[u8],
        guest: &[u8],
        input: &Value,
    ) -> Result<InvocationResult> {
        let provider = self.compile("provider", provider)?;
        let guest = self.compile("guest", guest)?;
        self.invoke(&provider, &guest, input)
    }

    /// Run `guest` linked against `provider` with `input` on stdin.
    pub fn invoke(
        &self,
        provider: &BinaryModule,
        guest: &BinaryModule,
        input: &Value,
    ) -> Result<InvocationResult> {
        let span = tracing::info_span!("invoke", guest = guest.name());
        let _enter = span.enter();

        // Link problems surface before any channel or sandbox exists.
        self.spec.validate(provider, guest)?;

        let mut channels = Channels::open(self.runtime.config().resolved_work_dir())?;
        let id = channels.id().to_string();
        let result = self.execute(&mut channels, provider, guest, input);

        if let Err(e) = channels.release() {
            tracing::warn!(%id, "best-effort channel cleanup failed: {}", e);
        }

        match &result {
            Ok(done) => tracing::info!(
                %id,
                execution_time_us = done.execution_time_us,
                "invocation succeeded"
            ),
            Err(e) => tracing::info!(%id, kind = %e.kind(), "invocation failed: {}", e),
        }
        result
    }

    fn execute(
        &self,
        channels: &mut Channels,
        provider: &BinaryModule,
        guest: &BinaryModule,
        input: &Value,
    ) -> Result<InvocationResult> {
        channels.write_input(input)?;

        let surface = ImportSurface {
            capabilities: self.runtime.config().capabilities.clone(),
            stdio: channels.stdio()?,
        };
        let linked = self.spec.link(&self.runtime, provider, guest, surface)?;

        let mut runner = Runner::new(linked);
        let report = runner.run()?;
        // Dropping the runner closes the sandbox's handles and frees the store.
        drop(runner);

        let readout = channels.readout()?;
        let value = classify(&report.outcome, readout)?;

        Ok(InvocationResult {
            value,
            execution_time_us: report.execution_time_us,
            fuel_consumed: report.fuel_consumed,
        })
    }
}
