//! Entry-point conventions and the run state machine.
//!
//! ```text
//! Linked ──run──▶ Running ──▶ Finished
//!                        └──▶ Faulted
//! ```
//!
//! `Finished` only means control came back to the host without a trap; the
//! guest may still have reported an error on stderr.

use std::fmt;
use std::time::Instant;

use wasmtime::{Instance, Store, Trap, TypedFunc};

use super::linker::LinkedPair;
use super::runtime::{BinaryModule, BridgeHostState};
use crate::error::{BridgeError, Result};

/// Export a WASI reactor uses for one-time setup.
pub const INITIALIZE_EXPORT: &str = "_initialize";

/// Export invoked to run the guest.
pub const START_EXPORT: &str = "_start";

/// How the sandbox is entered, decided from the guest's exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// Initialize the provider, then call the guest's `_start`
    Reactor,
    /// Call the guest's `_start` as a single unified entry
    Command,
}

impl Convention {
    /// Reactor when the guest declares `_initialize`, command otherwise.
    /// Either way the guest must export `_start`.
    pub fn detect(guest: &BinaryModule) -> Result<Self> {
        if !guest.exports_func(START_EXPORT) {
            return Err(BridgeError::LinkError(format!(
                "guest '{}' does not export `{}`",
                guest.name(),
                START_EXPORT
            )));
        }

        if guest.exports_func(INITIALIZE_EXPORT) {
            Ok(Convention::Reactor)
        } else {
            Ok(Convention::Command)
        }
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Reactor => f.write_str("reactor"),
            Convention::Command => f.write_str("command"),
        }
    }
}

/// Resolved entry functions for one linked pair.
pub enum EntryPoint {
    /// Two-phase entry
    Reactor {
        /// Provider `_initialize`, when the provider exports one
        initialize: Option<TypedFunc<(), ()>>,
        /// Guest `_start`
        start: TypedFunc<(), ()>,
    },
    /// Unified entry
    Command {
        /// Guest `_start`
        start: TypedFunc<(), ()>,
    },
}

impl EntryPoint {
    pub(crate) fn resolve(
        convention: Convention,
        store: &mut Store<BridgeHostState>,
        provider: Instance,
        guest: Instance,
    ) -> Result<Self> {
        let start = guest
            .get_typed_func::<(), ()>(&mut *store, START_EXPORT)
            .map_err(|e| BridgeError::LinkError(format!("guest `{}`: {}", START_EXPORT, e)))?;

        match convention {
            Convention::Reactor => {
                let initialize = match provider.get_func(&mut *store, INITIALIZE_EXPORT) {
                    Some(func) => Some(func.typed::<(), ()>(&*store).map_err(|e| {
                        BridgeError::LinkError(format!(
                            "provider `{}`: {}",
                            INITIALIZE_EXPORT, e
                        ))
                    })?),
                    None => None,
                };
                Ok(EntryPoint::Reactor { initialize, start })
            }
            Convention::Command => Ok(EntryPoint::Command { start }),
        }
    }

    /// Which convention this entry point follows.
    pub fn convention(&self) -> Convention {
        match self {
            EntryPoint::Reactor { .. } => Convention::Reactor,
            EntryPoint::Command { .. } => Convention::Command,
        }
    }

    fn execute(&self, store: &mut Store<BridgeHostState>) -> wasmtime::Result<()> {
        match self {
            EntryPoint::Reactor { initialize, start } => {
                if let Some(initialize) = initialize {
                    initialize.call(&mut *store, ()).map_err(early_exit)?;
                }
                start.call(&mut *store, ())
            }
            EntryPoint::Command { start } => start.call(&mut *store, ()),
        }
    }
}

/// A clean `proc_exit` from the provider's `_initialize` would end the run
/// before the guest starts; report it as a fault instead of a normal return.
fn early_exit(err: wasmtime::Error) -> wasmtime::Error {
    match err.downcast_ref::<wasmtime_wasi::I32Exit>() {
        Some(exit) if exit.0 == 0 => wasmtime::Error::msg(format!(
            "provider `{}` exited before the guest started",
            INITIALIZE_EXPORT
        )),
        _ => err,
    }
}

/// Why a run ended in `Faulted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The sandbox trapped
    Trap(String),
    /// The guest called `proc_exit` with a non-zero status
    Exit(i32),
    /// The execution deadline expired
    Timeout {
        /// Configured deadline
        timeout_ms: u64,
    },
}

impl Fault {
    /// Classify an error returned by an entry function. `None` means the
    /// guest exited cleanly with status 0.
    fn from_error(err: wasmtime::Error, timeout_ms: u64) -> Option<Self> {
        if let Some(exit) = err.downcast_ref::<wasmtime_wasi::I32Exit>() {
            return (exit.0 != 0).then_some(Fault::Exit(exit.0));
        }

        match err.downcast_ref::<Trap>() {
            Some(Trap::Interrupt) if timeout_ms > 0 => Some(Fault::Timeout { timeout_ms }),
            Some(trap) => Some(Fault::Trap(format!("wasm trap: {}", trap))),
            None => Some(Fault::Trap(format!("{:#}", err))),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Trap(message) => f.write_str(message),
            Fault::Exit(code) => write!(f, "exit status {}", code),
            Fault::Timeout { timeout_ms } => write!(f, "deadline of {} ms exceeded", timeout_ms),
        }
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Control returned to the host without a fault
    Finished,
    /// The run faulted
    Faulted(Fault),
}

/// Observable state of a [`Runner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Instances created, nothing executed
    Linked,
    /// An entry function is executing
    Running,
    /// Terminal: returned normally
    Finished,
    /// Terminal: trapped, exited non-zero or timed out
    Faulted,
}

/// Outcome of a run with timing information.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Execution time in microseconds
    pub execution_time_us: u64,
    /// Fuel consumed (if fuel metering enabled)
    pub fuel_consumed: Option<u64>,
}

/// Drives a linked pair through its entry convention exactly once.
pub struct Runner {
    linked: LinkedPair,
    state: RunState,
}

impl Runner {
    /// Wrap a freshly linked pair.
    pub fn new(linked: LinkedPair) -> Self {
        Self {
            linked,
            state: RunState::Linked,
        }
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Execute the entry point. A runner runs at most once and never retries.
    pub fn run(&mut self) -> Result<RunReport> {
        if self.state != RunState::Linked {
            return Err(BridgeError::Engine(format!(
                "runner already used (state {:?})",
                self.state
            )));
        }

        self.state = RunState::Running;
        let convention = self.linked.entry.convention();
        tracing::debug!(%convention, "running guest");

        let store = &mut self.linked.store;
        let start = Instant::now();
        let fuel_before = store.get_fuel().ok();

        let result = self.linked.entry.execute(store);

        let fuel_after = store.get_fuel().ok();
        let fuel_consumed = fuel_before.zip(fuel_after).map(|(b, a)| b - a);
        let execution_time_us = start.elapsed().as_micros() as u64;

        let outcome = match result {
            Ok(()) => RunOutcome::Finished,
            Err(err) => match Fault::from_error(err, self.linked.timeout_ms) {
                None => RunOutcome::Finished,
                Some(fault) => RunOutcome::Faulted(fault),
            },
        };

        self.state = match outcome {
            RunOutcome::Finished => RunState::Finished,
            RunOutcome::Faulted(_) => RunState::Faulted,
        };
        tracing::debug!(state = ?self.state, execution_time_us, "guest returned");

        Ok(RunReport {
            outcome,
            execution_time_us,
            fuel_consumed,
        })
    }

    /// Give back the linked pair, e.g. to inspect provider memory.
    pub fn into_linked(self) -> LinkedPair {
        self.linked
    }
}
