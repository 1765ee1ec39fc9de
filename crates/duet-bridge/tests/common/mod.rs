//! Shared fixtures: the test provider and a builder for guest modules.

#![allow(dead_code)]

use std::fmt::Write as _;
use std::path::Path;

use duet_bridge::{BinaryModule, Bridge, BridgeConfig, DEFAULT_PROVIDER_NAMESPACE};

pub const PROVIDER_WAT: &str = include_str!("../fixtures/provider.wat");

/// Guest data segments are placed in provider memory from here on.
pub const DATA_BASE: usize = 65536;

pub const STDOUT: u32 = 1;
pub const STDERR: u32 = 2;

/// One step of a guest's `_start`.
#[derive(Debug, Clone)]
enum Step {
    Write(u32, Vec<u8>),
    Call(&'static str),
    Exit(i32),
}

/// Builds guest modules in the text format. Guests import the provider's
/// memory and helpers and place their output bytes with data segments.
#[derive(Debug, Clone)]
pub struct GuestBuilder {
    namespace: String,
    reactor: bool,
    start: bool,
    extra_imports: Vec<String>,
    steps: Vec<Step>,
}

impl GuestBuilder {
    /// A reactor guest (exports `_initialize` and `_start`).
    pub fn reactor() -> Self {
        Self {
            namespace: DEFAULT_PROVIDER_NAMESPACE.to_string(),
            reactor: true,
            start: true,
            extra_imports: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// A command guest (exports only `_start`).
    pub fn command() -> Self {
        Self {
            reactor: false,
            ..Self::reactor()
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn without_start(mut self) -> Self {
        self.start = false;
        self
    }

    /// Add a raw import line; `NS` is replaced with the namespace.
    pub fn import(mut self, line: &str) -> Self {
        self.extra_imports.push(line.to_string());
        self
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.steps.push(Step::Write(STDOUT, text.as_bytes().to_vec()));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.steps.push(Step::Write(STDERR, text.as_bytes().to_vec()));
        self
    }

    pub fn echo(mut self) -> Self {
        self.steps.push(Step::Call("echo"));
        self
    }

    pub fn require_initialized(mut self) -> Self {
        self.steps.push(Step::Call("require_initialized"));
        self
    }

    pub fn abort(mut self) -> Self {
        self.steps.push(Step::Call("abort"));
        self
    }

    pub fn spin(mut self) -> Self {
        self.steps.push(Step::Call("spin"));
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.steps.push(Step::Exit(code));
        self
    }

    pub fn wat(&self) -> String {
        let ns = &self.namespace;
        let mut wat = String::from("(module\n");
        let _ = writeln!(wat, r#"  (import "{ns}" "memory" (memory 1))"#);
        let _ = writeln!(wat, r#"  (import "{ns}" "write" (func $write (param i32 i32 i32)))"#);
        let _ = writeln!(wat, r#"  (import "{ns}" "exit" (func $exit (param i32)))"#);
        for name in ["echo", "require_initialized", "abort", "spin"] {
            let _ = writeln!(wat, r#"  (import "{ns}" "{name}" (func ${name}))"#);
        }
        for line in &self.extra_imports {
            let _ = writeln!(wat, "  {}", line.replace("NS", &format!("\"{ns}\"")));
        }

        let mut body = String::new();
        let mut offset = DATA_BASE;
        for step in &self.steps {
            match step {
                Step::Write(fd, bytes) => {
                    let _ = writeln!(wat, "  (data (i32.const {offset}) \"{}\")", escape(bytes));
                    let _ = writeln!(
                        body,
                        "    (call $write (i32.const {fd}) (i32.const {offset}) (i32.const {}))",
                        bytes.len()
                    );
                    offset += bytes.len();
                }
                Step::Call(name) => {
                    let _ = writeln!(body, "    (call ${name})");
                }
                Step::Exit(code) => {
                    let _ = writeln!(body, "    (call $exit (i32.const {code}))");
                }
            }
        }

        if self.reactor {
            wat.push_str("  (func (export \"_initialize\"))\n");
        }
        if self.start {
            let _ = write!(wat, "  (func (export \"_start\")\n{body}  )\n");
        }
        wat.push_str(")\n");
        wat
    }

    pub fn compile(&self, bridge: &Bridge, name: &str) -> BinaryModule {
        bridge
            .compile(name, self.wat().as_bytes())
            .expect("failed to compile guest")
    }
}

fn escape(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{:02x}", b)).collect()
}

pub fn provider(bridge: &Bridge) -> BinaryModule {
    bridge
        .compile("provider", PROVIDER_WAT.as_bytes())
        .expect("failed to compile provider")
}

const PROVIDER_INITIALIZE: &str = r#"(func (export "_initialize")
    (global.set $initialized (i32.const 1)))"#;

/// The test provider with its `_initialize` export replaced by `initialize`
/// (empty to drop the export).
pub fn provider_with_initialize(bridge: &Bridge, initialize: &str) -> BinaryModule {
    assert!(PROVIDER_WAT.contains(PROVIDER_INITIALIZE));
    let wat = PROVIDER_WAT.replace(PROVIDER_INITIALIZE, initialize);
    bridge
        .compile("provider", wat.as_bytes())
        .expect("failed to compile provider variant")
}

/// Bridge writing its channels into `work_dir`.
pub fn bridge_in(work_dir: &Path) -> Bridge {
    bridge_with(BridgeConfig::development(), work_dir)
}

pub fn bridge_with(config: BridgeConfig, work_dir: &Path) -> Bridge {
    Bridge::new(config.work_dir(work_dir)).expect("failed to create bridge")
}

/// Number of entries left in a directory.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).expect("read_dir failed").count()
}
