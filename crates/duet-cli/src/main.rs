//! duet command-line interface
//!
//! Runs a guest WebAssembly module linked against a provider module:
//! - `run` feeds a JSON value on the guest's stdin and prints its decoded output
//! - `inspect` lists module imports and exports and checks that the pair links
//!
//! Failures are printed as `<kind>: <message>` on stderr, with an exit status
//! per error kind.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duet_bridge::{
    BinaryModule, Bridge, BridgeConfig, BridgeError, DecodedValue, ErrorKind, LatencyStats,
};
use serde_json::Value;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "duet")]
#[command(author, version, about = "Run provider/guest WebAssembly pairs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a guest module against a provider module
    Run {
        /// Provider module (binary or text format)
        #[arg(short, long, default_value = "provider.wasm")]
        provider: PathBuf,

        /// Guest module
        #[arg(short, long)]
        guest: PathBuf,

        /// Input value as JSON (default: read from stdin when piped, else null)
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// Read the input value from a JSON file
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Bridge configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for channel files (default: system temp dir)
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Execution deadline in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Fuel limit
        #[arg(long)]
        fuel: Option<u64>,

        /// Import namespace the guest uses for the provider
        #[arg(long)]
        namespace: Option<String>,

        /// Environment variable for the sandbox (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,

        /// Run the invocation this many times and report latency
        #[arg(long, default_value = "1")]
        repeat: u32,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,

        /// Arguments passed to the sandbox
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Show imports, exports and the entry convention of a module pair
    Inspect {
        /// Provider module
        #[arg(short, long, default_value = "provider.wasm")]
        provider: PathBuf,

        /// Guest module
        #[arg(short, long)]
        guest: PathBuf,

        /// Import namespace the guest uses for the provider
        #[arg(long)]
        namespace: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            provider,
            guest,
            input,
            input_file,
            config,
            work_dir,
            timeout_ms,
            fuel,
            namespace,
            env,
            repeat,
            pretty,
            args,
        } => {
            let mut config = match config {
                Some(path) => BridgeConfig::load(&path)
                    .with_context(|| format!("failed to load config {}", path.display()))?,
                None => BridgeConfig::default(),
            };
            if let Some(dir) = work_dir {
                config = config.work_dir(dir);
            }
            if let Some(ms) = timeout_ms {
                config = config.timeout_ms(ms);
            }
            if let Some(fuel) = fuel {
                config = config.fuel_limit(fuel);
            }
            if let Some(namespace) = namespace {
                config = config.namespace(namespace);
            }
            config.capabilities.env_vars.extend(env);
            config.capabilities.args.extend(args);

            let input = read_input(input, input_file)?;
            cmd_run(config, provider, guest, input, repeat, pretty)
        }

        Commands::Inspect {
            provider,
            guest,
            namespace,
        } => {
            let mut config = BridgeConfig::default();
            if let Some(namespace) = namespace {
                config = config.namespace(namespace);
            }
            cmd_inspect(config, provider, guest)
        }
    }
}

fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn read_input(input: Option<String>, input_file: Option<PathBuf>) -> Result<Value> {
    let text = match (input, input_file) {
        (Some(text), _) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read input file {}", path.display()))?,
        (None, None) if !std::io::stdin().is_terminal() => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read input from stdin")?;
            text
        }
        (None, None) => return Ok(Value::Null),
    };

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).context("input is not valid JSON")
}

/// Exit status for each error kind.
fn exit_status(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Application => 1,
        ErrorKind::SandboxFault => 2,
        ErrorKind::Timeout => 3,
        ErrorKind::Link => 4,
        ErrorKind::InvalidModule => 5,
        ErrorKind::Channel | ErrorKind::Io => 6,
        ErrorKind::Engine | ErrorKind::Config => 7,
    }
}

fn report(err: &BridgeError) -> ExitCode {
    eprintln!("{}: {}", err.kind(), err);
    ExitCode::from(exit_status(err.kind()))
}

fn load_pair(
    bridge: &Bridge,
    provider: &Path,
    guest: &Path,
) -> duet_bridge::Result<(BinaryModule, BinaryModule)> {
    let provider = bridge.runtime().load_module(provider)?;
    let guest = bridge.runtime().load_module(guest)?;
    Ok((provider, guest))
}

fn cmd_run(
    config: BridgeConfig,
    provider: PathBuf,
    guest: PathBuf,
    input: Value,
    repeat: u32,
    pretty: bool,
) -> Result<ExitCode> {
    debug!(?config, "bridge configuration");
    let bridge = match Bridge::new(config) {
        Ok(bridge) => bridge,
        Err(e) => return Ok(report(&e)),
    };
    let (provider, guest) = match load_pair(&bridge, &provider, &guest) {
        Ok(pair) => pair,
        Err(e) => return Ok(report(&e)),
    };

    let mut stats = LatencyStats::new();
    let mut last = None;
    for _ in 0..repeat.max(1) {
        match bridge.invoke(&provider, &guest, &input) {
            Ok(result) => {
                stats.record(result.execution_time_us);
                if let Some(fuel) = result.fuel_consumed {
                    info!(fuel, "fuel consumed");
                }
                last = Some(result.value);
            }
            Err(e) => return Ok(report(&e)),
        }
    }

    if repeat > 1 {
        if let Some(summary) = stats.summary() {
            eprintln!("{}", summary);
        }
    }

    if let Some(value) = last {
        print_value(value, pretty)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn print_value(value: DecodedValue, pretty: bool) -> Result<()> {
    let json = value.into_json();
    let text = if pretty {
        serde_json::to_string_pretty(&json)?
    } else {
        serde_json::to_string(&json)?
    };
    println!("{}", text);
    Ok(())
}

fn cmd_inspect(config: BridgeConfig, provider: PathBuf, guest: PathBuf) -> Result<ExitCode> {
    let bridge = match Bridge::new(config) {
        Ok(bridge) => bridge,
        Err(e) => return Ok(report(&e)),
    };
    let (provider, guest) = match load_pair(&bridge, &provider, &guest) {
        Ok(pair) => pair,
        Err(e) => return Ok(report(&e)),
    };

    println!("Provider: {}", provider.name());
    println!("  exports: {}", provider.exports().collect::<Vec<_>>().join(", "));

    println!("Guest: {}", guest.name());
    for import in guest.imports() {
        println!("  import {}::{} ({})", import.namespace, import.name, import.kind);
    }
    println!("  exports: {}", guest.exports().collect::<Vec<_>>().join(", "));

    let spec = bridge.link_spec();
    println!("Namespace: {}", spec.namespace());
    match spec.validate(&provider, &guest) {
        Ok(convention) => {
            println!("Convention: {}", convention);
            println!("Link: ok");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("Link: failed");
            Ok(report(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("MODE=fast").unwrap(),
            ("MODE".to_string(), "fast".to_string())
        );
        assert_eq!(parse_env("EMPTY=").unwrap(), ("EMPTY".to_string(), String::new()));
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_read_input_inline() {
        let value = read_input(Some(r#"{"n": 100}"#.to_string()), None).unwrap();
        assert_eq!(value, serde_json::json!({"n": 100}));
        assert!(read_input(Some("{oops".to_string()), None).is_err());
        assert_eq!(read_input(Some("  ".to_string()), None).unwrap(), Value::Null);
    }

    #[test]
    fn test_exit_status_distinct_for_sandbox_outcomes() {
        let codes = [
            exit_status(ErrorKind::Application),
            exit_status(ErrorKind::SandboxFault),
            exit_status(ErrorKind::Timeout),
            exit_status(ErrorKind::Link),
            exit_status(ErrorKind::InvalidModule),
        ];
        for (i, a) in codes.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "duet", "-vv", "run", "--guest", "script.wasm", "--input", "1", "--env", "A=b",
            "--repeat", "3", "--", "x", "y",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run {
                provider,
                env,
                repeat,
                args,
                ..
            } => {
                assert_eq!(provider, PathBuf::from("provider.wasm"));
                assert_eq!(env, vec![("A".to_string(), "b".to_string())]);
                assert_eq!(repeat, 3);
                assert_eq!(args, vec!["x".to_string(), "y".to_string()]);
            }
            Commands::Inspect { .. } => panic!("expected run"),
        }
    }
}
