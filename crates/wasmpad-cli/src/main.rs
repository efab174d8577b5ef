//! wasmpad Command-Line Interface
//!
//! This CLI provides tools for:
//! - Compiling Swift source to a WASI module through the Swift wasm SDK
//! - Running compiled modules in the sandboxed execution host
//! - Inspecting the installed toolchain
//!
//! Toolchain and sandbox settings come from `--config <FILE>` (JSON).

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::PlaygroundConfig;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use wasmpad_compiler::{
    decode_artifact, encode_artifact, ApiResponse, CompileRequest, Compiler, Playground,
};
use wasmpad_sandbox::{InputSource, NoInput, OutputSink, RunReport, StdinInput, WasmSandbox};

#[derive(Parser)]
#[command(name = "wasmpad")]
#[command(author, version, about = "Swift-to-WebAssembly playground CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a Swift source file to a WASI module
    Compile {
        /// Swift source file
        source: PathBuf,

        /// Output module (defaults to the source path with a .wasm extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the compile endpoint's JSON reply instead of writing a file
        #[arg(long)]
        json: bool,
    },

    /// Run a compiled module
    Run {
        /// Module file (binary or text format)
        wasm: PathBuf,

        /// The file holds base64 text, as sent by the compile endpoint
        #[arg(long)]
        base64: bool,

        /// Do not forward this terminal's stdin to the guest
        #[arg(long)]
        no_stdin: bool,
    },

    /// Compile a Swift source file and run it
    Exec {
        /// Swift source file
        source: PathBuf,

        /// Do not forward this terminal's stdin to the guest
        #[arg(long)]
        no_stdin: bool,
    },

    /// Print the health check reply
    Health,

    /// Probe the toolchain version and installed SDKs
    Debug,

    /// Print the raw `swift sdk list` result
    Sdks,
}

/// Guest stdin as chosen on the command line.
enum GuestInput {
    Terminal(StdinInput),
    Closed(NoInput),
}

impl GuestInput {
    fn new(no_stdin: bool) -> Self {
        if no_stdin {
            Self::Closed(NoInput)
        } else {
            Self::Terminal(StdinInput)
        }
    }
}

impl InputSource for GuestInput {
    fn read_line(&mut self) -> Option<String> {
        match self {
            Self::Terminal(input) => input.read_line(),
            Self::Closed(input) => input.read_line(),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("Failed to start async runtime")
}

fn playground(config: &PlaygroundConfig) -> Playground {
    let playground = Playground::new(Compiler::new(config.compiler.clone()));
    match config.artifact_store() {
        Some(store) => playground.with_artifact_store(store),
        None => playground,
    }
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read source file {:?}", path))
}

fn print_json(response: &ApiResponse) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_slice(&response.body).context("Endpoint returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Print whatever the sink gained since `printed` bytes were shown.
fn echo_new_output(out: &mut impl Write, snapshot: &str, printed: usize) -> Result<usize> {
    // A shorter snapshot means the sink was reset for a new run.
    let start = if snapshot.len() < printed { 0 } else { printed };
    out.write_all(snapshot[start..].as_bytes())?;
    out.flush()?;
    Ok(snapshot.len())
}

/// Run `binary`, streaming guest output to stdout while it runs.
async fn run_streaming(
    sandbox: WasmSandbox,
    binary: Vec<u8>,
    input: GuestInput,
) -> Result<RunReport> {
    let sink = OutputSink::new();
    let mut updates = sink.subscribe();
    let guest_sink = sink.clone();
    let mut guest =
        tokio::task::spawn_blocking(move || sandbox.run(&binary, &guest_sink, input));

    let mut stdout = std::io::stdout();
    let mut printed = 0;
    let joined = loop {
        tokio::select! {
            joined = &mut guest => break joined,
            changed = updates.changed() => {
                if changed.is_ok() {
                    let snapshot = updates.borrow_and_update().clone();
                    printed = echo_new_output(&mut stdout, &snapshot, printed)?;
                }
            }
        }
    };
    echo_new_output(&mut stdout, &sink.snapshot(), printed)?;

    let report = joined.context("Guest thread panicked")??;
    info!(
        "Guest finished with exit code {} in {} us",
        report.exit_code, report.execution_time_us
    );
    if let Some(fuel) = report.fuel_consumed {
        info!("Fuel consumed: {}", fuel);
    }
    Ok(report)
}

fn exit_with(report: &RunReport) -> Result<()> {
    if !report.success() {
        std::io::stdout().flush()?;
        std::process::exit(report.exit_code);
    }
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_compile(
    config: &PlaygroundConfig,
    source: PathBuf,
    output: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let code = read_source(&source)?;
    let playground = playground(config);
    let rt = runtime()?;

    if json {
        let body = serde_json::to_vec(&CompileRequest { code })?;
        let response = rt.block_on(playground.compile(&body));
        return print_json(&response);
    }

    info!("Compiling {:?}", source);
    let result = rt.block_on(playground.compiler().compile(&code));
    let Some(artifact) = result.binary_artifact() else {
        eprintln!("{}", result.diagnostic_text());
        anyhow::bail!(
            "Compilation failed: {}",
            result.error_message().unwrap_or_default()
        );
    };

    let output = output.unwrap_or_else(|| source.with_extension("wasm"));
    std::fs::write(&output, artifact)
        .with_context(|| format!("Failed to write output file {:?}", output))?;
    println!("{} ({} bytes) -> {:?}", result.diagnostic_text(), artifact.len(), output);
    Ok(())
}

fn cmd_run(config: &PlaygroundConfig, wasm: PathBuf, base64: bool, no_stdin: bool) -> Result<()> {
    let bytes = std::fs::read(&wasm).with_context(|| format!("Failed to read module {:?}", wasm))?;
    let binary = if base64 {
        let text = String::from_utf8(bytes).context("Base64 module is not valid UTF-8")?;
        decode_artifact(&text)?
    } else {
        bytes
    };

    let sandbox = WasmSandbox::new(config.sandbox.clone())?;
    let report = runtime()?.block_on(run_streaming(sandbox, binary, GuestInput::new(no_stdin)))?;
    exit_with(&report)
}

fn cmd_exec(config: &PlaygroundConfig, source: PathBuf, no_stdin: bool) -> Result<()> {
    let code = read_source(&source)?;
    let rt = runtime()?;
    let compiler = Compiler::new(config.compiler.clone());

    info!("Compiling {:?}", source);
    let result = rt.block_on(compiler.compile(&code));
    let Some(artifact) = result.binary_artifact() else {
        eprintln!("{}", result.diagnostic_text());
        anyhow::bail!(
            "Compilation failed: {}",
            result.error_message().unwrap_or_default()
        );
    };

    // Same path a browser client takes: base64 over the wire, decoded to run.
    let binary = decode_artifact(&encode_artifact(artifact))?;
    info!("Running {} byte module", binary.len());

    let sandbox = WasmSandbox::new(config.sandbox.clone())?;
    let report = rt.block_on(run_streaming(sandbox, binary, GuestInput::new(no_stdin)))?;
    exit_with(&report)
}

fn cmd_health(config: &PlaygroundConfig) -> Result<()> {
    print_json(&playground(config).health())
}

fn cmd_debug(config: &PlaygroundConfig) -> Result<()> {
    let playground = playground(config);
    let response = runtime()?.block_on(playground.debug());
    print_json(&response)
}

fn cmd_sdks(config: &PlaygroundConfig) -> Result<()> {
    let playground = playground(config);
    let response = runtime()?.block_on(playground.test_sdk());
    print_json(&response)
}

fn main() -> Result<()> {
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

    let config = PlaygroundConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Compile {
            source,
            output,
            json,
        } => cmd_compile(&config, source, output, json),

        Commands::Run {
            wasm,
            base64,
            no_stdin,
        } => cmd_run(&config, wasm, base64, no_stdin),

        Commands::Exec { source, no_stdin } => cmd_exec(&config, source, no_stdin),

        Commands::Health => cmd_health(&config),

        Commands::Debug => cmd_debug(&config),

        Commands::Sdks => cmd_sdks(&config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_prints_only_new_output() {
        let mut out = Vec::new();
        let printed = echo_new_output(&mut out, "hel", 0).unwrap();
        let printed = echo_new_output(&mut out, "hello\n", printed).unwrap();
        let printed = echo_new_output(&mut out, "hello\n", printed).unwrap();
        assert_eq!(printed, 6);
        assert_eq!(out, b"hello\n");
    }

    #[test]
    fn test_echo_after_reset() {
        let mut out = Vec::new();
        let printed = echo_new_output(&mut out, "first run\n", 0).unwrap();
        echo_new_output(&mut out, "2\n", printed).unwrap();
        assert_eq!(out, b"first run\n2\n");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["wasmpad", "-vv", "run", "main.wasm", "--no-stdin"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Commands::Run { no_stdin: true, base64: false, .. }
        ));

        let cli = Cli::try_parse_from(["wasmpad", "compile", "main.swift", "--json", "--config", "c.json"])
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("c.json")));
        assert!(matches!(cli.command, Commands::Compile { json: true, output: None, .. }));
    }

    #[tokio::test]
    async fn test_run_streaming_returns_report() {
        let wat = r#"(module
            (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
            (memory (export "memory") 1)
            (func (export "_start") (call $exit (i32.const 0))))"#;
        let sandbox = WasmSandbox::new(Default::default()).unwrap();
        let report = run_streaming(sandbox, wat.as_bytes().to_vec(), GuestInput::new(true))
            .await
            .unwrap();
        assert!(report.exited);
        assert_eq!(report.exit_code, 0);
    }
}
