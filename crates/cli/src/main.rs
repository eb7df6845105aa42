mod runner;

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use ulpsim_config::{AccessScript, BoardDescriptor};
use ulpsim_core::metrics::AccessMetrics;
use ulpsim_core::peripherals::{DeviceHooks, ProcessExit};
use ulpsim_core::Machine;

#[derive(Parser, Debug)]
#[command(author, version, about = "ULPSim i.MX8ULP M33 peripheral simulator", long_about = None)]
struct Args {
    /// Boot argument file with fuse and boot strap settings (default: run.arg)
    #[arg(short, long)]
    boot_args: Option<PathBuf>,

    /// Built-in board name (imx8ulp-m33, mysoc_evb) or board descriptor (YAML);
    /// imx8ulp-m33 is used otherwise
    #[arg(long)]
    board: Option<PathBuf>,

    /// CPU to run; must match the board's CPU
    #[arg(long)]
    cpu: Option<String>,

    /// Access script (YAML) to drive the devices
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Write the device snapshot (JSON) here when done
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Write the run result (JSON) here when done
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not echo debug print output to stdout
    #[arg(long)]
    no_debug_stdout: bool,

    /// Enable register-level access tracing
    #[arg(short, long)]
    trace: bool,
}

fn resolve(base: Option<&Path>, p: &str) -> PathBuf {
    let path = PathBuf::from(p);
    match base {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

/// A built-in board name, or a path to a board descriptor.
fn load_board(arg: &Path) -> anyhow::Result<BoardDescriptor> {
    if let Some(board) = arg.to_str().and_then(BoardDescriptor::builtin) {
        return Ok(board);
    }
    info!("Loading board descriptor: {:?}", arg);
    BoardDescriptor::from_file(arg)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    info!("Starting ULPSim");

    let script = match &args.script {
        Some(path) => Some(AccessScript::from_file(path)?),
        None => None,
    };
    let script_dir = args.script.as_deref().and_then(Path::parent);

    let boot_args_path = match (&args.boot_args, &script) {
        (Some(p), _) => p.clone(),
        (None, Some(s)) => resolve(script_dir, &s.inputs.boot_args),
        (None, None) => PathBuf::from(ulpsim_loader::DEFAULT_BOOT_ARGS),
    };
    let provisioning = ulpsim_loader::load_boot_args(&boot_args_path)?;
    let boot_args_hash = runner::sha256_file(&boot_args_path)?;

    let board = match (&args.board, &script) {
        (Some(p), _) => load_board(p)?,
        (None, Some(s)) => match s.inputs.board.as_deref() {
            Some(b) => match BoardDescriptor::builtin(b) {
                Some(board) => board,
                None => load_board(&resolve(script_dir, b))?,
            },
            None => BoardDescriptor::imx8ulp_m33(),
        },
        (None, None) => BoardDescriptor::imx8ulp_m33(),
    };
    info!("Board '{}' ({})", board.name, board.cpu);

    let capture = Arc::new(Mutex::new(runner::DebugTee::new(!args.no_debug_stdout)));
    let hooks = DeviceHooks {
        debug_output: capture.clone(),
        reset: Arc::new(ProcessExit),
    };
    let cpu = args.cpu.as_deref().unwrap_or(&board.cpu);
    let mut machine = Machine::with_cpu(&board, cpu, &provisioning, hooks)?;
    let metrics = Arc::new(AccessMetrics::new());
    machine.observers.push(metrics.clone());

    info!("Board '{}' ready", board.name);

    let mut failures = Vec::new();
    if let Some(script) = &script {
        failures.extend(runner::run_steps(&mut machine, &script.steps));
        let captured = capture
            .lock()
            .map(|t| t.captured())
            .unwrap_or_default();
        failures.extend(runner::check_assertions(
            &script.assertions,
            &captured,
            &provisioning,
        ));
    }

    let accesses = metrics.summary();
    info!(
        "Accesses: {} reads, {} writes ({:.0}/s)",
        accesses.reads, accesses.writes, accesses.rate
    );

    if let Some(path) = &args.snapshot {
        let snapshot = machine.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write snapshot to {:?}", path))?;
        info!("Snapshot written to {:?}", path);
    }

    if let Some(path) = &args.output {
        let captured = capture
            .lock()
            .map(|t| t.captured())
            .unwrap_or_default();
        let result = runner::RunResult {
            status: if failures.is_empty() { "pass" } else { "fail" }.to_string(),
            board: board.name.clone(),
            boot_args: boot_args_path.display().to_string(),
            boot_args_sha256: boot_args_hash,
            accesses,
            debug_output: captured,
            failures: failures.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("Failed to write result to {:?}", path))?;
    }

    if !failures.is_empty() {
        for f in &failures {
            tracing::error!("{}", f);
        }
        anyhow::bail!("{} check(s) failed", failures.len());
    }

    info!("Run finished");
    Ok(())
}
