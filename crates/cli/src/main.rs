//! Memory system simulator CLI.
//!
//! This binary drives the coherence engine from the command line. It provides:
//! 1. **Run:** Build a hierarchy from a JSON configuration, replay an access trace, and print statistics.
//! 2. **Check:** Validate a configuration and print the resolved hierarchy.
//!
//! Log verbosity follows `RUST_LOG`; `--verbose` raises the default to `debug`.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use memsys_core::common::{AccessKind, ConfigError, SimError};
use memsys_core::config::{self, Config, ModuleKind};
use memsys_core::stats::STATS_SECTIONS;
use memsys_core::System;

#[derive(Parser, Debug)]
#[command(
    name = "memsim",
    author,
    version,
    about = "Directory-based MOESI memory hierarchy simulator",
    long_about = "Replay a load/store trace through a cache hierarchy described in JSON.\n\nTrace lines are `<cycle> <module> <load|store> <hex addr>`; `#` starts a comment.\n\nExamples:\n  memsim run --config hier.json --trace accesses.trc\n  memsim run --config hier.json --trace accesses.trc --stats summary,modules\n  memsim check --config hier.json"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a trace and print statistics.
    Run {
        /// Hierarchy configuration (JSON).
        #[arg(short, long)]
        config: PathBuf,

        /// Access trace.
        #[arg(short, long)]
        trace: PathBuf,

        /// Give up after this many cycles.
        #[arg(long, default_value_t = 10_000_000)]
        max_cycles: u64,

        /// Statistics sections to print (comma separated; default all).
        #[arg(long, value_delimiter = ',')]
        stats: Vec<String>,

        /// Log every protocol stage.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a configuration and print the resolved hierarchy.
    Check {
        /// Hierarchy configuration (JSON).
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("cannot read trace {path}: {source}")]
    TraceIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("trace line {line}: {reason}")]
    Trace { line: usize, reason: String },

    #[error("unknown stats section '{0}' (expected one of {sections})", sections = STATS_SECTIONS.join(", "))]
    Section(String),
}

/// One trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TraceLine {
    line: usize,
    cycle: u64,
    module: String,
    kind: AccessKind,
    addr: u64,
}

fn main() {
    let cli = Cli::parse();
    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    init_logging(verbose);

    let result = match cli.command {
        Commands::Run {
            config,
            trace,
            max_cycles,
            stats,
            verbose: _,
        } => cmd_run(&config, &trace, max_cycles, &stats),
        Commands::Check { config } => cmd_check(&config),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Parses a trace, reporting the first malformed line by number.
fn parse_trace(text: &str) -> Result<Vec<TraceLine>, CliError> {
    let mut out = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let body = raw.split('#').next().unwrap_or_default().trim();
        if body.is_empty() {
            continue;
        }
        let bad = |reason: &str| CliError::Trace {
            line,
            reason: reason.to_owned(),
        };
        let fields: Vec<&str> = body.split_whitespace().collect();
        let [cycle, module, kind, addr] = fields[..] else {
            return Err(bad("expected `<cycle> <module> <load|store> <hex addr>`"));
        };
        let cycle = cycle.parse().map_err(|_| bad("cycle is not a number"))?;
        let kind = match kind.to_ascii_lowercase().as_str() {
            "load" => AccessKind::Load,
            "store" => AccessKind::Store,
            _ => return Err(bad("access must be `load` or `store`")),
        };
        let digits = addr.trim_start_matches("0x").trim_start_matches("0X");
        let addr = u64::from_str_radix(digits, 16).map_err(|_| bad("address is not hexadecimal"))?;
        out.push(TraceLine {
            line,
            cycle,
            module: module.to_owned(),
            kind,
            addr,
        });
    }
    Ok(out)
}

fn cmd_run(config_path: &Path, trace_path: &Path, max_cycles: u64, sections: &[String]) -> Result<(), CliError> {
    if let Some(bad) = sections.iter().find(|s| !STATS_SECTIONS.contains(&s.as_str())) {
        return Err(CliError::Section(bad.clone()));
    }
    let config = Config::from_file(config_path)?;
    let mut system = System::new(&config)?;

    let text = std::fs::read_to_string(trace_path).map_err(|source| CliError::TraceIo {
        path: trace_path.to_path_buf(),
        source,
    })?;
    let trace = parse_trace(&text)?;
    for rec in &trace {
        let Some(module) = system.module_id(&rec.module) else {
            return Err(CliError::Trace {
                line: rec.line,
                reason: format!("unknown module '{}'", rec.module),
            });
        };
        let _ = system.access_after(module, rec.kind, rec.addr, rec.cycle);
    }
    tracing::info!(accesses = trace.len(), "trace loaded");

    let cycles = system.run_until_idle(max_cycles)?;
    tracing::info!(cycles, "simulation drained");
    system.stats().print_sections(sections);
    Ok(())
}

fn cmd_check(config_path: &Path) -> Result<(), CliError> {
    let config = Config::from_file(config_path)?;
    let _ = System::new(&config)?;

    println!("Configuration OK: {}", config_path.display());
    println!();
    println!("Networks:");
    for net in &config.networks {
        println!(
            "  {:<16} latency {:>3}  bandwidth {:>4} B/cyc  buffer {:>5} B  nodes [{}]",
            net.name,
            net.latency,
            net.bandwidth,
            net.buffer_size,
            config::network_members(&config, &net.name).join(", ")
        );
    }
    println!();
    println!("Modules:");
    for m in &config.modules {
        let kind = match m.kind {
            ModuleKind::Cache => "cache",
            ModuleKind::MainMemory => "memory",
        };
        println!(
            "  {:<16} {:<6} {:>5} sets x {:>2} ways x {:>4} B  latency {:>3}  ports {}  {}",
            m.name, kind, m.sets, m.assoc, m.block_size, m.latency, m.num_ports, m.policy
        );
        if !m.low_modules.is_empty() {
            println!(
                "  {:<16} -> [{}] via {}",
                "",
                m.low_modules.join(", "),
                m.low_network.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
