//! CLI entry point: parses flags, assembles the named source file, and
//! exits 0 on success or 1 if any error was reported.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use retroasm::driver::{self, AssembleOptions, Equation};

/// A multi-architecture retargetable assembler for MIPS (PSX/PS2/PSP/N64/RSP)
/// and ARM (including THUMB) targets.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source file to assemble.
    input: PathBuf,

    /// Writes a temp listing (address, disassembly, source line) here.
    #[arg(long)]
    temp: Option<PathBuf>,

    /// Writes a no$ v1 symbol file here.
    #[arg(long)]
    sym: Option<PathBuf>,

    /// Writes a no$ v2 symbol file (function sizes included) here.
    #[arg(long)]
    sym2: Option<PathBuf>,

    /// Changes to this directory before resolving any relative path the
    /// source references (`.include`, `.incbin`, `.open`, ...).
    #[arg(long)]
    root: Option<PathBuf>,

    /// Preloads an equation as `NAME=VALUE`, lexed as an expression.
    #[arg(long = "equ", value_name = "NAME=VALUE")]
    equ: Vec<String>,

    /// Preloads an equation as `NAME=VALUE`, taken as a literal string.
    #[arg(long = "strequ", value_name = "NAME=VALUE")]
    strequ: Vec<String>,

    /// Promotes warnings to errors.
    #[arg(long)]
    error_on_warning: bool,
}

fn split_equ(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=').map(|(n, v)| (n.to_string(), v.to_string())).ok_or_else(|| format!("expected NAME=VALUE, found \"{raw}\""))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut equations = Vec::new();
    for raw in &cli.equ {
        match split_equ(raw) {
            Ok((name, value)) => equations.push(Equation { name, value, quoted: false }),
            Err(msg) => {
                eprintln!("error: {msg}");
                return ExitCode::FAILURE;
            }
        }
    }
    for raw in &cli.strequ {
        match split_equ(raw) {
            Ok((name, value)) => equations.push(Equation { name, value, quoted: true }),
            Err(msg) => {
                eprintln!("error: {msg}");
                return ExitCode::FAILURE;
            }
        }
    }

    let options = AssembleOptions {
        root_dir: cli.root,
        temp_path: cli.temp,
        sym_path: cli.sym,
        sym2_path: cli.sym2,
        error_on_warning: cli.error_on_warning,
        silent: false,
        equations,
    };

    match driver::run(&cli.input, options) {
        Ok(report) if report.success => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
