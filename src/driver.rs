//! Top-level orchestration: wires the parser, symbol table, file manager and
//! logger together, drives `validate` to a fixed point, then runs the single
//! `encode` pass and the optional `.sym`/`.sym2`/`.temp` side outputs.

use std::path::{Path, PathBuf};

use crate::command::{self, Context, EncodeSink};
use crate::error::{Error, Result};
use crate::expression::Arena;
use crate::file_manager::FileManager;
use crate::lexer::Lexer;
use crate::logging::Logger;
use crate::parser;
use crate::symbol_table::SymbolTable;
use crate::symdata;
use crate::token::Token;

/// Matches the original tool's validation-pass cap: a script whose size
/// keeps oscillating past this many passes is considered non-convergent
/// rather than looped forever.
const MAX_VALIDATION_PASSES: usize = 100;

/// One preloaded `-equ`/`-strequ` definition, applied before the first pass.
pub struct Equation {
    pub name: String,
    pub value: String,
    /// `-strequ`: wrap `value` as a quoted string literal instead of lexing
    /// it as a raw expression.
    pub quoted: bool,
}

/// Everything the CLI's flags configure for one [`run`].
#[derive(Default)]
pub struct AssembleOptions {
    pub root_dir: Option<PathBuf>,
    pub temp_path: Option<PathBuf>,
    pub sym_path: Option<PathBuf>,
    pub sym2_path: Option<PathBuf>,
    pub error_on_warning: bool,
    pub silent: bool,
    pub equations: Vec<Equation>,
}

/// Outcome of one assemble run: whether it failed, and every diagnostic
/// produced, already formatted in report order.
pub struct AssembleReport {
    pub success: bool,
    pub messages: Vec<String>,
}

fn preload_tokens(eq: &Equation) -> Result<Vec<Token>> {
    if eq.quoted {
        let escaped = eq.value.replace('\\', "\\\\").replace('"', "\\\"");
        Lexer::tokenize(&format!("\"{escaped}\""))
    } else {
        Lexer::tokenize(&eq.value)
    }
}

fn make_context<'a>(
    symbols: &'a mut SymbolTable,
    files: &'a mut FileManager,
    arena: &'a mut Arena,
    logger: &'a mut Logger,
    root_dir: &'a PathBuf,
    output_name: &str,
    sink: Option<&'a mut EncodeSink>,
) -> Context<'a> {
    Context {
        symbols,
        files,
        arena,
        logger,
        root_dir,
        output_name: output_name.to_string(),
        headersize: 0,
        is_arm: false,
        is_thumb: false,
        in_unknown_block: false,
        sink,
        defined_this_pass: std::collections::HashSet::new(),
    }
}

/// Assembles `input_file`, writing whatever output files the source script
/// itself opens via `.open`/`.create`/`.openbin`, plus the side outputs
/// named in `options`.
pub fn run(input_file: &Path, options: AssembleOptions) -> Result<AssembleReport> {
    let root_dir = options
        .root_dir
        .clone()
        .or_else(|| input_file.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let source = std::fs::read_to_string(input_file)
        .map_err(|e| Error::ReadError { path: input_file.display().to_string(), reason: e.to_string() })?;

    let mut arena = Arena::new();
    let mut symbols = SymbolTable::new();
    let mut logger = Logger::new(options.silent, options.error_on_warning);

    for eq in &options.equations {
        let tokens = preload_tokens(eq)?;
        symbols.define_equation(&eq.name, tokens)?;
    }

    let mut next_file_num = 0u32;
    let (mut root, mips_delay_states) =
        parser::parse_source(&mut arena, &mut symbols, &mut logger, root_dir.clone(), &source, &mut next_file_num, true)?;

    let output_name = input_file.display().to_string();
    let mut files = FileManager::new();
    let mut pass = 0usize;
    loop {
        pass += 1;
        if pass > MAX_VALIDATION_PASSES {
            return Err(Error::ValidationDidNotConverge);
        }
        // Each pass simulates program order from a clean slate: a hazard
        // left pending at the end of pass N must not leak into pass N+1.
        for state in &mips_delay_states {
            state.reset();
        }
        files = FileManager::new();
        let mut ctx = make_context(&mut symbols, &mut files, &mut arena, &mut logger, &root_dir, &output_name, None);
        let changed = command::validate(&mut root, &mut ctx)?;
        logger.flush_pass();
        if logger.had_fatal() {
            return Ok(AssembleReport { success: false, messages: logger.formatted_errors() });
        }
        if !changed {
            break;
        }
    }

    if logger.has_errors() {
        return Ok(AssembleReport { success: false, messages: logger.formatted_errors() });
    }

    // `encode` re-opens every `.open`/`.create`/`.close` exactly as the last
    // validate pass did, except this time the buffers it builds receive the
    // real encoded bytes, so it needs its own fresh `FileManager` too.
    let wants_side_output = options.temp_path.is_some() || options.sym_path.is_some() || options.sym2_path.is_some();
    let mut files = FileManager::new();
    let mut sink = EncodeSink::default();
    {
        let sink_arg = if wants_side_output { Some(&mut sink) } else { None };
        let mut ctx = make_context(&mut symbols, &mut files, &mut arena, &mut logger, &root_dir, &output_name, sink_arg);
        command::encode(&mut root, &mut ctx)?;
    }
    while files.has_active() {
        files.close_active()?;
    }

    if logger.has_errors() {
        return Ok(AssembleReport { success: false, messages: logger.formatted_errors() });
    }

    if let Some(path) = &options.temp_path {
        symdata::write_temp_listing(path, &sink)?;
    }
    if let Some(path) = &options.sym_path {
        symdata::write_sym_file(path, &symbols, &sink, false)?;
    }
    if let Some(path) = &options.sym2_path {
        symdata::write_sym_file(path, &symbols, &sink, true)?;
    }

    Ok(AssembleReport { success: true, messages: logger.formatted_errors() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn assembles_a_trivial_script() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("out.bin");
        let src = format!(".create \"{}\", 0\n.byte 1, 2, 3\n.close\n", out_path.display());
        let input = write_source(dir.path(), "main.asm", &src);
        let report = run(&input, AssembleOptions::default()).unwrap();
        assert!(report.success, "{:?}", report.messages);
        assert_eq!(std::fs::read(&out_path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn unknown_directive_is_reported_and_fails_the_run() {
        let dir = tempdir().unwrap();
        let src = ".bogus 1, 2, 3\n".to_string();
        let input = write_source(dir.path(), "main.asm", &src);
        let report = run(&input, AssembleOptions::default()).unwrap();
        assert!(!report.success);
        assert!(report.messages.iter().any(|m| m.contains("bogus")));
    }

    #[test]
    fn preloaded_equation_is_visible_to_the_script() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("out.bin");
        let src = format!(".create \"{}\", 0\n.word VALUE\n", out_path.display());
        let input = write_source(dir.path(), "main.asm", &src);
        let options = AssembleOptions {
            equations: vec![Equation { name: "VALUE".to_string(), value: "42".to_string(), quoted: false }],
            ..Default::default()
        };
        let report = run(&input, options).unwrap();
        assert!(report.success, "{:?}", report.messages);
        assert_eq!(std::fs::read(&out_path).unwrap(), 42i32.to_le_bytes());
    }
}
