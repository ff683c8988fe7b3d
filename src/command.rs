//! The parsed program, represented as a tree of nodes that know how to
//! validate their own size, then encode themselves once sizes have
//! stabilized.
//!
//! Every concrete command is wrapped in a [`Node`] that carries the file and
//! line it was parsed from, so diagnostics raised during validate or encode
//! can always be attributed back to source. Composite variants (sequences,
//! areas, conditionals) hold child `Node`s rather than bare `Command`s so a
//! child's settled size survives unchanged between passes that don't touch
//! it.

use std::collections::HashSet;
use std::fmt;

use crate::arch::Instruction;
use crate::byte_array::Endianness;
use crate::error::{Error, FileLine, Result, Severity};
use crate::expression::{self, Arena, EvalEnv, ExprRef, Value};
use crate::file_manager::{AssemblerFile, FileManager, GenericFile, OpenMode};
use crate::logging::Logger;
use crate::symbol_table::SymbolTable;

/// The data-mode tag `.byte`/`.half`/`.word`/`.dword`/`.float`/`.double`/
/// `.ascii`/`.sjis` entries encode into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    U8,
    U16,
    U32,
    U64,
    Float,
    Double,
    Ascii,
    Sjis,
    Custom,
}

/// One `.byte`/`.ascii`/… entry: either an expression or a raw string
/// literal (kept separate from `Value::Str` so `.ascii "a", 10, "b"` mixes
/// freely).
#[derive(Debug, Clone)]
pub enum DataEntry {
    Expr(ExprRef),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    Physical,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignFillKind {
    Align,
    Fill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Warning,
    Error,
    Notice,
}

#[derive(Debug, Clone)]
pub enum FileOp {
    Open { path: String, header: ExprRef },
    Create { path: String, header: ExprRef },
    OpenCopy { input: String, output: String, header: ExprRef },
    Close,
}

/// The closed set of command variants.
pub enum Command {
    /// A no-op placeholder that still carries file/line info, substituted
    /// for commands built inside a known-false conditional branch so
    /// side-effect ordering is preserved but size counts as zero.
    Dummy,
    /// A syntactically recovered error; contributes no bytes.
    Invalid,
    Label { name: String, file: u32, section: u32, value_expr: Option<ExprRef> },
    CommandSequence(Vec<Node>),
    Area { body: Box<Node>, size_expr: ExprRef, fill_expr: Option<ExprRef> },
    Conditional { expr: ExprRef, if_body: Box<Node>, else_body: Option<Box<Node>>, last_truth: Option<bool> },
    Data { mode: DataMode, entries: Vec<DataEntry>, terminate: bool },
    File(FileOp),
    Position { kind: PositionKind, expr: ExprRef },
    Incbin { path: String, start: Option<ExprRef>, size: Option<ExprRef> },
    AlignFill { kind: AlignFillKind, value_expr: ExprRef, fill_expr: Option<ExprRef> },
    Skip(ExprRef),
    HeaderSize(ExprRef),
    Message { severity: MessageSeverity, expr: ExprRef },
    SymEnable(bool),
    ArchSwitch { endianness: Endianness },
    ArmStateMarker { thumb: bool },
    /// Backend-owned opcode or pseudo-instruction; see [`crate::arch`].
    Instr(Box<dyn Instruction>),
    /// A `.function`/`.endfunction` body: behaves exactly like a
    /// `CommandSequence`, `name` is retained only for diagnostics and
    /// symbol-file attribution.
    Function { name: String, body: Box<Node> },
    /// A linked ELF32 object's relocated contents; see [`crate::elf`].
    ElfImport(Box<dyn Instruction>),
    /// A PSX `.obj`/`.lib` member's relocated contents; see [`crate::psx`].
    PsxObjImport(Box<dyn Instruction>),
    /// `.pool`: flushes a literal pool's pending `ldr Rn, =value` entries at
    /// the current (already word-aligned) address.
    ArmPool(crate::arch::arm::pool::SharedPool),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Dummy => write!(f, "Dummy"),
            Command::Invalid => write!(f, "Invalid"),
            Command::Label { name, .. } => write!(f, "Label({name})"),
            Command::CommandSequence(v) => write!(f, "CommandSequence({} commands)", v.len()),
            Command::Area { .. } => write!(f, "Area"),
            Command::Conditional { .. } => write!(f, "Conditional"),
            Command::Data { mode, entries, .. } => write!(f, "Data({mode:?}, {} entries)", entries.len()),
            Command::File(op) => write!(f, "File({op:?})"),
            Command::Position { kind, .. } => write!(f, "Position({kind:?})"),
            Command::Incbin { path, .. } => write!(f, "Incbin({path})"),
            Command::AlignFill { kind, .. } => write!(f, "AlignFill({kind:?})"),
            Command::Skip(_) => write!(f, "Skip"),
            Command::HeaderSize(_) => write!(f, "HeaderSize"),
            Command::Message { severity, .. } => write!(f, "Message({severity:?})"),
            Command::SymEnable(v) => write!(f, "SymEnable({v})"),
            Command::ArchSwitch { .. } => write!(f, "ArchSwitch"),
            Command::ArmStateMarker { thumb } => write!(f, "ArmStateMarker({thumb})"),
            Command::Instr(i) => write!(f, "Instr({})", i.mnemonic()),
            Command::Function { name, .. } => write!(f, "Function({name})"),
            Command::ElfImport(i) => write!(f, "ElfImport({})", i.mnemonic()),
            Command::PsxObjImport(i) => write!(f, "PsxObjImport({})", i.mnemonic()),
            Command::ArmPool(_) => write!(f, "ArmPool"),
        }
    }
}

/// One tree node plus the file/line every command carries for diagnostics,
/// and the size `validate` settles on.
pub struct Node {
    pub command: Command,
    pub location: FileLine,
    pub size: i64,
}

impl Node {
    pub fn new(command: Command, location: FileLine) -> Self {
        Node { command, location, size: 0 }
    }
}

/// One opcode/object-import leaf's address and text, recorded during
/// `encode` for the temp listing.
pub struct ListingRecord {
    pub address: i64,
    pub text: String,
    pub location: FileLine,
}

/// One `.byte`/`.half`/`.word`/`.ascii` run's address and byte length,
/// recorded during `encode` for the symbol file's `.byt:NNNN`-style markers.
pub struct DataRegionRecord {
    pub address: i64,
    pub tag: &'static str,
    pub len: i64,
}

/// Where `encode` reports the listing/data-region records a symbol-file or
/// temp-listing writer needs; addresses come straight from `ctx.files`, so
/// they reflect real `.org`/multi-file positioning instead of a flat sum of
/// node sizes.
#[derive(Default)]
pub struct EncodeSink {
    pub listing: Vec<ListingRecord>,
    pub data_regions: Vec<DataRegionRecord>,
}

/// Everything `validate`/`encode` need beyond the node itself.
pub struct Context<'a> {
    pub symbols: &'a mut SymbolTable,
    pub files: &'a mut FileManager,
    pub arena: &'a mut Arena,
    pub logger: &'a mut Logger,
    pub root_dir: &'a std::path::PathBuf,
    pub output_name: String,
    pub headersize: i64,
    pub is_arm: bool,
    pub is_thumb: bool,
    pub in_unknown_block: bool,
    /// Only populated for the final `encode` pass that a driver asks to
    /// also produce a listing/symbol file.
    pub sink: Option<&'a mut EncodeSink>,
    /// Label indices already bound this pass, so a second `Command::Label`
    /// resolving to the same slot is a genuine redefinition rather than the
    /// same node being revisited on the next fixed-point pass.
    pub defined_this_pass: HashSet<usize>,
}

impl Context<'_> {
    fn eval_env(&self) -> EvalEnv<'_> {
        EvalEnv {
            memory_pos: self.files.virtual_address(),
            org: self.files.virtual_address(),
            orga: self.files.physical_address(),
            headersize: self.headersize,
            endianness_name: if self.files.endianness() == Endianness::Big { "big" } else { "little" },
            output_name: self.output_name.clone(),
            is_arm: self.is_arm,
            is_thumb: self.is_thumb,
            root_dir: self.root_dir,
            in_unknown_block: self.in_unknown_block,
        }
    }

    fn eval(&mut self, expr: ExprRef) -> Value {
        expression::simplify(self.arena, expr, &self.eval_env(), self.symbols, self.in_unknown_block);
        expression::evaluate(self.arena, expr, &self.eval_env(), self.symbols)
    }

    fn eval_i64(&mut self, expr: ExprRef) -> i64 {
        self.eval(expr).as_i64().unwrap_or(0)
    }
}

/// `validate`: updates `node.size` and any internal state, returns whether
/// anything observable changed this pass.
pub fn validate(node: &mut Node, ctx: &mut Context) -> Result<bool> {
    let changed = match &mut node.command {
        Command::Dummy | Command::Invalid => {
            node.size = 0;
            false
        }
        Command::Label { name, file, section, value_expr } => {
            let value = match value_expr {
                Some(expr) => ctx.eval_i64(*expr),
                None => ctx.files.virtual_address(),
            };
            let idx = ctx.symbols.get_label(name, *file, *section)?;
            if !ctx.defined_this_pass.insert(idx) {
                return Err(Error::DuplicateLabel { name: name.clone() });
            }
            let label = ctx.symbols.label_mut(idx);
            let changed = !label.defined || label.value != value;
            label.value = value;
            label.defined = true;
            node.size = 0;
            changed
        }
        Command::CommandSequence(children) => {
            let mut changed = false;
            let mut total = 0i64;
            for child in children.iter_mut() {
                changed |= validate(child, ctx)?;
                total += child.size;
            }
            node.size = total;
            changed
        }
        Command::Area { body, size_expr, fill_expr } => {
            let declared = ctx.eval_i64(*size_expr);
            let body_changed = validate(body, ctx)?;
            let used = body.size;
            if used > declared {
                return Err(Error::AreaOverflow { used, declared });
            }
            let total = if fill_expr.is_some() { declared } else { used };
            let changed = body_changed || total != node.size;
            node.size = total;
            changed
        }
        Command::Conditional { expr, if_body, else_body, last_truth } => {
            let truth = ctx.eval(*expr).is_truthy();
            let (inner_changed, size) = if truth {
                (validate(if_body, ctx)?, if_body.size)
            } else if let Some(else_body) = else_body {
                (validate(else_body, ctx)?, else_body.size)
            } else {
                (false, 0)
            };
            node.size = size;
            let switched = *last_truth != Some(truth);
            *last_truth = Some(truth);
            inner_changed || switched
        }
        Command::Data { mode, entries, terminate } => {
            let size = data_size(*mode, entries, *terminate);
            let changed = size != node.size;
            node.size = size;
            changed
        }
        Command::File(op) => {
            validate_file_op(op, ctx)?;
            node.size = 0;
            false
        }
        Command::Position { kind, expr } => {
            let addr = ctx.eval_i64(*expr);
            match kind {
                PositionKind::Physical => ctx.files.active_mut()?.seek_physical(addr),
                PositionKind::Virtual => ctx.files.active_mut()?.seek_virtual(addr),
            }
            node.size = 0;
            false
        }
        Command::Incbin { path, start, size } => {
            let resolved_size = match size {
                Some(expr) => ctx.eval_i64(*expr),
                None => {
                    let full = std::fs::metadata(ctx.root_dir.join(&path)).map(|m| m.len() as i64).unwrap_or(0);
                    let skip = start.map(|e| ctx.eval_i64(e)).unwrap_or(0);
                    full - skip
                }
            };
            let changed = resolved_size != node.size;
            node.size = resolved_size;
            changed
        }
        Command::AlignFill { kind, value_expr, fill_expr } => {
            let value = ctx.eval_i64(*value_expr);
            let size = match kind {
                AlignFillKind::Fill => value,
                AlignFillKind::Align => {
                    if value == 0 {
                        0
                    } else if value < 0 || value & (value - 1) != 0 {
                        return Err(Error::AlignNotPowerOfTwo { value });
                    } else {
                        let pos = ctx.files.virtual_address();
                        let rem = pos.rem_euclid(value);
                        if rem == 0 { 0 } else { value - rem }
                    }
                }
            };
            let _ = fill_expr;
            let changed = size != node.size;
            node.size = size;
            changed
        }
        Command::Skip(expr) => {
            let n = ctx.eval_i64(*expr);
            let changed = n != node.size;
            node.size = n;
            changed
        }
        Command::HeaderSize(expr) => {
            let n = ctx.eval_i64(*expr);
            if let Ok(file) = ctx.files.active_mut() {
                file.set_header_size(n);
            }
            ctx.headersize = n;
            node.size = 0;
            false
        }
        Command::Message { severity, expr } => {
            let value = ctx.eval(*expr);
            let sev = match severity {
                MessageSeverity::Warning => Severity::Warning,
                MessageSeverity::Error => Severity::Error,
                MessageSeverity::Notice => Severity::Notice,
            };
            ctx.logger.queue(sev, value_to_display(&value), Some(node.location));
            node.size = 0;
            false
        }
        Command::SymEnable(_) => {
            node.size = 0;
            false
        }
        Command::ArmStateMarker { thumb } => {
            ctx.is_thumb = *thumb;
            node.size = 0;
            false
        }
        Command::ArchSwitch { endianness } => {
            ctx.files.set_endianness(*endianness);
            node.size = 0;
            false
        }
        Command::Instr(instr) | Command::ElfImport(instr) | Command::PsxObjImport(instr) => {
            let env = ctx.eval_env();
            let changed = instr.validate(&env, ctx.symbols, ctx.arena)?;
            node.size = instr.size();
            changed
        }
        Command::Function { body, .. } => {
            let changed = validate(body, ctx)?;
            node.size = body.size;
            changed
        }
        Command::ArmPool(pool) => {
            let was_flushed = pool.is_flushed();
            let env = ctx.eval_env();
            pool.flush(ctx.files.virtual_address(), ctx.arena, &env, ctx.symbols)?;
            let size = pool.flushed_bytes().len() as i64;
            let changed = !was_flushed || size != node.size;
            node.size = size;
            changed
        }
    };
    Ok(changed)
}

/// `encode`: writes this node's settled bytes to the active output file.
/// Must be called only after every node in the tree has stopped reporting
/// `changed` from [`validate`].
pub fn encode(node: &mut Node, ctx: &mut Context) -> Result<()> {
    match &mut node.command {
        Command::Dummy
        | Command::Invalid
        | Command::Label { .. }
        | Command::Position { .. }
        | Command::HeaderSize(_)
        | Command::Message { .. }
        | Command::SymEnable(_) => {}
        Command::File(op) => {
            // Re-run open/create/copy/close for real: `validate` only
            // established sizes, so the in-memory buffer it built for this
            // file never received any encoded bytes.
            validate_file_op(op, ctx)?;
        }
        Command::CommandSequence(children) => {
            for child in children.iter_mut() {
                encode(child, ctx)?;
            }
        }
        Command::Area { body, fill_expr, .. } => {
            let declared = node.size;
            encode(body, ctx)?;
            let used = body.size;
            if let Some(fill) = fill_expr {
                let byte = (ctx.eval_i64(*fill) & 0xFF) as u8;
                let pad = declared - used;
                if pad > 0 {
                    ctx.files.write_bytes(&vec![byte; pad as usize])?;
                }
            }
        }
        Command::Conditional { last_truth, if_body, else_body, .. } => {
            if *last_truth == Some(true) {
                encode(if_body, ctx)?;
            } else if let Some(else_body) = else_body {
                encode(else_body, ctx)?;
            }
        }
        Command::Data { mode, entries, terminate } => {
            if node.size > 0 {
                if let Some(sink) = ctx.sink.as_mut() {
                    sink.data_regions.push(DataRegionRecord { address: ctx.files.virtual_address(), tag: data_region_tag(*mode), len: node.size });
                }
            }
            encode_data(*mode, entries, *terminate, ctx)?;
        }
        Command::Incbin { path, start, size } => {
            let bytes = std::fs::read(ctx.root_dir.join(path.as_str()))
                .map_err(|e| Error::ReadError { path: path.clone(), reason: e.to_string() })?;
            let skip = start.map(|e| ctx.eval_i64(e)).unwrap_or(0).max(0) as usize;
            let len = size.map(|e| ctx.eval_i64(e)).map(|n| n.max(0) as usize).unwrap_or(bytes.len().saturating_sub(skip));
            let end = (skip + len).min(bytes.len());
            ctx.files.write_bytes(bytes.get(skip..end).unwrap_or(&[]))?;
        }
        Command::AlignFill { fill_expr, .. } => {
            let byte = fill_expr.map(|e| (ctx.eval_i64(e) & 0xFF) as u8).unwrap_or(0);
            if node.size > 0 {
                ctx.files.write_bytes(&vec![byte; node.size as usize])?;
            }
        }
        Command::Skip(_) => {
            if node.size > 0 {
                ctx.files.write_bytes(&vec![0u8; node.size as usize])?;
            }
        }
        Command::ArchSwitch { endianness } => {
            ctx.files.set_endianness(*endianness);
        }
        Command::ArmStateMarker { thumb } => {
            ctx.is_thumb = *thumb;
        }
        Command::Instr(instr) | Command::ElfImport(instr) | Command::PsxObjImport(instr) => {
            let env = ctx.eval_env();
            let bytes = instr.encode(&env, ctx.symbols, ctx.arena)?;
            if let Some(sink) = ctx.sink.as_mut() {
                sink.listing.push(ListingRecord { address: ctx.files.virtual_address(), text: instr.mnemonic().to_string(), location: node.location });
            }
            ctx.files.write_bytes(&bytes)?;
        }
        Command::Function { body, .. } => {
            encode(body, ctx)?;
        }
        Command::ArmPool(pool) => {
            ctx.files.write_bytes(&pool.flushed_bytes())?;
        }
    }
    Ok(())
}

fn encode_data(mode: DataMode, entries: &[DataEntry], terminate: bool, ctx: &mut Context) -> Result<()> {
    for entry in entries {
        match entry {
            DataEntry::Expr(expr) => {
                let value = ctx.eval(*expr);
                match mode {
                    DataMode::U8 | DataMode::Ascii | DataMode::Sjis | DataMode::Custom => {
                        ctx.files.write_bytes(&[(value.as_i64().unwrap_or(0) & 0xFF) as u8])?;
                    }
                    DataMode::U16 => ctx.files.write_u16(value.as_i64().unwrap_or(0) as u16)?,
                    DataMode::U32 => ctx.files.write_u32(value.as_i64().unwrap_or(0) as u32)?,
                    DataMode::Float => ctx.files.write_u32((value.as_f64().unwrap_or(0.0) as f32).to_bits())?,
                    DataMode::U64 => ctx.files.write_u64(value.as_i64().unwrap_or(0) as u64)?,
                    DataMode::Double => ctx.files.write_u64(value.as_f64().unwrap_or(0.0).to_bits())?,
                }
            }
            DataEntry::Str(s) => match mode {
                DataMode::Sjis => {
                    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(s);
                    ctx.files.write_bytes(&encoded)?;
                }
                DataMode::Ascii | DataMode::Custom => {
                    ctx.files.write_bytes(s.as_bytes())?;
                }
                _ => ctx.files.write_bytes(s.as_bytes())?,
            },
        }
    }
    if terminate {
        ctx.files.write_bytes(&[0])?;
    }
    Ok(())
}

fn data_size(mode: DataMode, entries: &[DataEntry], terminate: bool) -> i64 {
    let unit = match mode {
        DataMode::U8 | DataMode::Ascii | DataMode::Sjis | DataMode::Custom => 1,
        DataMode::U16 => 2,
        DataMode::U32 | DataMode::Float => 4,
        DataMode::U64 | DataMode::Double => 8,
    };
    let mut total = 0i64;
    for entry in entries {
        total += match entry {
            DataEntry::Expr(_) => unit,
            DataEntry::Str(s) => match mode {
                DataMode::Ascii | DataMode::Sjis | DataMode::Custom => s.chars().count() as i64,
                _ => unit,
            },
        };
    }
    if terminate {
        total += 1;
    }
    total
}

fn data_region_tag(mode: DataMode) -> &'static str {
    match mode {
        DataMode::U8 | DataMode::Sjis | DataMode::Custom => ".byt",
        DataMode::U16 => ".wrd",
        DataMode::U32 | DataMode::Float | DataMode::U64 | DataMode::Double => ".dbl",
        DataMode::Ascii => ".asc",
    }
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => s.clone(),
        Value::Invalid => "undef".to_string(),
    }
}

fn validate_file_op(op: &FileOp, ctx: &mut Context) -> Result<()> {
    match op {
        FileOp::Open { path, header } => {
            let header = ctx.eval_i64(*header);
            let file = GenericFile::open(ctx.root_dir.join(path), OpenMode::Open, header, None)?;
            ctx.files.push(AssemblerFile::Generic(file));
        }
        FileOp::Create { path, header } => {
            let header = ctx.eval_i64(*header);
            let file = GenericFile::open(ctx.root_dir.join(path), OpenMode::Create, header, None)?;
            ctx.files.push(AssemblerFile::Generic(file));
        }
        FileOp::OpenCopy { input, output, header } => {
            let header = ctx.eval_i64(*header);
            let file = GenericFile::open(ctx.root_dir.join(output), OpenMode::Copy, header, Some(&ctx.root_dir.join(input)))?;
            ctx.files.push(AssemblerFile::Generic(file));
        }
        FileOp::Close => {
            ctx.files.close_active()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::token_stream::TokenStream;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn const_expr(arena: &mut Arena, src: &str) -> ExprRef {
        let tokens = Lexer::tokenize(src).unwrap();
        let mut stream = TokenStream::new(tokens);
        let equs = HashMap::new();
        expression::parse(&mut stream, &equs, arena, 0, 0).unwrap()
    }

    fn ctx<'a>(
        symbols: &'a mut SymbolTable,
        files: &'a mut FileManager,
        arena: &'a mut Arena,
        logger: &'a mut Logger,
        root: &'a PathBuf,
    ) -> Context<'a> {
        Context {
            symbols,
            files,
            arena,
            logger,
            root_dir: root,
            output_name: "out.bin".to_string(),
            headersize: 0,
            is_arm: false,
            is_thumb: false,
            in_unknown_block: false,
            sink: None,
            defined_this_pass: HashSet::new(),
        }
    }

    #[test]
    fn label_first_validate_reports_changed() {
        let mut symbols = SymbolTable::new();
        let mut files = FileManager::new();
        let dir = tempfile::tempdir().unwrap();
        files.push(AssemblerFile::Generic(GenericFile::open(dir.path().join("a.bin"), OpenMode::Create, 0, None).unwrap()));
        let mut arena = Arena::new();
        let mut logger = Logger::new(true, false);
        let root = dir.path().to_path_buf();
        let mut c = ctx(&mut symbols, &mut files, &mut arena, &mut logger, &root);
        let mut node = Node::new(Command::Label { name: "start".to_string(), file: 0, section: 0, value_expr: None }, FileLine::default());
        assert!(validate(&mut node, &mut c).unwrap());
        // A fresh pass gets a fresh `defined_this_pass`, so revisiting the
        // same label node on pass two is not a redefinition.
        c.defined_this_pass.clear();
        assert!(!validate(&mut node, &mut c).unwrap());
    }

    #[test]
    fn redefining_a_label_within_the_same_pass_is_an_error() {
        let mut symbols = SymbolTable::new();
        let mut files = FileManager::new();
        let dir = tempfile::tempdir().unwrap();
        files.push(AssemblerFile::Generic(GenericFile::open(dir.path().join("a.bin"), OpenMode::Create, 0, None).unwrap()));
        let mut arena = Arena::new();
        let mut logger = Logger::new(true, false);
        let root = dir.path().to_path_buf();
        let mut c = ctx(&mut symbols, &mut files, &mut arena, &mut logger, &root);
        let mut first = Node::new(Command::Label { name: "start".to_string(), file: 0, section: 0, value_expr: None }, FileLine::default());
        let mut second = Node::new(Command::Label { name: "start".to_string(), file: 0, section: 0, value_expr: None }, FileLine::default());
        validate(&mut first, &mut c).unwrap();
        assert!(validate(&mut second, &mut c).is_err());
    }

    #[test]
    fn align_fill_size_tracks_current_position() {
        let mut symbols = SymbolTable::new();
        let mut files = FileManager::new();
        let dir = tempfile::tempdir().unwrap();
        let mut file = GenericFile::open(dir.path().join("a.bin"), OpenMode::Create, 0, None).unwrap();
        file.seek_physical(1);
        files.push(AssemblerFile::Generic(file));
        let mut arena = Arena::new();
        let root = dir.path().to_path_buf();
        let value_expr = const_expr(&mut arena, "4");
        let mut logger = Logger::new(true, false);
        let mut c = ctx(&mut symbols, &mut files, &mut arena, &mut logger, &root);
        let mut node = Node::new(
            Command::AlignFill { kind: AlignFillKind::Align, value_expr, fill_expr: None },
            FileLine::default(),
        );
        node.size = -1;
        validate(&mut node, &mut c).unwrap();
        assert_eq!(node.size, 3);
    }

    #[test]
    fn align_zero_is_a_no_op() {
        let mut symbols = SymbolTable::new();
        let mut files = FileManager::new();
        let dir = tempfile::tempdir().unwrap();
        let mut file = GenericFile::open(dir.path().join("a.bin"), OpenMode::Create, 0, None).unwrap();
        file.seek_physical(1);
        files.push(AssemblerFile::Generic(file));
        let mut arena = Arena::new();
        let root = dir.path().to_path_buf();
        let value_expr = const_expr(&mut arena, "0");
        let mut logger = Logger::new(true, false);
        let mut c = ctx(&mut symbols, &mut files, &mut arena, &mut logger, &root);
        let mut node = Node::new(Command::AlignFill { kind: AlignFillKind::Align, value_expr, fill_expr: None }, FileLine::default());
        validate(&mut node, &mut c).unwrap();
        assert_eq!(node.size, 0);
    }

    #[test]
    fn area_overflow_is_an_error() {
        let mut symbols = SymbolTable::new();
        let mut files = FileManager::new();
        let dir = tempfile::tempdir().unwrap();
        files.push(AssemblerFile::Generic(GenericFile::open(dir.path().join("a.bin"), OpenMode::Create, 0, None).unwrap()));
        let mut arena = Arena::new();
        let root = dir.path().to_path_buf();
        let size_expr = const_expr(&mut arena, "1");
        let mut logger = Logger::new(true, false);
        let mut c = ctx(&mut symbols, &mut files, &mut arena, &mut logger, &root);
        let body = Box::new(Node::new(
            Command::Data { mode: DataMode::U8, entries: vec![DataEntry::Expr(size_expr), DataEntry::Expr(size_expr)], terminate: false },
            FileLine::default(),
        ));
        let mut node = Node::new(Command::Area { body, size_expr, fill_expr: None }, FileLine::default());
        assert!(validate(&mut node, &mut c).is_err());
    }

    #[test]
    fn command_sequence_size_is_sum_of_children() {
        let mut symbols = SymbolTable::new();
        let mut files = FileManager::new();
        let dir = tempfile::tempdir().unwrap();
        files.push(AssemblerFile::Generic(GenericFile::open(dir.path().join("a.bin"), OpenMode::Create, 0, None).unwrap()));
        let mut arena = Arena::new();
        let root = dir.path().to_path_buf();
        let a = const_expr(&mut arena, "1");
        let b = const_expr(&mut arena, "2");
        let mut logger = Logger::new(true, false);
        let mut c = ctx(&mut symbols, &mut files, &mut arena, &mut logger, &root);
        let children = vec![
            Node::new(Command::Data { mode: DataMode::U32, entries: vec![DataEntry::Expr(a)], terminate: false }, FileLine::default()),
            Node::new(Command::Data { mode: DataMode::U8, entries: vec![DataEntry::Expr(b), DataEntry::Expr(b)], terminate: false }, FileLine::default()),
        ];
        let mut node = Node::new(Command::CommandSequence(children), FileLine::default());
        validate(&mut node, &mut c).unwrap();
        assert_eq!(node.size, 6);
    }
}
