//! Recursive-descent statement parser: turns a token stream into the
//! `Command`/`Node` tree `command::validate`/`command::encode` walk.
//!
//! Expressions themselves are handled entirely by [`crate::expression`];
//! this module's job is the surrounding statement grammar -- labels, `equ`,
//! directives, and the two backend instruction grammars -- and building the
//! right `Operand`/`OpcodeRow` pairing for each parsed instruction.

pub mod directives;
pub mod macros;

use std::path::PathBuf;

use crate::arch::arm::encode as arm_encode;
use crate::arch::arm::pool::SharedPool;
use crate::arch::arm::registers::{self as arm_registers, Condition};
use crate::arch::mips::delay::SharedDelayState;
use crate::arch::mips::encode::{self as mips_encode, MipsInstruction, Operand as MipsOperand};
use crate::arch::mips::opcode::{self as mips_opcode, ArchSet, OperandKind as MipsOperandKind};
use crate::arch::mips::pseudo;
use crate::arch::mips::registers as mips_registers;
use crate::arch::ArchMode;
use crate::command::Command;
use crate::command::Node;
use crate::error::{Error, FileLine, Result};
use crate::expression::{self, Arena, EvalEnv, ExprRef, Value};
use crate::lexer::Lexer;
use crate::logging::Logger;
use crate::symbol_table::SymbolTable;
use crate::token::{Punct, Token, TokenKind};
use crate::token_stream::TokenStream;
use macros::MacroTable;

const BLOCK_TERMINATORS: &[&str] = &[".endarea", ".endif", ".elseif", ".else", ".endfunction", ".endmacro"];

/// One translation unit's parse state. A fresh `Parser` (sharing `arena`,
/// `symbols`, `logger`, and the `next_file_num` counter) is used per
/// `.include`d file so each gets its own `file_num`.
pub struct Parser<'a> {
    pub arena: &'a mut Arena,
    pub symbols: &'a mut SymbolTable,
    pub logger: &'a mut Logger,
    pub root_dir: PathBuf,
    pub macros: MacroTable,
    pub file_num: u32,
    pub next_file_num: &'a mut u32,
    pub section: u32,
    pub arch_mode: Option<ArchMode>,
    pub mips_arch: Option<ArchSet>,
    pub mips_delay: Option<SharedDelayState>,
    pub fix_load_delay: bool,
    pub arm_pool: Option<SharedPool>,
    pub include_depth: usize,
    /// Every distinct load-delay tracker handed out this translation unit
    /// (a fresh one is minted each time a PSX architecture is selected), so
    /// the driver can reset all of them before each fixed-point pass.
    pub all_delay_states: Vec<SharedDelayState>,
}

impl<'a> Parser<'a> {
    pub fn new(
        arena: &'a mut Arena,
        symbols: &'a mut SymbolTable,
        logger: &'a mut Logger,
        root_dir: PathBuf,
        next_file_num: &'a mut u32,
        fix_load_delay: bool,
    ) -> Self {
        let file_num = *next_file_num;
        *next_file_num += 1;
        Parser {
            arena,
            symbols,
            logger,
            root_dir,
            macros: MacroTable::new(),
            file_num,
            next_file_num,
            section: 0,
            arch_mode: None,
            mips_arch: None,
            mips_delay: None,
            fix_load_delay,
            arm_pool: None,
            include_depth: 0,
            all_delay_states: Vec::new(),
        }
    }

    /// Mints and records a fresh load-delay tracker, replacing whatever the
    /// current architecture selection had been using.
    pub fn new_mips_delay_state(&mut self) {
        let state = crate::arch::mips::delay::new_shared();
        self.all_delay_states.push(state.clone());
        self.mips_delay = Some(state);
    }

    fn peek(&self, stream: &mut TokenStream) -> Token {
        stream.resolve(self.symbols.equations()).clone()
    }

    fn eat(&mut self, stream: &mut TokenStream) -> Token {
        stream.eat(self.symbols.equations())
    }

    fn skip_to_separator(&mut self, stream: &mut TokenStream) {
        stream.skip_to_separator(self.symbols.equations());
    }

    fn skip_separators(&mut self, stream: &mut TokenStream) {
        while matches!(self.peek(stream).kind, TokenKind::Separator) {
            self.eat(stream);
        }
    }

    fn current_location(&mut self, stream: &mut TokenStream) -> FileLine {
        FileLine::new(self.file_num, self.peek(stream).line)
    }

    /// Directive/block-terminator name at the cursor, lowercased, if the
    /// current token is an identifier starting with `.`.
    fn peek_directive_name(&self, stream: &mut TokenStream) -> Option<String> {
        let tok = stream.resolve(self.symbols.equations()).clone();
        tok.identifier_text().filter(|s| s.starts_with('.')).map(|s| s.to_ascii_lowercase())
    }

    fn parse_expr_tokens(&mut self, tokens: &[Token]) -> Result<ExprRef> {
        let eof_line = tokens.last().map(|t| t.line).unwrap_or(0);
        let mut toks = tokens.to_vec();
        toks.push(Token::eof(eof_line));
        let mut local_stream = TokenStream::new(toks);
        expression::parse(&mut local_stream, self.symbols.equations(), self.arena, self.file_num, self.section)
    }

    /// Best-effort parse-time constant fold, used only to pick a
    /// pseudo-instruction's immediate-size arm; the real value is resolved
    /// again every validate pass.
    fn try_fold_now(&mut self, expr: ExprRef) -> Option<i64> {
        let env = EvalEnv {
            memory_pos: 0,
            org: 0,
            orga: 0,
            headersize: 0,
            endianness_name: "little",
            output_name: String::new(),
            is_arm: false,
            is_thumb: false,
            root_dir: &self.root_dir,
            in_unknown_block: true,
        };
        expression::simplify(self.arena, expr, &env, self.symbols, true);
        if expression::is_const_expression(self.arena, expr) {
            expression::evaluate(self.arena, expr, &env, self.symbols).as_i64()
        } else {
            None
        }
    }

    fn bump_section_if_global(&mut self, name: &str) {
        if !name.starts_with('@') {
            self.section += 1;
        }
    }

    fn collect_until_separator(&mut self, stream: &mut TokenStream) -> Vec<Token> {
        let mut out = Vec::new();
        loop {
            let tok = self.peek(stream);
            if matches!(tok.kind, TokenKind::Separator | TokenKind::Eof) {
                break;
            }
            out.push(self.eat(stream));
        }
        out
    }

    /// Parses every statement up to the next block terminator or EOF.
    pub fn parse_statements(&mut self, stream: &mut TokenStream) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_separators(stream);
            if stream.at_eof() {
                break;
            }
            if let Some(name) = self.peek_directive_name(stream) {
                if BLOCK_TERMINATORS.contains(&name.as_str()) {
                    break;
                }
            }
            match self.parse_statement(stream) {
                Ok(node) => nodes.push(node),
                Err(err) => {
                    let location = self.current_location(stream);
                    self.logger.error(&err, Some(location));
                    self.skip_to_separator(stream);
                    nodes.push(Node::new(Command::Invalid, location));
                }
            }
        }
        Ok(nodes)
    }

    pub fn parse_statement(&mut self, stream: &mut TokenStream) -> Result<Node> {
        let location = self.current_location(stream);

        if let Some(name) = self.try_parse_label(stream)? {
            return Ok(self.make_label_node(name, location));
        }
        if self.try_parse_equ(stream)? {
            self.skip_to_separator(stream);
            return Ok(Node::new(Command::Dummy, location));
        }

        let tok = self.peek(stream);
        if let Some(text) = tok.identifier_text() {
            let text = text.to_string();
            if text.starts_with('.') {
                return directives::parse_directive(self, stream, &text.to_ascii_lowercase(), location);
            }
            if self.macros.lookup(&text).is_some() {
                return self.parse_macro_call(stream, &text, location);
            }
            return match self.arch_mode {
                Some(ArchMode::Mips) => self.parse_mips_instruction(stream, location),
                Some(ArchMode::Arm) | Some(ArchMode::Thumb) => self.parse_arm_instruction(stream, location),
                None => Err(Error::NoArchitectureSelected),
            };
        }

        self.eat(stream);
        self.skip_to_separator(stream);
        Ok(Node::new(Command::Invalid, location))
    }

    /// `name:` or bare `name` at the start of a line (armips allows a label
    /// without a trailing colon when it's on its own line or followed by
    /// another statement keyword). We require the colon form except for
    /// local (`@@`) labels, which are conventionally colon-less.
    fn try_parse_label(&mut self, stream: &mut TokenStream) -> Result<Option<String>> {
        let first = self.peek(stream);
        let Some(name) = first.identifier_text().map(|s| s.to_string()) else {
            return Ok(None);
        };
        if name.starts_with('.') {
            return Ok(None);
        }
        let second = {
            let bookmark = stream.bookmark();
            self.eat(stream);
            let second = self.peek(stream);
            stream.restore(bookmark);
            second
        };
        if second.as_punct() == Some(Punct::Colon) {
            self.eat(stream); // name
            self.eat(stream); // colon
            return Ok(Some(name));
        }
        if name.starts_with("@@") && !matches!(second.kind, TokenKind::Equ) {
            self.eat(stream);
            return Ok(Some(name));
        }
        Ok(None)
    }

    fn make_label_node(&mut self, name: String, location: FileLine) -> Node {
        let section = self.section;
        self.bump_section_if_global(&name);
        Node::new(Command::Label { name, file: self.file_num, section, value_expr: None }, location)
    }

    /// `name equ value` -- defines a global substitution macro.
    fn try_parse_equ(&mut self, stream: &mut TokenStream) -> Result<bool> {
        let first = self.peek(stream);
        let Some(name) = first.identifier_text().map(|s| s.to_string()) else {
            return Ok(false);
        };
        let bookmark = stream.bookmark();
        self.eat(stream);
        let second = self.peek(stream);
        if !matches!(second.kind, TokenKind::Equ) {
            stream.restore(bookmark);
            return Ok(false);
        }
        self.eat(stream); // equ keyword
        let value_text = match self.peek(stream).kind {
            TokenKind::EquValue(s) => s,
            _ => String::new(),
        };
        self.eat(stream);
        let tokens = Lexer::tokenize(&value_text)?;
        self.symbols.define_equation(&name, tokens)?;
        Ok(true)
    }

    fn parse_macro_call(&mut self, stream: &mut TokenStream, name: &str, location: FileLine) -> Result<Node> {
        self.eat(stream);
        let def = self.macros.lookup(name).ok_or_else(|| Error::UnknownMacroOrInstruction { name: name.to_string() })?;
        let raw = self.collect_until_separator(stream);
        let groups = split_top_level_commas(&raw);

        let mut body_tokens = def.body.clone();
        body_tokens.push(Token::eof(location.line));
        let mut call_stream = TokenStream::new(body_tokens);
        for (i, param) in def.params.iter().enumerate() {
            let arg_tokens = groups.get(i).cloned().unwrap_or_default();
            call_stream.bind_local(param.clone(), arg_tokens);
        }

        // `@@`-local labels are already kept apart by bumping `self.section`
        // below, but a plain global label (`loop:`) ignores section entirely
        // (see `symbol_table::scope_key`), so two calls of the same macro
        // would otherwise both try to define the same symbol. Rename every
        // global label the body defines to a call-unique name before it's
        // parsed, both at its definition and every reference.
        let call_index = self.macros.next_call_index(name);
        for label in global_labels_defined_in(&def.body) {
            let renamed = format!("{name}_{label}_{call_index:08}");
            call_stream.bind_local(label.clone(), vec![Token::new(TokenKind::Identifier(renamed.clone()), location.line, 0, renamed)]);
        }

        let saved_section = self.section;
        self.section = self.next_macro_section();
        let nodes = self.parse_statements(&mut call_stream);
        self.section = saved_section;
        Ok(Node::new(Command::CommandSequence(nodes?), location))
    }

    fn next_macro_section(&mut self) -> u32 {
        self.section = self.section.wrapping_add(0x1000_0000);
        self.section
    }

    pub fn parse_include_file(&mut self, path: &str, location: FileLine) -> Result<Node> {
        const MAX_INCLUDE_DEPTH: usize = 32;
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(Error::IncludeTooDeep { max: MAX_INCLUDE_DEPTH });
        }
        let full_path = self.root_dir.join(path);
        let text = crate::text_file::TextFile::read(&full_path, None)
            .map_err(|e| Error::IncludeError(Box::new(e)))?;
        let tokens = Lexer::tokenize(&text.contents).map_err(|e| Error::IncludeError(Box::new(e)))?;
        let mut stream = TokenStream::new(tokens);

        let saved_file = self.file_num;
        self.file_num = *self.next_file_num;
        *self.next_file_num += 1;
        self.include_depth += 1;
        let result = self.parse_statements(&mut stream);
        self.include_depth -= 1;
        self.file_num = saved_file;

        Ok(Node::new(Command::CommandSequence(result?), location))
    }

    // -- MIPS instruction parsing -----------------------------------------

    fn parse_mips_instruction(&mut self, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
        let tok = self.eat(stream);
        let mnemonic = tok.identifier_text().map(|s| s.to_string()).ok_or(Error::NoArchitectureSelected)?;

        if let Some(template) = pseudo::lookup(&mnemonic) {
            return self.expand_pseudo_mips(stream, template, location);
        }

        let arch = self.mips_arch.unwrap_or(ArchSet::ALL);
        let rows = mips_opcode::candidates(&mnemonic, arch);
        if rows.is_empty() {
            return Err(Error::UnknownInstruction { name: mnemonic });
        }

        let raw = self.collect_until_separator(stream);
        let groups = split_top_level_commas(&raw);

        let mut last_err = Error::InvalidArgumentCount { found: groups.len(), expected: vec![] };
        for row in &rows {
            match self.build_mips_operands(row, &groups) {
                Ok(operands) => {
                    let instr = MipsInstruction::new(row, operands, self.mips_delay.clone(), self.fix_load_delay);
                    return Ok(Node::new(Command::Instr(Box::new(instr)), location));
                }
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn build_mips_operands(&mut self, row: &'static mips_opcode::OpcodeRow, groups: &[Vec<Token>]) -> Result<Vec<MipsOperand>> {
        let needs_addr_split = matches!(row.operands, [MipsOperandKind::Rt, MipsOperandKind::Imm16, MipsOperandKind::Rs]);
        let expected_groups = if needs_addr_split { row.operands.len() - 1 } else { row.operands.len() };
        if groups.len() != expected_groups {
            return Err(Error::InvalidArgumentCount { found: groups.len(), expected: vec![expected_groups] });
        }

        let mut flat: Vec<Vec<Token>> = Vec::with_capacity(row.operands.len());
        for (i, g) in groups.iter().enumerate() {
            if needs_addr_split && i == groups.len() - 1 {
                let (imm, reg) = split_paren_addressing(g)?;
                flat.push(imm);
                flat.push(reg);
            } else {
                flat.push(g.clone());
            }
        }

        let mut operands = Vec::with_capacity(row.operands.len());
        for (kind, toks) in row.operands.iter().zip(flat.iter()) {
            let operand = match kind {
                MipsOperandKind::Rs | MipsOperandKind::Rt | MipsOperandKind::Rd => MipsOperand::Reg(self.parse_mips_reg(toks)?),
                MipsOperandKind::Shamt | MipsOperandKind::Imm16 | MipsOperandKind::ImmPcRel16 | MipsOperandKind::ImmJump26 => {
                    MipsOperand::Expr(self.parse_expr_tokens(toks)?)
                }
            };
            operands.push(operand);
        }
        Ok(operands)
    }

    fn parse_mips_reg(&self, toks: &[Token]) -> Result<u8> {
        let name = match toks {
            [a, b] if a.as_punct() == Some(Punct::Dollar) => b.identifier_text().map(|s| s.to_string()),
            [a] => a.identifier_text().map(|s| s.to_string()),
            _ => None,
        }
        .ok_or_else(|| Error::InvalidArgument { argument: "expected a register".to_string() })?;
        mips_registers::parse_register(mips_registers::RegisterFile::Gpr, &name)
            .map(|r| r.number)
            .ok_or_else(|| Error::InvalidArgument { argument: format!("unknown register `{name}`") })
    }

    fn expand_pseudo_mips(&mut self, stream: &mut TokenStream, template: &'static pseudo::MacroTemplate, location: FileLine) -> Result<Node> {
        let raw = self.collect_until_separator(stream);
        let groups = split_top_level_commas(&raw);
        let names = pseudo_operand_names(template.mnemonic);
        if groups.len() != names.len() {
            return Err(Error::InvalidArgumentCount { found: groups.len(), expected: vec![names.len()] });
        }

        let mut imm_value = None;
        let mut subs: Vec<(&str, String)> = Vec::with_capacity(names.len());
        for (name, group) in names.iter().zip(groups.iter()) {
            if *name == "imm" {
                let expr = self.parse_expr_tokens(group)?;
                imm_value = self.try_fold_now(expr);
            }
            subs.push((*name, tokens_to_text(group)));
        }

        let arm = pseudo::select_arm(template, imm_value);
        let sub_refs: Vec<(&str, &str)> = subs.iter().map(|(n, v)| (*n, v.as_str())).collect();
        let expanded = pseudo::expand(arm.template, &sub_refs);

        let tokens = Lexer::tokenize(&expanded)?;
        let mut sub_stream = TokenStream::new(tokens);
        let nodes = self.parse_statements(&mut sub_stream)?;
        Ok(Node::new(Command::CommandSequence(nodes), location))
    }

    // -- ARM instruction parsing -------------------------------------------

    fn parse_arm_instruction(&mut self, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
        let tok = self.eat(stream);
        let raw_mnemonic = tok.identifier_text().map(|s| s.to_string()).ok_or(Error::NoArchitectureSelected)?;
        let thumb = matches!(self.arch_mode, Some(ArchMode::Thumb));
        let (row, condition) = self
            .resolve_arm_mnemonic(&raw_mnemonic, thumb)
            .ok_or_else(|| Error::UnknownInstruction { name: raw_mnemonic.clone() })?;

        let raw = self.collect_until_separator(stream);
        let groups = split_top_level_commas(&raw);
        if groups.len() != row.operands.len() {
            return Err(Error::InvalidArgumentCount { found: groups.len(), expected: vec![row.operands.len()] });
        }

        let mut operands = Vec::with_capacity(groups.len());
        for (kind, group) in row.operands.iter().zip(groups.iter()) {
            operands.push(self.build_arm_operand(*kind, group)?);
        }

        let instr = arm_encode::ArmInstruction::new(row, operands, condition, self.arm_pool.clone());
        Ok(Node::new(Command::Instr(Box::new(instr)), location))
    }

    fn resolve_arm_mnemonic(&self, raw: &str, thumb: bool) -> Option<(&'static arm_encode::OpcodeRow, Condition)> {
        let exact = arm_encode::candidates(raw, thumb);
        if let Some(row) = exact.into_iter().next() {
            return Some((row, Condition::Al));
        }
        if raw.len() > 2 {
            let (base, suffix) = raw.split_at(raw.len() - 2);
            if let Some(cond) = Condition::parse(suffix) {
                if let Some(row) = arm_encode::candidates(base, thumb).into_iter().next() {
                    return Some((row, cond));
                }
            }
        }
        None
    }

    fn build_arm_operand(&mut self, kind: arm_encode::OperandKind, group: &[Token]) -> Result<arm_encode::Operand> {
        use arm_encode::OperandKind::*;
        match kind {
            Rd | Rn | Rm => {
                let name = group
                    .first()
                    .and_then(|t| t.identifier_text())
                    .ok_or_else(|| Error::InvalidArgument { argument: "expected a register".to_string() })?;
                let reg = arm_registers::parse_gpr(name)
                    .ok_or_else(|| Error::InvalidArgument { argument: format!("unknown register `{name}`") })?;
                Ok(arm_encode::Operand::Reg(reg))
            }
            Operand2 => {
                if let [tok] = group {
                    if let Some(name) = tok.identifier_text() {
                        if let Some(reg) = arm_registers::parse_gpr(name) {
                            return Ok(arm_encode::Operand::Reg(reg));
                        }
                    }
                }
                let toks = strip_leading_hash(group);
                let expr = self.parse_expr_tokens(toks)?;
                Ok(arm_encode::Operand::Expr(expr))
            }
            BranchTarget => {
                let expr = self.parse_expr_tokens(group)?;
                Ok(arm_encode::Operand::Expr(expr))
            }
            PoolLoad => {
                let toks = strip_leading_eq(group)?;
                let expr = self.parse_expr_tokens(toks)?;
                let pool = self.arm_pool.get_or_insert_with(SharedPool::new);
                Ok(arm_encode::Operand::Pool(pool.enqueue(expr)))
            }
        }
    }
}

fn pseudo_operand_names(mnemonic: &str) -> &'static [&'static str] {
    match mnemonic {
        "li" | "la" => &["rt", "imm"],
        "move" | "abs" => &["rd", "rs"],
        _ => &[],
    }
}

fn tokens_to_text(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.original_text.as_str()).collect::<Vec<_>>().join(" ")
}

fn strip_leading_hash(group: &[Token]) -> &[Token] {
    if group.first().and_then(|t| t.as_punct()) == Some(Punct::Hash) {
        &group[1..]
    } else {
        group
    }
}

fn strip_leading_eq(group: &[Token]) -> Result<&[Token]> {
    if group.first().and_then(|t| t.as_punct()) == Some(Punct::Eq) {
        Ok(&group[1..])
    } else {
        Err(Error::InvalidArgument { argument: "expected `=expr` literal-pool load".to_string() })
    }
}

/// Splits a raw operand-list token span on top-level commas, tracking
/// paren/bracket depth so `lw $t0, 4($sp)` or a function-call argument list
/// doesn't get split inside the parens.
fn split_top_level_commas(tokens: &[Token]) -> Vec<Vec<Token>> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut groups = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0i32;
    for tok in tokens {
        match tok.as_punct() {
            Some(Punct::LParen) | Some(Punct::LBracket) => {
                depth += 1;
                current.push(tok.clone());
            }
            Some(Punct::RParen) | Some(Punct::RBracket) => {
                depth -= 1;
                current.push(tok.clone());
            }
            Some(Punct::Comma) if depth == 0 => {
                groups.push(std::mem::take(&mut current));
            }
            _ => current.push(tok.clone()),
        }
    }
    groups.push(current);
    groups
}

/// Scans a macro body (unexpanded, verbatim tokens) for `name:` label
/// definitions, the same grammar `try_parse_label` accepts for a global
/// (non-`@`) label, so each call site can rename them before the body is
/// parsed. Order-preserving, deduplicated.
fn global_labels_defined_in(body: &[Token]) -> Vec<String> {
    let mut names = Vec::new();
    for pair in body.windows(2) {
        let [first, second] = pair else { continue };
        if second.as_punct() != Some(Punct::Colon) {
            continue;
        }
        if let Some(name) = first.identifier_text() {
            if !name.starts_with('.') && !name.starts_with('@') && !names.iter().any(|n: &String| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Splits a MIPS `imm(reg)` addressing-mode group into its immediate and
/// register token spans. An empty immediate (`(reg)`) defaults to zero.
fn split_paren_addressing(tokens: &[Token]) -> Result<(Vec<Token>, Vec<Token>)> {
    let lparen_pos = tokens
        .iter()
        .position(|t| t.as_punct() == Some(Punct::LParen))
        .ok_or_else(|| Error::InvalidArgument { argument: "expected `imm(reg)` addressing".to_string() })?;
    if tokens.last().and_then(|t| t.as_punct()) != Some(Punct::RParen) {
        return Err(Error::InvalidArgument { argument: "expected `imm(reg)` addressing".to_string() });
    }
    let imm: Vec<Token> = tokens[..lparen_pos].to_vec();
    let reg: Vec<Token> = tokens[lparen_pos + 1..tokens.len() - 1].to_vec();
    let imm = if imm.is_empty() { vec![Token::new(TokenKind::Integer(0), 0, 0, "0".to_string())] } else { imm };
    Ok((imm, reg))
}

/// Parses one full source text into a `CommandSequence` node. Top-level
/// entry point; `root_dir` resolves `.include`/`.incbin`/`.importobj` paths.
pub fn parse_source(
    arena: &mut Arena,
    symbols: &mut SymbolTable,
    logger: &mut Logger,
    root_dir: PathBuf,
    source: &str,
    next_file_num: &mut u32,
    fix_load_delay: bool,
) -> Result<(Node, Vec<SharedDelayState>)> {
    let tokens = Lexer::tokenize(source)?;
    let mut stream = TokenStream::new(tokens);
    let mut parser = Parser::new(arena, symbols, logger, root_dir, next_file_num, fix_load_delay);
    let nodes = parser.parse_statements(&mut stream)?;
    let delay_states = parser.all_delay_states.clone();
    Ok((Node::new(Command::CommandSequence(nodes), FileLine::new(0, 0)), delay_states))
}
