//! Directive dispatch: every `.xxx` statement the parser recognizes.
//!
//! Each directive function consumes exactly its own arguments (the leading
//! `.name` token is already eaten by `parse_directive`'s caller) and, for
//! block directives, recurses into `Parser::parse_statements` for the body
//! and consumes the matching terminator itself.

use crate::arch::arm::pool::SharedPool;
use crate::arch::mips::opcode::ArchSet;
use crate::arch::ArchMode;
use crate::byte_array::Endianness;
use crate::command::{AlignFillKind, Command, FileOp, MessageSeverity, Node};
use crate::error::{Error, FileLine, Result};
use crate::expression::{self, Value};
use crate::token::{Token, TokenKind};
use crate::token_stream::TokenStream;

use super::{split_top_level_commas, Parser};

pub fn parse_directive(parser: &mut Parser, stream: &mut TokenStream, name: &str, location: FileLine) -> Result<Node> {
    parser.eat(stream); // the directive name itself
    match name {
        ".org" => parse_position(parser, stream, crate::command::PositionKind::Virtual, location),
        ".orga" => parse_position(parser, stream, crate::command::PositionKind::Physical, location),
        ".area" => parse_area(parser, stream, location),
        ".if" => parse_if(parser, stream, location),
        ".ifdef" => parse_ifdef(parser, stream, location, false),
        ".ifndef" => parse_ifdef(parser, stream, location, true),
        ".byte" | ".halfword" | ".half" | ".word" | ".doubleword" | ".dword" | ".float" | ".double" | ".ascii" | ".string" | ".sjis" => {
            parse_data_directive(parser, stream, name, location)
        }
        ".align" => parse_align_fill(parser, stream, AlignFillKind::Align, location),
        ".fill" => parse_align_fill(parser, stream, AlignFillKind::Fill, location),
        ".skip" => parse_skip(parser, stream, location),
        ".incbin" => parse_incbin(parser, stream, location),
        ".open" | ".openbin" => parse_open(parser, stream, location),
        ".create" => parse_create(parser, stream, location),
        ".close" => {
            parser.skip_separators(stream);
            Ok(Node::new(Command::File(FileOp::Close), location))
        }
        ".headersize" => parse_headersize(parser, stream, location),
        ".warning" => parse_message(parser, stream, MessageSeverity::Warning, location),
        ".error" => parse_message(parser, stream, MessageSeverity::Error, location),
        ".notice" => parse_message(parser, stream, MessageSeverity::Notice, location),
        ".sym" => parse_sym(parser, stream, location),
        ".little" => {
            parser.skip_separators(stream);
            Ok(Node::new(Command::ArchSwitch { endianness: Endianness::Little }, location))
        }
        ".big" => {
            parser.skip_separators(stream);
            Ok(Node::new(Command::ArchSwitch { endianness: Endianness::Big }, location))
        }
        ".arm" => {
            parser.skip_separators(stream);
            parser.arch_mode = Some(ArchMode::Arm);
            Ok(Node::new(Command::ArmStateMarker { thumb: false }, location))
        }
        ".thumb" => {
            parser.skip_separators(stream);
            parser.arch_mode = Some(ArchMode::Thumb);
            Ok(Node::new(Command::ArmStateMarker { thumb: true }, location))
        }
        ".psx" => select_mips_arch(parser, stream, ArchSet::PSX, location),
        ".ps2" => select_mips_arch(parser, stream, ArchSet::PS2, location),
        ".psp" => select_mips_arch(parser, stream, ArchSet::PSP, location),
        ".n64" => select_mips_arch(parser, stream, ArchSet::N64, location),
        ".rsp" => select_mips_arch(parser, stream, ArchSet::RSP, location),
        ".function" => parse_function(parser, stream, location),
        ".macro" => parse_macro_def(parser, stream, location),
        ".pool" => {
            parser.skip_separators(stream);
            let pool = parser.arm_pool.get_or_insert_with(SharedPool::new).clone();
            // A later `ldr rd, =value` starts a brand new pool; without this
            // it would keep sharing (and overwriting) this one's entries.
            parser.arm_pool = None;
            Ok(Node::new(Command::ArmPool(pool), location))
        }
        ".importobj" => parse_importobj(parser, stream, location),
        ".include" => parse_include(parser, stream, location),
        _ => Err(Error::UnknownDirective { name: name.to_string() }),
    }
}

fn select_mips_arch(parser: &mut Parser, stream: &mut TokenStream, arch: ArchSet, location: FileLine) -> Result<Node> {
    parser.skip_separators(stream);
    parser.arch_mode = Some(ArchMode::Mips);
    parser.mips_arch = Some(arch);
    if arch.contains(ArchSet::PSX) {
        parser.new_mips_delay_state();
    }
    Ok(Node::new(Command::Dummy, location))
}

fn expect_directive(parser: &mut Parser, stream: &mut TokenStream, name: &str) -> Result<()> {
    let tok = parser.eat(stream);
    match tok.identifier_text() {
        Some(s) if s.eq_ignore_ascii_case(name) => {
            parser.skip_separators(stream);
            Ok(())
        }
        _ => Err(Error::ExpectedFound { expected: name.to_string(), found: tok.original_text }),
    }
}

fn extract_string(group: &[Token]) -> Result<String> {
    match group {
        [tok] => match &tok.kind {
            TokenKind::Str(s) => Ok(s.clone()),
            _ => Err(Error::ExpectedFound { expected: "string literal".to_string(), found: tok.original_text.clone() }),
        },
        [] => Err(Error::ExpectedFound { expected: "string literal".to_string(), found: "nothing".to_string() }),
        _ => Err(Error::ExpectedFound { expected: "string literal".to_string(), found: "multiple tokens".to_string() }),
    }
}

fn parse_position(parser: &mut Parser, stream: &mut TokenStream, kind: crate::command::PositionKind, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let expr = parser.parse_expr_tokens(&raw)?;
    Ok(Node::new(Command::Position { kind, expr }, location))
}

fn parse_area(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    if groups.is_empty() || groups.len() > 2 {
        return Err(Error::InvalidArgumentCount { found: groups.len(), expected: vec![1, 2] });
    }
    let size_expr = parser.parse_expr_tokens(&groups[0])?;
    let fill_expr = if groups.len() == 2 { Some(parser.parse_expr_tokens(&groups[1])?) } else { None };
    parser.skip_separators(stream);
    let body_nodes = parser.parse_statements(stream)?;
    expect_directive(parser, stream, ".endarea")?;
    let body = Box::new(Node::new(Command::CommandSequence(body_nodes), location));
    Ok(Node::new(Command::Area { body, size_expr, fill_expr }, location))
}

fn parse_elseif_chain(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Option<Box<Node>>> {
    let next = parser.peek_directive_name(stream);
    match next.as_deref() {
        Some(".elseif") => {
            parser.eat(stream);
            let raw = parser.collect_until_separator(stream);
            let expr = parser.parse_expr_tokens(&raw)?;
            parser.skip_separators(stream);
            let nodes = parser.parse_statements(stream)?;
            let if_body = Box::new(Node::new(Command::CommandSequence(nodes), location));
            let else_body = parse_elseif_chain(parser, stream, location)?;
            Ok(Some(Box::new(Node::new(
                Command::Conditional { expr, if_body, else_body, last_truth: None },
                location,
            ))))
        }
        Some(".else") => {
            parser.eat(stream);
            parser.skip_separators(stream);
            let nodes = parser.parse_statements(stream)?;
            Ok(Some(Box::new(Node::new(Command::CommandSequence(nodes), location))))
        }
        _ => Ok(None),
    }
}

fn parse_if(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let expr = parser.parse_expr_tokens(&raw)?;
    parser.skip_separators(stream);
    let if_nodes = parser.parse_statements(stream)?;
    let if_body = Box::new(Node::new(Command::CommandSequence(if_nodes), location));
    let else_body = parse_elseif_chain(parser, stream, location)?;
    expect_directive(parser, stream, ".endif")?;
    Ok(Node::new(Command::Conditional { expr, if_body, else_body, last_truth: None }, location))
}

fn parse_ifdef(parser: &mut Parser, stream: &mut TokenStream, location: FileLine, negate: bool) -> Result<Node> {
    let tok = parser.eat(stream);
    let name = tok
        .identifier_text()
        .ok_or_else(|| Error::ExpectedFound { expected: "identifier".to_string(), found: tok.original_text.clone() })?
        .to_string();
    parser.skip_separators(stream);

    let src = if negate { format!("!defined({name})") } else { format!("defined({name})") };
    let tokens = crate::lexer::Lexer::tokenize(&src)?;
    let mut local_stream = TokenStream::new(tokens);
    let expr = expression::parse(&mut local_stream, parser.symbols.equations(), parser.arena, parser.file_num, parser.section)?;

    let if_nodes = parser.parse_statements(stream)?;
    let if_body = Box::new(Node::new(Command::CommandSequence(if_nodes), location));
    let else_body = parse_elseif_chain(parser, stream, location)?;
    expect_directive(parser, stream, ".endif")?;
    Ok(Node::new(Command::Conditional { expr, if_body, else_body, last_truth: None }, location))
}

fn parse_data_directive(parser: &mut Parser, stream: &mut TokenStream, name: &str, location: FileLine) -> Result<Node> {
    use crate::command::{DataEntry, DataMode};
    let mode = match name {
        ".byte" => DataMode::U8,
        ".halfword" | ".half" => DataMode::U16,
        ".word" => DataMode::U32,
        ".doubleword" | ".dword" => DataMode::U64,
        ".float" => DataMode::Float,
        ".double" => DataMode::Double,
        ".ascii" | ".string" => DataMode::Ascii,
        ".sjis" => DataMode::Sjis,
        _ => unreachable!("dispatched only for known data directives"),
    };
    let terminate = name == ".string";

    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    let mut entries = Vec::with_capacity(groups.len());
    for group in &groups {
        if let [tok] = group.as_slice() {
            if let TokenKind::Str(s) = &tok.kind {
                entries.push(DataEntry::Str(s.clone()));
                continue;
            }
        }
        let expr = parser.parse_expr_tokens(group)?;
        entries.push(DataEntry::Expr(expr));
    }
    Ok(Node::new(Command::Data { mode, entries, terminate }, location))
}

fn parse_align_fill(parser: &mut Parser, stream: &mut TokenStream, kind: AlignFillKind, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    if groups.is_empty() || groups.len() > 2 {
        return Err(Error::InvalidArgumentCount { found: groups.len(), expected: vec![1, 2] });
    }
    let value_expr = parser.parse_expr_tokens(&groups[0])?;
    let fill_expr = if groups.len() == 2 { Some(parser.parse_expr_tokens(&groups[1])?) } else { None };
    Ok(Node::new(Command::AlignFill { kind, value_expr, fill_expr }, location))
}

fn parse_skip(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let expr = parser.parse_expr_tokens(&raw)?;
    Ok(Node::new(Command::Skip(expr), location))
}

fn parse_incbin(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    if groups.is_empty() || groups.len() > 3 {
        return Err(Error::InvalidArgumentCount { found: groups.len(), expected: vec![1, 2, 3] });
    }
    let path = extract_string(&groups[0])?;
    let start = if groups.len() > 1 { Some(parser.parse_expr_tokens(&groups[1])?) } else { None };
    let size = if groups.len() > 2 { Some(parser.parse_expr_tokens(&groups[2])?) } else { None };
    Ok(Node::new(Command::Incbin { path, start, size }, location))
}

fn parse_open(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    if groups.is_empty() {
        return Err(Error::InvalidArgumentCount { found: 0, expected: vec![1, 2, 3] });
    }
    let path = extract_string(&groups[0])?;
    if let Some(second) = groups.get(1) {
        if let Ok(input) = extract_string(second) {
            let header = if groups.len() > 2 { parser.parse_expr_tokens(&groups[2])? } else { parser.arena.literal(Value::Integer(0)) };
            return Ok(Node::new(Command::File(FileOp::OpenCopy { input, output: path, header }), location));
        }
    }
    let header = if groups.len() > 1 { parser.parse_expr_tokens(&groups[1])? } else { parser.arena.literal(Value::Integer(0)) };
    Ok(Node::new(Command::File(FileOp::Open { path, header }), location))
}

fn parse_create(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    if groups.is_empty() {
        return Err(Error::InvalidArgumentCount { found: 0, expected: vec![1, 2] });
    }
    let path = extract_string(&groups[0])?;
    let header = if groups.len() > 1 { parser.parse_expr_tokens(&groups[1])? } else { parser.arena.literal(Value::Integer(0)) };
    Ok(Node::new(Command::File(FileOp::Create { path, header }), location))
}

fn parse_headersize(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let expr = parser.parse_expr_tokens(&raw)?;
    Ok(Node::new(Command::HeaderSize(expr), location))
}

fn parse_message(parser: &mut Parser, stream: &mut TokenStream, severity: MessageSeverity, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let expr = parser.parse_expr_tokens(&raw)?;
    Ok(Node::new(Command::Message { severity, expr }, location))
}

fn parse_sym(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let tok = parser.eat(stream);
    let on = match tok.identifier_text() {
        Some(s) if s.eq_ignore_ascii_case("on") => true,
        Some(s) if s.eq_ignore_ascii_case("off") => false,
        _ => return Err(Error::ExpectedFound { expected: "on or off".to_string(), found: tok.original_text }),
    };
    parser.skip_separators(stream);
    Ok(Node::new(Command::SymEnable(on), location))
}

fn parse_function(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let tok = parser.eat(stream);
    let name = tok.identifier_text().map(|s| s.to_string()).unwrap_or_default();
    parser.skip_separators(stream);
    let nodes = parser.parse_statements(stream)?;
    expect_directive(parser, stream, ".endfunction")?;
    let body = Box::new(Node::new(Command::CommandSequence(nodes), location));
    Ok(Node::new(Command::Function { name, body }, location))
}

/// Scans ahead without substitution, tracking nested `.macro`/`.endmacro`,
/// and returns the raw (unexpanded) body tokens up to but excluding the
/// matching `.endmacro`. Advances the stream past the body plus that
/// terminator.
fn capture_macro_body(stream: &mut TokenStream) -> Result<Vec<Token>> {
    let mut offset = 0usize;
    let mut depth = 0u32;
    let mut body = Vec::new();
    loop {
        let tok = match stream.peek_raw(offset) {
            Some(t) => t.clone(),
            None => return Err(Error::ExpectedFound { expected: ".endmacro".to_string(), found: "end of file".to_string() }),
        };
        if matches!(tok.kind, TokenKind::Eof) {
            return Err(Error::ExpectedFound { expected: ".endmacro".to_string(), found: "end of file".to_string() });
        }
        if let Some(text) = tok.identifier_text() {
            let lower = text.to_ascii_lowercase();
            if lower == ".macro" {
                return Err(Error::NestedMacroDefinition);
            }
            if lower == ".endmacro" {
                offset += 1;
                if depth == 0 {
                    break;
                }
                depth -= 1;
                continue;
            }
        }
        body.push(tok);
        offset += 1;
    }
    stream.skip_raw(offset);
    Ok(body)
}

fn parse_macro_def(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw_header = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw_header);
    let mut iter = groups.into_iter();
    let name_group = iter.next().ok_or_else(|| Error::ExpectedFound { expected: "macro name".to_string(), found: String::new() })?;
    let name = name_group
        .first()
        .and_then(|t| t.identifier_text())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::ExpectedFound { expected: "macro name".to_string(), found: String::new() })?;
    let params: Vec<String> = iter
        .filter_map(|g| g.first().and_then(|t| t.identifier_text()).map(|s| s.to_string()))
        .collect();
    parser.skip_separators(stream);

    let body = capture_macro_body(stream)?;
    parser.skip_separators(stream);
    parser.macros.define(&name, params, body)?;
    Ok(Node::new(Command::Dummy, location))
}

fn parse_importobj(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    if groups.is_empty() {
        return Err(Error::InvalidArgumentCount { found: 0, expected: vec![1, 2] });
    }
    let path = extract_string(&groups[0])?;
    let full_path = parser.root_dir.join(&path);
    let bytes = std::fs::read(&full_path)
        .map_err(|e| Error::ReadError { path: full_path.display().to_string(), reason: e.to_string() })?;

    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".o") || lower.ends_with(".elf") {
        let object = crate::elf::ElfObject::parse(&bytes)?;
        return match groups.get(1) {
            Some(g) => {
                let ctor_name = extract_string(g)?;
                build_ctor_stub(parser, object, &ctor_name, location)
            }
            None => Ok(Node::new(Command::ElfImport(Box::new(crate::elf::ElfImporter::new(object))), location)),
        };
    }

    let mut objects = crate::psx::PsxObject::parse_all(&bytes)?;
    let index = match groups.get(1) {
        Some(g) => {
            let expr = parser.parse_expr_tokens(g)?;
            parser.try_fold_now(expr).unwrap_or(0).max(0) as usize
        }
        None => 0,
    };
    if index >= objects.len() {
        return Err(Error::InvalidPsxObject(format!("object index {index} out of range")));
    }
    let object = objects.remove(index);
    let importer = crate::psx::PsxImporter::new(object);
    Ok(Node::new(Command::PsxObjImport(Box::new(importer)), location))
}

/// `.importobj "file.o", "ctorName"`: places the import, then generates a
/// function named `ctorName` that calls every entry the object's
/// `.ctors`/`.init_array` section lists.
///
/// The original tool's equivalent (`generateCtorStub` in `Mips.cpp` /
/// `ArmRelocator.cpp`) emits a runtime loop that walks the table through a
/// register, loading and branching to each entry indirectly, because the
/// table's contents aren't known until the object is linked at actual
/// runtime. Here the object is already fully parsed by the time this
/// directive runs, so every entry's address is a parse-time constant --
/// the generated function calls each one directly instead of looping.
fn build_ctor_stub(parser: &mut Parser, object: crate::elf::ElfObject, ctor_name: &str, location: FileLine) -> Result<Node> {
    let targets = object.ctor_targets()?;
    let is_arm = matches!(parser.arch_mode, Some(ArchMode::Arm));
    let is_mips = matches!(parser.arch_mode, Some(ArchMode::Mips));
    if !is_arm && !is_mips {
        return Err(Error::InvalidArgument {
            argument: "ctor stub generation needs .arm or a MIPS architecture selected".to_string(),
        });
    }

    let base_label = parser.symbols.mint_unique_label_name(false);
    let label_node = Node::new(
        Command::Label { name: base_label.clone(), file: parser.file_num, section: parser.section, value_expr: None },
        location,
    );
    let import_node = Node::new(Command::ElfImport(Box::new(crate::elf::ElfImporter::new(object))), location);
    // `Command::Function`'s own `name` is diagnostic-only (it defines no
    // symbol), so an explicit label is what makes `ctorName` callable from
    // elsewhere in the script.
    let entry_label_node = Node::new(
        Command::Label { name: ctor_name.to_string(), file: parser.file_num, section: parser.section, value_expr: None },
        location,
    );

    let mut body_text = String::new();
    for target in &targets {
        if is_arm {
            body_text.push_str(&format!("bl {base_label}+{target}\n"));
        } else {
            body_text.push_str(&format!("jal {base_label}+{target}\nnop\n"));
        }
    }
    if is_arm {
        body_text.push_str("bx lr\n");
    } else {
        body_text.push_str("jr $ra\nnop\n");
    }

    let tokens = crate::lexer::Lexer::tokenize(&body_text)?;
    let mut body_stream = TokenStream::new(tokens);
    let body_nodes = parser.parse_statements(&mut body_stream)?;
    let function_node = Node::new(
        Command::Function {
            name: ctor_name.to_string(),
            body: Box::new(Node::new(Command::CommandSequence(body_nodes), location)),
        },
        location,
    );

    Ok(Node::new(Command::CommandSequence(vec![label_node, import_node, entry_label_node, function_node]), location))
}

fn parse_include(parser: &mut Parser, stream: &mut TokenStream, location: FileLine) -> Result<Node> {
    let raw = parser.collect_until_separator(stream);
    let groups = split_top_level_commas(&raw);
    let path = extract_string(groups.first().map(Vec::as_slice).unwrap_or(&[]))?;
    parser.parse_include_file(&path, location)
}
