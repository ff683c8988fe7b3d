//! PSX `.obj`/`.lib` importer: the PSYQ byte-tagged object format used by
//! the original Sony devkit toolchain, still accepted by `armips`'
//! `.importobj` for legacy PSX projects. Each record is `(tag: u8, body)`;
//! only the handful of tags that matter for pulling in precompiled code —
//! section switches, byte/half/word patches, external-symbol references,
//! and the relocation fixup records — are recognized. Unknown tags are
//! skipped using the body length the format always encodes right after the
//! tag, so later records stay in sync.

use std::collections::HashMap;

use crate::arch::Instruction;
use crate::error::{Error, Result};
use crate::expression::{Arena, EvalEnv};
use crate::symbol_table::SymbolTable;

const LIB_MAGIC: u16 = 0x0100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchKind {
    Byte,
    Half,
    Word,
    /// R_MIPS_26-shaped jump target patch.
    Jump,
}

#[derive(Debug, Clone)]
struct Patch {
    kind: PatchKind,
    offset: usize,
    symbol: String,
}

/// One parsed PSX object "module" (a `.obj` file holds exactly one; a
/// `.lib` archive holds several back to back).
pub struct PsxObject {
    bytes: Vec<u8>,
    patches: Vec<Patch>,
    locals: HashMap<String, i64>,
    externals: HashMap<String, i64>,
}

impl PsxObject {
    /// Parses every module in `data`; a plain `.obj` yields a single-item
    /// vec, a `.lib` archive yields one per member.
    pub fn parse_all(data: &[u8]) -> Result<Vec<PsxObject>> {
        if data.len() >= 2 && u16::from_le_bytes([data[0], data[1]]) == LIB_MAGIC {
            return Self::parse_library(data);
        }
        Ok(vec![Self::parse_one(data)?])
    }

    fn parse_library(data: &[u8]) -> Result<Vec<PsxObject>> {
        let mut objects = Vec::new();
        let mut pos = 2usize;
        while pos + 4 <= data.len() {
            let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(Error::InvalidPsxObject("library member length overruns the archive".to_string()));
            }
            objects.push(Self::parse_one(&data[pos..pos + len])?);
            pos += len;
        }
        Ok(objects)
    }

    fn parse_one(data: &[u8]) -> Result<PsxObject> {
        let mut bytes = Vec::new();
        let mut patches = Vec::new();
        let mut locals = HashMap::new();
        let mut externals: HashMap<String, i64> = HashMap::new();
        let mut pending_external_names = Vec::new();
        let mut section_origin = 0i64;

        let mut pos = 0usize;
        while pos < data.len() {
            let tag = data[pos];
            pos += 1;
            match tag {
                // end of module
                0 => break,
                // byte/halfword/word literal data, each prefixed by a u16 count
                2 | 6 | 8 => {
                    let count = read_u16(data, pos)? as usize;
                    pos += 2;
                    let unit = match tag {
                        2 => 1,
                        6 => 2,
                        _ => 4,
                    };
                    let end = pos + count * unit;
                    bytes.extend_from_slice(data.get(pos..end).ok_or_else(|| Error::InvalidPsxObject("data record truncated".to_string()))?);
                    pos = end;
                }
                // switch section: origin (u32) follows
                4 => {
                    section_origin = read_u32(data, pos)? as i64;
                    pos += 4;
                }
                // define local symbol: 2-byte id (ignored) + 4-byte value + name
                10 => {
                    let value = read_u32(data, pos + 2)? as i64;
                    pos += 6;
                    let name = read_pascal_string(data, &mut pos)?;
                    locals.insert(name, section_origin + value);
                }
                // reference an external symbol by name, to be bound later
                12 => {
                    let name = read_pascal_string(data, &mut pos)?;
                    pending_external_names.push(name);
                }
                // relocation fixup: kind (u8) + offset (u32) + symbol index (u16)
                14 => {
                    let kind = match data.get(pos).copied().ok_or_else(|| Error::InvalidPsxObject("truncated fixup record".to_string()))? {
                        0 => PatchKind::Byte,
                        1 => PatchKind::Half,
                        2 => PatchKind::Word,
                        3 => PatchKind::Jump,
                        other => return Err(Error::InvalidPsxObject(format!("unknown fixup kind {other}"))),
                    };
                    let offset = read_u32(data, pos + 1)? as usize;
                    let sym_index = read_u16(data, pos + 5)? as usize;
                    pos += 7;
                    let symbol = pending_external_names.get(sym_index).cloned().unwrap_or_default();
                    patches.push(Patch { kind, offset, symbol });
                }
                _ => {
                    // Unrecognized tag: the format always follows with a
                    // u16 byte count for its body, so skip past it.
                    let count = read_u16(data, pos)? as usize;
                    pos += 2 + count;
                }
            }
        }
        for name in pending_external_names {
            externals.entry(name).or_insert(0);
        }
        Ok(PsxObject { bytes, patches, locals, externals })
    }

    pub fn bind_external(&mut self, name: &str, value: i64) {
        self.externals.insert(name.to_string(), value);
    }

    fn relocate(&self, base: i64) -> Result<Vec<u8>> {
        let mut out = self.bytes.clone();
        for patch in &self.patches {
            let target = self
                .locals
                .get(&patch.symbol)
                .copied()
                .or_else(|| self.externals.get(&patch.symbol).copied())
                .ok_or_else(|| Error::UndefinedExternal { name: patch.symbol.clone() })?;
            let place = base + patch.offset as i64;
            match patch.kind {
                PatchKind::Byte => out[patch.offset] = target as u8,
                PatchKind::Half => out[patch.offset..patch.offset + 2].copy_from_slice(&(target as u16).to_le_bytes()),
                PatchKind::Word => out[patch.offset..patch.offset + 4].copy_from_slice(&(target as u32).to_le_bytes()),
                PatchKind::Jump => {
                    let word = u32::from_le_bytes(out[patch.offset..patch.offset + 4].try_into().unwrap());
                    let new_word = (word & 0xFC00_0000) | (((target >> 2) as u32) & 0x03FF_FFFF);
                    out[patch.offset..patch.offset + 4].copy_from_slice(&new_word.to_le_bytes());
                    let _ = place;
                }
            }
        }
        Ok(out)
    }
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16> {
    data.get(pos..pos + 2)
        .map(|b| u16::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| Error::InvalidPsxObject("record truncated".to_string()))
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32> {
    data.get(pos..pos + 4)
        .map(|b| u32::from_le_bytes(b.try_into().unwrap()))
        .ok_or_else(|| Error::InvalidPsxObject("record truncated".to_string()))
}

fn read_pascal_string(data: &[u8], pos: &mut usize) -> Result<String> {
    let len = *data.get(*pos).ok_or_else(|| Error::InvalidPsxObject("truncated symbol name".to_string()))? as usize;
    *pos += 1;
    let s = data.get(*pos..*pos + len).ok_or_else(|| Error::InvalidPsxObject("truncated symbol name".to_string()))?;
    *pos += len;
    Ok(String::from_utf8_lossy(s).into_owned())
}

/// Wraps a [`PsxObject`] as an [`Instruction`] so it slots into
/// [`crate::command::Command::PsxObjImport`] the same way an
/// [`crate::elf::ElfImporter`] does.
pub struct PsxImporter {
    object: PsxObject,
    bytes: Vec<u8>,
    last_base: i64,
}

impl PsxImporter {
    pub fn new(object: PsxObject) -> Self {
        PsxImporter { object, bytes: Vec::new(), last_base: i64::MIN }
    }
}

impl Instruction for PsxImporter {
    fn validate(&mut self, env: &EvalEnv, _symbols: &SymbolTable, _arena: &mut Arena) -> Result<bool> {
        let base = env.memory_pos;
        if base == self.last_base && !self.bytes.is_empty() {
            return Ok(false);
        }
        self.bytes = self.object.relocate(base)?;
        self.last_base = base;
        Ok(true)
    }

    fn size(&self) -> i64 {
        self.bytes.len() as i64
    }

    fn encode(&self, _env: &EvalEnv, _symbols: &SymbolTable, _arena: &Arena) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn mnemonic(&self) -> &str {
        "psxobjimport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_simple_module() -> Vec<u8> {
        let mut data = Vec::new();
        // data record: 4 bytes of zero, will be patched
        data.push(2);
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&[0, 0, 0, 0]);
        // external reference "foo"
        data.push(12);
        data.push(3);
        data.extend_from_slice(b"foo");
        // fixup: word patch at offset 0 referencing external index 0
        data.push(14);
        data.push(2);
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        // end of module
        data.push(0);
        data
    }

    #[test]
    fn parses_single_object_without_library_header() {
        let data = build_simple_module();
        let objects = PsxObject::parse_all(&data).unwrap();
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn word_patch_resolves_bound_external() {
        let data = build_simple_module();
        let mut object = PsxObject::parse_all(&data).unwrap().remove(0);
        object.bind_external("foo", 0x1000);
        let relocated = object.relocate(0).unwrap();
        assert_eq!(u32::from_le_bytes(relocated[0..4].try_into().unwrap()), 0x1000);
    }

    #[test]
    fn library_header_splits_into_multiple_modules() {
        let module = build_simple_module();
        let mut lib = LIB_MAGIC.to_le_bytes().to_vec();
        for _ in 0..2 {
            lib.extend_from_slice(&(module.len() as u32).to_le_bytes());
            lib.extend_from_slice(&module);
        }
        let objects = PsxObject::parse_all(&lib).unwrap();
        assert_eq!(objects.len(), 2);
    }
}
