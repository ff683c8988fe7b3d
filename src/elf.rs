//! ELF32 object importer: reads a relocatable `.o`, applies MIPS/ARM
//! relocations against the placement address chosen by the surrounding
//! program, and hands the result back as an [`Instruction`]-shaped node so
//! [`crate::command`] can validate/encode it exactly like a real opcode.

use std::collections::HashMap;
use std::convert::TryInto;

use crate::arch::Instruction;
use crate::error::{Error, Result};
use crate::expression::{Arena, EvalEnv};
use crate::symbol_table::SymbolTable;

const ET_REL: u16 = 1;
const EM_MIPS: u16 = 8;
const EM_ARM: u16 = 40;
const SHT_SYMTAB: u32 = 2;
const SHT_REL: u32 = 9;
const SHT_RELA: u32 = 4;
/// GNU ld's modern array-of-function-pointers section type, the
/// `.init_array` counterpart of the classic `.ctors` section.
const SHT_INIT_ARRAY: u32 = 14;
/// ELF32 `sh_flags` bit: the section occupies memory at load time.
const SHF_ALLOC: u32 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectArch {
    Mips,
    Arm,
}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    sh_type: u32,
    flags: u32,
    addr: u32,
    offset: u32,
    size: u32,
    link: u32,
    info: u32,
    entsize: u32,
    data: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ElfSymbol {
    name: String,
    value: u32,
    shndx: u16,
}

#[derive(Debug, Clone, Copy)]
struct Relocation {
    offset: u32,
    sym: u32,
    rtype: u32,
    addend: i64,
}

/// A parsed (but not yet placed) ELF32 object: text/data bytes plus the
/// relocations that still need a base address to resolve against.
pub struct ElfObject {
    arch: ObjectArch,
    sections: Vec<Section>,
    symbols: Vec<ElfSymbol>,
    externals: HashMap<String, i64>,
}

impl ElfObject {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 52 || &bytes[0..4] != b"\x7FELF" {
            return Err(Error::InvalidElf("missing ELF magic".to_string()));
        }
        if bytes[4] != 1 {
            return Err(Error::InvalidElf("only 32-bit ELF objects are supported".to_string()));
        }
        let little_endian = bytes[5] == 1;
        let read_u16 = |b: &[u8], off: usize| -> u16 {
            let s: [u8; 2] = b[off..off + 2].try_into().unwrap();
            if little_endian { u16::from_le_bytes(s) } else { u16::from_be_bytes(s) }
        };
        let read_u32 = |b: &[u8], off: usize| -> u32 {
            let s: [u8; 4] = b[off..off + 4].try_into().unwrap();
            if little_endian { u32::from_le_bytes(s) } else { u32::from_be_bytes(s) }
        };

        let e_type = read_u16(bytes, 16);
        if e_type != ET_REL {
            return Err(Error::InvalidElf("expected a relocatable (ET_REL) object".to_string()));
        }
        let e_machine = read_u16(bytes, 18);
        let arch = match e_machine {
            EM_MIPS => ObjectArch::Mips,
            EM_ARM => ObjectArch::Arm,
            other => return Err(Error::InvalidElf(format!("unsupported e_machine {other}"))),
        };
        let e_shoff = read_u32(bytes, 32) as usize;
        let e_shentsize = read_u16(bytes, 46) as usize;
        let e_shnum = read_u16(bytes, 48) as usize;
        let e_shstrndx = read_u16(bytes, 50) as usize;

        let mut raw_sections = Vec::with_capacity(e_shnum);
        for i in 0..e_shnum {
            let base = e_shoff + i * e_shentsize;
            if base + 40 > bytes.len() {
                return Err(Error::InvalidElf("section header table truncated".to_string()));
            }
            let name_off = read_u32(bytes, base);
            let sh_type = read_u32(bytes, base + 4);
            let flags = read_u32(bytes, base + 8);
            let addr = read_u32(bytes, base + 12);
            let offset = read_u32(bytes, base + 16);
            let size = read_u32(bytes, base + 20);
            let link = read_u32(bytes, base + 24);
            let info = read_u32(bytes, base + 28);
            let entsize = read_u32(bytes, base + 36);
            raw_sections.push((name_off, sh_type, flags, addr, offset, size, link, info, entsize));
        }

        let shstrtab_off = raw_sections.get(e_shstrndx).map(|s| s.4 as usize).unwrap_or(0);
        let mut sections = Vec::with_capacity(raw_sections.len());
        for (name_off, sh_type, flags, addr, offset, size, link, info, entsize) in raw_sections {
            let name = read_cstr(bytes, shstrtab_off + name_off as usize);
            let data = bytes.get(offset as usize..(offset + size) as usize).unwrap_or(&[]).to_vec();
            sections.push(Section { name, sh_type, flags, addr, offset, size, link, info, entsize, data });
        }

        let mut symbols = Vec::new();
        if let Some(symtab) = sections.iter().find(|s| s.sh_type == SHT_SYMTAB) {
            let strtab = sections.get(symtab.link as usize).map(|s| s.data.clone()).unwrap_or_default();
            let entsize = symtab.entsize.max(16) as usize;
            let mut off = 0usize;
            while off + entsize <= symtab.data.len() {
                let name_off = read_u32(&symtab.data, off);
                let value = read_u32(&symtab.data, off + 4);
                let shndx = read_u16(&symtab.data, off + 14);
                let name = read_cstr(&strtab, name_off as usize);
                symbols.push(ElfSymbol { name, value, shndx });
                off += entsize;
            }
        }

        Ok(ElfObject { arch, sections, symbols, externals: HashMap::new() })
    }

    /// Registers a value for an undefined external symbol the object
    /// references, resolved by the surrounding program.
    pub fn bind_external(&mut self, name: &str, value: i64) {
        self.externals.insert(name.to_string(), value);
    }

    /// Lays out every `PROGBITS`/`NOBITS` section back-to-back starting at
    /// `base`, the same placement order `relocate` emits bytes in. Shared
    /// with `ctor_targets`, which needs a function's address without
    /// wanting a second copy of the output bytes.
    fn section_bases(&self, base: i64) -> HashMap<usize, i64> {
        let mut section_bases = HashMap::new();
        let mut cursor = base;
        for (idx, section) in self.sections.iter().enumerate() {
            if (section.addr != 0 || !section.data.is_empty()) && matches!(section.sh_type, 1 | 8) {
                section_bases.insert(idx, cursor);
                cursor += section.size as i64;
            }
        }
        section_bases
    }

    /// Relocates every `.text`-like section against `base`, returning the
    /// concatenated output bytes in section order.
    fn relocate(&self, base: i64) -> Result<Vec<u8>> {
        let section_bases = self.section_bases(base);

        let mut out: Vec<u8> = Vec::new();
        for (idx, section) in self.sections.iter().enumerate() {
            let Some(&section_base) = section_bases.get(&idx) else { continue };
            let mut bytes = section.data.clone();
            if bytes.is_empty() && section.sh_type == 8 {
                bytes = vec![0u8; section.size as usize];
            }

            for rel in self.relocations_for(idx) {
                let sym = self.symbols.get(rel.sym as usize).ok_or_else(|| Error::InvalidElf("relocation references an out-of-range symbol".to_string()))?;
                let target = self.symbol_address(sym, &section_bases)?;
                apply_relocation(self.arch, &mut bytes, rel, target, section_base)?;
            }
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    fn relocations_for(&self, section_idx: usize) -> Vec<Relocation> {
        let mut rels = Vec::new();
        for section in &self.sections {
            if section.info as usize != section_idx {
                continue;
            }
            let is_rela = section.sh_type == SHT_RELA;
            if section.sh_type != SHT_REL && !is_rela {
                continue;
            }
            let entsize = if is_rela { 12 } else { 8 };
            let mut off = 0usize;
            while off + entsize <= section.data.len() {
                let r_offset = u32::from_le_bytes(section.data[off..off + 4].try_into().unwrap());
                let r_info = u32::from_le_bytes(section.data[off + 4..off + 8].try_into().unwrap());
                let addend = if is_rela { i32::from_le_bytes(section.data[off + 8..off + 12].try_into().unwrap()) as i64 } else { 0 };
                rels.push(Relocation { offset: r_offset, sym: r_info >> 8, rtype: r_info & 0xFF, addend });
                off += entsize;
            }
        }
        rels
    }

    fn symbol_address(&self, sym: &ElfSymbol, section_bases: &HashMap<usize, i64>) -> Result<i64> {
        if sym.shndx == 0 {
            return self.externals.get(&sym.name).copied().ok_or_else(|| Error::UndefinedExternal { name: sym.name.clone() });
        }
        let base = section_bases.get(&(sym.shndx as usize)).copied().unwrap_or(0);
        Ok(base + sym.value as i64)
    }

    /// Resolves every function-pointer entry in a `.ctors`/`.init_array`
    /// section to its address relative to this object's own placement (as
    /// if relocated with `base == 0`). Entries whose relocation targets an
    /// external, not-locally-defined symbol are skipped; a stub can only
    /// call what this object itself provides the address of.
    ///
    /// The original tool walks the equivalent table at runtime
    /// (`generateCtorStub` in `Mips.cpp`/`ArmRelocator.cpp`), loading each
    /// entry through a register and branching indirectly. Resolving the
    /// table here, at parse time, lets the generated stub call each
    /// constructor with a direct `jal`/`bl` instead, since every address is
    /// already known before a single instruction is emitted.
    pub fn ctor_targets(&self) -> Result<Vec<i64>> {
        let bases = self.section_bases(0);
        let mut targets = Vec::new();
        for (idx, section) in self.sections.iter().enumerate() {
            let is_ctor_section = section.sh_type == SHT_INIT_ARRAY
                || (section.flags & SHF_ALLOC != 0 && (section.name == ".ctors" || section.name == ".init_array"));
            if !is_ctor_section {
                continue;
            }
            for rel in self.relocations_for(idx) {
                let Some(sym) = self.symbols.get(rel.sym as usize) else { continue };
                if sym.shndx == 0 {
                    continue;
                }
                let target = self.symbol_address(sym, &bases)?;
                targets.push(target + rel.addend);
            }
        }
        Ok(targets)
    }
}

fn read_cstr(bytes: &[u8], offset: usize) -> String {
    let slice = bytes.get(offset..).unwrap_or(&[]);
    let end = slice.iter().position(|b| *b == 0).unwrap_or(slice.len());
    String::from_utf8_lossy(&slice[..end]).into_owned()
}

/// Applies one relocation entry in place. Only the handful of MIPS/ARM
/// relocation types the object-import feature needs are implemented; an
/// unrecognized type is treated as a no-op rather than a hard error so a
/// partially-understood object still links for the fields that matter.
fn apply_relocation(arch: ObjectArch, bytes: &mut [u8], rel: Relocation, target: i64, section_base: i64) -> Result<()> {
    let off = rel.offset as usize;
    if off + 4 > bytes.len() {
        return Err(Error::InvalidElf("relocation offset out of range".to_string()));
    }
    let word = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
    let place = section_base + rel.offset as i64;
    let value = target + rel.addend;
    let new_word = match (arch, rel.rtype) {
        (ObjectArch::Mips, 2) => value as u32, // R_MIPS_32
        (ObjectArch::Mips, 4) => (word & 0xFC00_0000) | (((value >> 2) as u32) & 0x03FF_FFFF), // R_MIPS_26
        (ObjectArch::Mips, 5) => (word & 0xFFFF_0000) | (crate::expression::functions::hi(value) as u32 & 0xFFFF), // R_MIPS_HI16
        (ObjectArch::Mips, 6) => (word & 0xFFFF_0000) | (crate::expression::functions::lo(value) as u32 & 0xFFFF), // R_MIPS_LO16
        (ObjectArch::Arm, 2) => value as u32, // R_ARM_ABS32
        (ObjectArch::Arm, 28) | (ObjectArch::Arm, 29) => {
            // R_ARM_CALL (28) / R_ARM_JUMP24 (29): 24-bit signed word offset.
            let delta = ((value - place - 8) >> 2) as u32;
            (word & 0xFF00_0000) | (delta & 0x00FF_FFFF)
        }
        (ObjectArch::Arm, 10) => {
            // R_ARM_THM_CALL: two 16-bit halves, 22-bit signed halfword offset.
            let delta = (value - place - 4) >> 1;
            let hi = ((delta >> 11) as u32) & 0x7FF;
            let lo_half = (delta as u32) & 0x7FF;
            let low = u16::from_le_bytes(bytes[off + 2..off + 4].try_into().unwrap());
            bytes[off..off + 2].copy_from_slice(&(0xF000u16 | hi as u16).to_le_bytes());
            bytes[off + 2..off + 4].copy_from_slice(&((low & 0xF800) | 0xF800 | lo_half as u16).to_le_bytes());
            return Ok(());
        }
        _ => word,
    };
    bytes[off..off + 4].copy_from_slice(&new_word.to_le_bytes());
    Ok(())
}

/// Wraps an [`ElfObject`] so it slots into [`crate::command::Command::ElfImport`]
/// exactly like a backend instruction: re-relocates every validate pass
/// (the placement address may still be moving), caches the bytes for
/// encode.
pub struct ElfImporter {
    object: ElfObject,
    bytes: Vec<u8>,
    last_base: i64,
}

impl ElfImporter {
    pub fn new(object: ElfObject) -> Self {
        ElfImporter { object, bytes: Vec::new(), last_base: i64::MIN }
    }
}

impl Instruction for ElfImporter {
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
        "elfimport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-assembles a minimal ET_REL MIPS32LE object with a `.text`
    /// section holding two 4-byte stub "functions" at offsets 0 and 4, an
    /// `.init_array` section with two pointer-sized entries, and a REL
    /// section relocating each entry against one of the two local symbols.
    fn build_mips_ctor_object() -> Vec<u8> {
        fn pad_name(name: &str, strtab: &mut Vec<u8>) -> u32 {
            let off = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);
            off
        }

        let mut shstrtab = vec![0u8]; // index 0 is the empty name
        let text_name = pad_name(".text", &mut shstrtab);
        let init_name = pad_name(".init_array", &mut shstrtab);
        let rel_name = pad_name(".rel.init_array", &mut shstrtab);
        let symtab_name = pad_name(".symtab", &mut shstrtab);
        let strtab_name = pad_name(".strtab", &mut shstrtab);
        let shstrtab_name = pad_name(".shstrtab", &mut shstrtab);

        let mut strtab = vec![0u8];
        let ctor_a_name = pad_name("ctor_a", &mut strtab);
        let ctor_b_name = pad_name("ctor_b", &mut strtab);

        let text_data: Vec<u8> = vec![0, 0, 0, 0, 0, 0, 0, 0]; // two nop words
        let init_array_data: Vec<u8> = vec![0u8; 8];

        // symtab: null entry + two STT_FUNC symbols in .text (shndx = 1).
        let mut symtab_data = Vec::new();
        symtab_data.extend_from_slice(&0u32.to_le_bytes());
        symtab_data.extend_from_slice(&0u32.to_le_bytes());
        symtab_data.extend_from_slice(&0u32.to_le_bytes());
        symtab_data.extend_from_slice(&0u16.to_le_bytes());
        for (name_off, value) in [(ctor_a_name, 0u32), (ctor_b_name, 4u32)] {
            symtab_data.extend_from_slice(&name_off.to_le_bytes());
            symtab_data.extend_from_slice(&value.to_le_bytes());
            symtab_data.extend_from_slice(&0u32.to_le_bytes()); // st_size
            symtab_data.push(0); // st_info
            symtab_data.push(0); // st_other
            symtab_data.extend_from_slice(&1u16.to_le_bytes()); // shndx = .text
        }

        // REL entries: init_array[0] -> symbol 1 (ctor_a), init_array[1] -> symbol 2 (ctor_b).
        let mut rel_data = Vec::new();
        for (offset, sym) in [(0u32, 1u32), (4u32, 2u32)] {
            rel_data.extend_from_slice(&offset.to_le_bytes());
            rel_data.extend_from_slice(&((sym << 8) | 2).to_le_bytes()); // R_MIPS_32
        }

        struct Sec {
            name_off: u32,
            sh_type: u32,
            flags: u32,
            link: u32,
            info: u32,
            entsize: u32,
            data: Vec<u8>,
        }
        let sections = vec![
            Sec { name_off: 0, sh_type: 0, flags: 0, link: 0, info: 0, entsize: 0, data: Vec::new() },
            Sec { name_off: text_name, sh_type: 1, flags: 0x6, link: 0, info: 0, entsize: 0, data: text_data },
            Sec { name_off: init_name, sh_type: SHT_INIT_ARRAY, flags: SHF_ALLOC, link: 0, info: 0, entsize: 4, data: init_array_data },
            Sec { name_off: rel_name, sh_type: SHT_REL, flags: 0, link: 4, info: 2, entsize: 8, data: rel_data },
            Sec { name_off: symtab_name, sh_type: SHT_SYMTAB, flags: 0, link: 5, info: 0, entsize: 16, data: symtab_data },
            Sec { name_off: strtab_name, sh_type: 0, flags: 0, link: 0, info: 0, entsize: 0, data: strtab },
            Sec { name_off: shstrtab_name, sh_type: 0, flags: 0, link: 0, info: 0, entsize: 0, data: shstrtab },
        ];

        let mut bytes = vec![0u8; 52];
        bytes[0..4].copy_from_slice(b"\x7FELF");
        bytes[4] = 1; // ELFCLASS32
        bytes[5] = 1; // little-endian
        bytes[16..18].copy_from_slice(&1u16.to_le_bytes()); // e_type = ET_REL
        bytes[18..20].copy_from_slice(&EM_MIPS.to_le_bytes());

        let mut offsets = Vec::with_capacity(sections.len());
        for sec in &sections {
            let off = bytes.len() as u32;
            bytes.extend_from_slice(&sec.data);
            offsets.push(off);
        }

        let shoff = bytes.len() as u32;
        for (sec, &offset) in sections.iter().zip(&offsets) {
            let mut hdr = vec![0u8; 40];
            hdr[0..4].copy_from_slice(&sec.name_off.to_le_bytes());
            hdr[4..8].copy_from_slice(&sec.sh_type.to_le_bytes());
            hdr[8..12].copy_from_slice(&sec.flags.to_le_bytes());
            hdr[16..20].copy_from_slice(&offset.to_le_bytes());
            hdr[20..24].copy_from_slice(&(sec.data.len() as u32).to_le_bytes());
            hdr[24..28].copy_from_slice(&sec.link.to_le_bytes());
            hdr[28..32].copy_from_slice(&sec.info.to_le_bytes());
            hdr[36..40].copy_from_slice(&sec.entsize.to_le_bytes());
            bytes.extend_from_slice(&hdr);
        }

        bytes[32..36].copy_from_slice(&shoff.to_le_bytes());
        bytes[46..48].copy_from_slice(&40u16.to_le_bytes());
        bytes[48..50].copy_from_slice(&(sections.len() as u16).to_le_bytes());
        bytes[50..52].copy_from_slice(&6u16.to_le_bytes()); // e_shstrndx

        bytes
    }

    #[test]
    fn ctor_targets_resolves_locally_defined_entries_relative_to_their_own_section() {
        let bytes = build_mips_ctor_object();
        let object = ElfObject::parse(&bytes).unwrap();
        let mut targets = object.ctor_targets().unwrap();
        targets.sort_unstable();
        assert_eq!(targets, vec![0, 4]);
    }

    #[test]
    fn rejects_non_elf_bytes() {
        assert!(ElfObject::parse(b"not an elf file").is_err());
    }

    #[test]
    fn read_cstr_stops_at_nul() {
        let bytes = b"foo\0bar\0";
        assert_eq!(read_cstr(bytes, 0), "foo");
        assert_eq!(read_cstr(bytes, 4), "bar");
    }
}
