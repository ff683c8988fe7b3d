//! End-to-end runs of [`retroasm::driver::run`] against small scripts,
//! covering behavior that spans the parser, a backend, and the two-pass
//! resolver together rather than any single module in isolation.

use std::path::{Path, PathBuf};

use retroasm::driver::{self, AssembleOptions, Equation};
use tempfile::tempdir;

fn write_source(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn psx_li_expands_to_one_instruction_for_a_small_immediate_and_two_for_a_large_one() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let src = format!(
        ".psx\n.create \"{}\", 0\nli $t0, 5\nli $t1, 0x12345678\n.close\n",
        out_path.display()
    );
    let input = write_source(dir.path(), "main.asm", &src);
    let report = driver::run(&input, AssembleOptions::default()).unwrap();
    assert!(report.success, "{:?}", report.messages);
    let bytes = std::fs::read(&out_path).unwrap();
    // addiu $t0, $zero, 5 (4 bytes) + lui/addiu pair for the 32-bit immediate (8 bytes)
    assert_eq!(bytes.len(), 12);
}

#[test]
fn li_with_a_forward_referenced_immediate_takes_the_unconditional_two_instruction_form() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    // `li`'s arm is chosen once, at parse time, before `forward` has a
    // value yet -- so it can't know the immediate will turn out to fit in
    // 16 bits, and falls back to the unconditional lui/addiu pair.
    let src = format!(
        ".psx\n.create \"{}\", 0\nli $t0, forward\nforward:\n.word 0\n.close\n",
        out_path.display()
    );
    let input = write_source(dir.path(), "main.asm", &src);
    let report = driver::run(&input, AssembleOptions::default()).unwrap();
    assert!(report.success, "{:?}", report.messages);
    assert_eq!(std::fs::read(&out_path).unwrap().len(), 8 + 4);
}

#[test]
fn area_with_a_fill_value_pads_out_to_its_declared_size() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let src = format!(".create \"{}\", 0\n.area 4, 0\n.byte 1, 2\n.endarea\n.close\n", out_path.display());
    let input = write_source(dir.path(), "main.asm", &src);
    let report = driver::run(&input, AssembleOptions::default()).unwrap();
    assert!(report.success, "{:?}", report.messages);
    assert_eq!(std::fs::read(&out_path).unwrap(), vec![1, 2, 0, 0]);
}

#[test]
fn area_without_a_fill_value_shrinks_to_its_body_size() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let src = format!(".create \"{}\", 0\n.area 4\n.byte 1, 2\n.endarea\n.close\n", out_path.display());
    let input = write_source(dir.path(), "main.asm", &src);
    let report = driver::run(&input, AssembleOptions::default()).unwrap();
    assert!(report.success, "{:?}", report.messages);
    assert_eq!(std::fs::read(&out_path).unwrap(), vec![1, 2]);
}

#[test]
fn area_overflow_fails_the_run() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let src = format!(".create \"{}\", 0\n.area 2\n.byte 1, 2, 3\n.endarea\n.close\n", out_path.display());
    let input = write_source(dir.path(), "main.asm", &src);
    let result = driver::run(&input, AssembleOptions::default());
    assert!(result.is_err());
}

#[test]
fn macro_call_expands_its_body_with_substituted_parameters() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let src = format!(
        ".psx\n.create \"{}\", 0\n.macro loadpair, ra, rb\nli ra, 1\nli rb, 2\n.endmacro\nloadpair $t0, $t1\n.close\n",
        out_path.display()
    );
    let input = write_source(dir.path(), "main.asm", &src);
    let report = driver::run(&input, AssembleOptions::default()).unwrap();
    assert!(report.success, "{:?}", report.messages);
    assert_eq!(std::fs::read(&out_path).unwrap().len(), 8);
}

#[test]
fn org_jump_is_reflected_in_the_temp_listing_address() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let temp_path = dir.path().join("out.lst");
    let src = format!(".psx\n.create \"{}\", 0\n.org 0x80010000\nli $t0, 1\n.close\n", out_path.display());
    let input = write_source(dir.path(), "main.asm", &src);
    let options = AssembleOptions { temp_path: Some(temp_path.clone()), ..Default::default() };
    let report = driver::run(&input, options).unwrap();
    assert!(report.success, "{:?}", report.messages);
    let listing = std::fs::read_to_string(&temp_path).unwrap();
    assert!(listing.contains("80010000"));
}

#[test]
fn sym_file_records_a_defined_label_at_its_real_address() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let sym_path = dir.path().join("out.sym");
    let src = format!(".psx\n.create \"{}\", 0\n.org 0x80010000\nstart:\nli $t0, 1\n.close\n", out_path.display());
    let input = write_source(dir.path(), "main.asm", &src);
    let options = AssembleOptions { sym_path: Some(sym_path.clone()), ..Default::default() };
    let report = driver::run(&input, options).unwrap();
    assert!(report.success, "{:?}", report.messages);
    let sym = std::fs::read_to_string(&sym_path).unwrap();
    assert!(sym.contains("80010000 start"));
}

#[test]
fn arm_mov_immediate_and_branch_assemble_in_sequence() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let src = format!(".arm\n.create \"{}\", 0\nmov r0, #5\nloop:\nb loop\n.close\n", out_path.display());
    let input = write_source(dir.path(), "main.asm", &src);
    let report = driver::run(&input, AssembleOptions::default()).unwrap();
    assert!(report.success, "{:?}", report.messages);
    assert_eq!(std::fs::read(&out_path).unwrap().len(), 8);
}

/// Hand-assembles a minimal ET_REL MIPS32LE object: a 4-byte `.text`
/// section and an empty `.init_array` section (no relocations, so
/// `ctor_targets()` resolves to zero entries) -- enough to exercise the
/// `.importobj` two-argument ctor-stub code path end to end without
/// needing a full relocation table.
fn write_minimal_ctor_object(dir: &Path, name: &str) -> PathBuf {
    fn push_section_header(bytes: &mut Vec<u8>, name_off: u32, sh_type: u32, flags: u32, offset: u32, size: u32) {
        let mut hdr = vec![0u8; 40];
        hdr[0..4].copy_from_slice(&name_off.to_le_bytes());
        hdr[4..8].copy_from_slice(&sh_type.to_le_bytes());
        hdr[8..12].copy_from_slice(&flags.to_le_bytes());
        hdr[16..20].copy_from_slice(&offset.to_le_bytes());
        hdr[20..24].copy_from_slice(&size.to_le_bytes());
        bytes.extend_from_slice(&hdr);
    }

    let shstrtab: &[u8] = b"\0.text\0.init_array\0.shstrtab\0";
    let text_name_off = 1u32;
    let init_name_off = 7u32;
    let shstrtab_name_off = 19u32;

    let mut bytes = vec![0u8; 52];
    bytes[0..4].copy_from_slice(b"\x7FELF");
    bytes[4] = 1; // ELFCLASS32
    bytes[5] = 1; // little-endian
    bytes[16..18].copy_from_slice(&1u16.to_le_bytes()); // e_type = ET_REL
    bytes[18..20].copy_from_slice(&8u16.to_le_bytes()); // e_machine = EM_MIPS

    let text_off = bytes.len() as u32;
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    let init_off = bytes.len() as u32;
    // .init_array carries no data -- zero relocatable entries.
    let shstrtab_off = bytes.len() as u32;
    bytes.extend_from_slice(shstrtab);

    let shoff = bytes.len() as u32;
    push_section_header(&mut bytes, 0, 0, 0, 0, 0);
    push_section_header(&mut bytes, text_name_off, 1, 0x6, text_off, 4);
    push_section_header(&mut bytes, init_name_off, 14, 0x2, init_off, 0);
    push_section_header(&mut bytes, shstrtab_name_off, 0, 0, shstrtab_off, shstrtab.len() as u32);

    bytes[32..36].copy_from_slice(&shoff.to_le_bytes());
    bytes[46..48].copy_from_slice(&40u16.to_le_bytes());
    bytes[48..50].copy_from_slice(&4u16.to_le_bytes());
    bytes[50..52].copy_from_slice(&3u16.to_le_bytes()); // e_shstrndx

    let path = dir.join(name);
    std::fs::write(&path, &bytes).unwrap();
    path
}

#[test]
fn importobj_with_a_ctor_name_generates_a_callable_entry_point() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let sym_path = dir.path().join("out.sym");
    write_minimal_ctor_object(dir.path(), "obj.o");
    let src = format!(
        ".psx\n.create \"{}\", 0\n.importobj \"obj.o\", \"ctorInit\"\n.close\n",
        out_path.display()
    );
    let input = write_source(dir.path(), "main.asm", &src);
    let options = AssembleOptions { sym_path: Some(sym_path.clone()), ..Default::default() };
    let report = driver::run(&input, options).unwrap();
    assert!(report.success, "{:?}", report.messages);
    // 4 bytes of relocated `.text`, plus the stub's `jr $ra` / delay-slot `nop`.
    assert_eq!(std::fs::read(&out_path).unwrap().len(), 12);
    let sym = std::fs::read_to_string(&sym_path).unwrap();
    assert!(sym.contains("ctorInit"));
}

#[test]
fn two_calls_to_the_same_macro_get_distinct_renamed_global_labels() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let sym_path = dir.path().join("out.sym");
    let src = format!(
        ".psx\n.create \"{}\", 0\n.macro saferet\nloop:\nnop\nb loop\n.endmacro\nsaferet\nsaferet\n.close\n",
        out_path.display()
    );
    let input = write_source(dir.path(), "main.asm", &src);
    let options = AssembleOptions { sym_path: Some(sym_path.clone()), ..Default::default() };
    let report = driver::run(&input, options).unwrap();
    assert!(report.success, "{:?}", report.messages);
    let sym = std::fs::read_to_string(&sym_path).unwrap();
    assert!(sym.contains("saferet_loop_00000000"));
    assert!(sym.contains("saferet_loop_00000001"));
}

#[test]
fn preloaded_strequ_is_visible_as_a_string_literal() {
    let dir = tempdir().unwrap();
    let out_path = dir.path().join("out.bin");
    let src = format!(".create \"{}\", 0\n.ascii GREETING\n.close\n", out_path.display());
    let input = write_source(dir.path(), "main.asm", &src);
    let options = AssembleOptions {
        equations: vec![Equation { name: "GREETING".to_string(), value: "hi".to_string(), quoted: true }],
        ..Default::default()
    };
    let report = driver::run(&input, options).unwrap();
    assert!(report.success, "{:?}", report.messages);
    assert_eq!(std::fs::read(&out_path).unwrap(), b"hi");
}
