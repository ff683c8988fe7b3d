//! no$-format symbol file and pretty-printed temp listing output.
//!
//! Both are built from the [`crate::command::EncodeSink`] a driver asks
//! `encode` to fill: its records already carry real addresses (from
//! `ctx.files.virtual_address()` at encode time), so `.org` jumps and
//! multi-file scripts are reflected correctly instead of re-deriving
//! addresses from a flat sum of node sizes.

use std::fs;
use std::path::Path;

use crate::command::EncodeSink;
use crate::error::{Error, Result};
use crate::symbol_table::SymbolTable;

/// Builds the no$ symbol file body: header line, one entry per defined
/// label and data region sorted by address then text, trailer byte.
/// `v2` appends `,SSSSSSSS` (next label's address minus this one) to
/// non-data labels and keeps their original case; `v1` lowercases names.
fn build_sym_file(symbols: &SymbolTable, sink: &EncodeSink, v2: bool) -> String {
    let mut code_addrs: Vec<i64> = symbols.all_labels().iter().filter(|l| l.defined && !l.is_data).map(|l| l.value).collect();
    code_addrs.sort_unstable();
    code_addrs.dedup();

    let mut lines: Vec<(i64, String)> = Vec::new();
    for label in symbols.all_labels().iter().filter(|l| l.defined) {
        let name = if v2 { label.original_case_name.clone() } else { label.original_case_name.to_ascii_lowercase() };
        let text = if v2 && !label.is_data {
            let size = code_addrs.iter().find(|&&a| a > label.value).map(|&next| next - label.value).unwrap_or(0);
            format!("{name},{size:08x}")
        } else {
            name
        };
        lines.push((label.value, text));
    }
    for region in &sink.data_regions {
        lines.push((region.address, format!("{}:{:04x}", region.tag, region.len)));
    }
    lines.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

    let mut out = String::from("00000000 0\n");
    for (addr, text) in lines {
        out.push_str(&format!("{addr:08x} {text}\n"));
    }
    out.push('\x1a');
    out
}

fn build_temp_listing(sink: &EncodeSink) -> String {
    let mut out = String::new();
    for entry in &sink.listing {
        out.push_str(&format!(
            "{:08x} {:<32} ; file{} line {}\n",
            entry.address, entry.text, entry.location.file_num, entry.location.line
        ));
    }
    out
}

pub fn write_sym_file(path: impl AsRef<Path>, symbols: &SymbolTable, sink: &EncodeSink, v2: bool) -> Result<()> {
    let text = build_sym_file(symbols, sink, v2);
    fs::write(path.as_ref(), text).map_err(|e| Error::WriteError { path: path.as_ref().display().to_string(), reason: e.to_string() })
}

pub fn write_temp_listing(path: impl AsRef<Path>, sink: &EncodeSink) -> Result<()> {
    let text = build_temp_listing(sink);
    fs::write(path.as_ref(), text).map_err(|e| Error::WriteError { path: path.as_ref().display().to_string(), reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{DataRegionRecord, ListingRecord};
    use crate::error::FileLine;

    fn label(symbols: &mut SymbolTable, name: &str, value: i64) {
        let idx = symbols.get_label(name, 0, 0).unwrap();
        let l = symbols.label_mut(idx);
        l.value = value;
        l.defined = true;
    }

    #[test]
    fn sym_file_has_header_and_trailer() {
        let symbols = SymbolTable::new();
        let sink = EncodeSink::default();
        let text = build_sym_file(&symbols, &sink, false);
        assert!(text.starts_with("00000000 0\n"));
        assert!(text.ends_with('\x1a'));
    }

    #[test]
    fn v2_appends_size_between_consecutive_labels() {
        let mut symbols = SymbolTable::new();
        label(&mut symbols, "start", 0x1000);
        label(&mut symbols, "next", 0x1010);
        let sink = EncodeSink::default();
        let text = build_sym_file(&symbols, &sink, true);
        assert!(text.contains("start,00000010"));
    }

    #[test]
    fn data_region_markers_are_sorted_in_with_labels() {
        let mut symbols = SymbolTable::new();
        label(&mut symbols, "table", 0x2000);
        let mut sink = EncodeSink::default();
        sink.data_regions.push(DataRegionRecord { address: 0x2000, tag: ".byt", len: 16 });
        let text = build_sym_file(&symbols, &sink, false);
        assert!(text.contains("00002000 .byt:0010"));
    }

    #[test]
    fn listing_lines_carry_file_and_line() {
        let mut sink = EncodeSink::default();
        sink.listing.push(ListingRecord { address: 0x1000, text: "nop".to_string(), location: FileLine::new(2, 7) });
        let text = build_temp_listing(&sink);
        assert!(text.contains("00001000"));
        assert!(text.contains("nop"));
        assert!(text.contains("file2 line 7"));
    }
}
