//! Encoding-detecting text reader for assembly source files.
//!
//! BOM-sniffs UTF-8/UTF-16LE/UTF-16BE; falls back to ASCII, or to a
//! caller-specified codec (currently Shift-JIS) when no BOM is present.

use std::fs;
use std::path::Path;

use encoding_rs::{SHIFT_JIS, UTF_16BE, UTF_16LE, WINDOWS_1252};

use crate::error::{Error, Result};

/// A detected or requested source text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    ShiftJis,
    Ascii,
}

/// The decoded contents of one source file plus how it was decoded.
pub struct TextFile {
    pub contents: String,
    pub encoding: SourceEncoding,
}

impl TextFile {
    pub fn read(path: impl AsRef<Path>, requested: Option<SourceEncoding>) -> Result<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|e| Error::ReadError {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::decode(&bytes, requested))
    }

    pub fn decode(bytes: &[u8], requested: Option<SourceEncoding>) -> Self {
        if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
            let contents = String::from_utf8_lossy(&bytes[3..]).into_owned();
            return TextFile { contents, encoding: SourceEncoding::Utf8 };
        }
        if bytes.starts_with(&[0xFF, 0xFE]) {
            let (decoded, _, _) = UTF_16LE.decode(&bytes[2..]);
            return TextFile { contents: decoded.into_owned(), encoding: SourceEncoding::Utf16Le };
        }
        if bytes.starts_with(&[0xFE, 0xFF]) {
            let (decoded, _, _) = UTF_16BE.decode(&bytes[2..]);
            return TextFile { contents: decoded.into_owned(), encoding: SourceEncoding::Utf16Be };
        }
        match requested {
            Some(SourceEncoding::ShiftJis) => {
                let (decoded, _, _) = SHIFT_JIS.decode(bytes);
                TextFile { contents: decoded.into_owned(), encoding: SourceEncoding::ShiftJis }
            }
            Some(SourceEncoding::Utf16Le) => {
                let (decoded, _, _) = UTF_16LE.decode(bytes);
                TextFile { contents: decoded.into_owned(), encoding: SourceEncoding::Utf16Le }
            }
            Some(SourceEncoding::Utf16Be) => {
                let (decoded, _, _) = UTF_16BE.decode(bytes);
                TextFile { contents: decoded.into_owned(), encoding: SourceEncoding::Utf16Be }
            }
            _ => match std::str::from_utf8(bytes) {
                Ok(s) => TextFile { contents: s.to_string(), encoding: SourceEncoding::Utf8 },
                Err(_) => {
                    // Not valid UTF-8 and not BOM-tagged: fall back to a
                    // single-byte Western codec rather than losing bytes.
                    let (decoded, _, _) = WINDOWS_1252.decode(bytes);
                    TextFile { contents: decoded.into_owned(), encoding: SourceEncoding::Ascii }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"hello");
        let file = TextFile::decode(&bytes, None);
        assert_eq!(file.encoding, SourceEncoding::Utf8);
        assert_eq!(file.contents, "hello");
    }

    #[test]
    fn detects_utf16le_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for c in "hi".encode_utf16() {
            bytes.extend_from_slice(&c.to_le_bytes());
        }
        let file = TextFile::decode(&bytes, None);
        assert_eq!(file.encoding, SourceEncoding::Utf16Le);
        assert_eq!(file.contents, "hi");
    }

    #[test]
    fn plain_ascii_has_no_bom() {
        let file = TextFile::decode(b"nop", None);
        assert_eq!(file.encoding, SourceEncoding::Utf8);
        assert_eq!(file.contents, "nop");
    }
}
