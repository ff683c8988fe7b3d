//! Output file abstraction and the manager that tracks the active one.
//!
//! A file exposes virtual vs. physical addressing split by a header size,
//! and the manager applies the process-wide endianness toggle on every
//! multi-byte write so backends never have to think about it.

use std::fs;
use std::path::{Path, PathBuf};

use crate::byte_array::{ByteArray, Endianness};
use crate::error::{Error, Result};

/// How an output file was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Seek into and overwrite bytes of an existing file.
    Open,
    /// Truncate (or create) the file.
    Create,
    /// Copy an input file's bytes to the output path, then modify in place.
    Copy,
}

/// One addressable output target. The *generic* variant is a plain on-disk
/// file; `Memory` is reserved for embedding scenarios that map virtual
/// addresses straight onto live process memory and is not reachable from
/// the CLI driver, only from library callers who construct one directly.
pub enum AssemblerFile {
    Generic(GenericFile),
    Memory(MemoryFile),
}

impl AssemblerFile {
    pub fn is_open(&self) -> bool {
        match self {
            AssemblerFile::Generic(f) => f.is_open,
            AssemblerFile::Memory(f) => f.is_open,
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            AssemblerFile::Generic(f) => f.close(),
            AssemblerFile::Memory(f) => {
                f.is_open = false;
                Ok(())
            }
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            AssemblerFile::Generic(f) => &f.path_display,
            AssemblerFile::Memory(_) => "<memory>",
        }
    }

    pub fn header_size(&self) -> i64 {
        match self {
            AssemblerFile::Generic(f) => f.header_size,
            AssemblerFile::Memory(f) => f.header_size,
        }
    }

    pub fn set_header_size(&mut self, header_size: i64) {
        match self {
            AssemblerFile::Generic(f) => {
                let physical = f.virtual_address - f.header_size;
                f.header_size = header_size;
                f.virtual_address = physical + header_size;
            }
            AssemblerFile::Memory(f) => f.header_size = header_size,
        }
    }

    pub fn virtual_address(&self) -> i64 {
        match self {
            AssemblerFile::Generic(f) => f.virtual_address,
            AssemblerFile::Memory(f) => f.virtual_address,
        }
    }

    pub fn physical_address(&self) -> i64 {
        self.virtual_address() - self.header_size()
    }

    pub fn seek_virtual(&mut self, address: i64) {
        match self {
            AssemblerFile::Generic(f) => f.virtual_address = address,
            AssemblerFile::Memory(f) => f.virtual_address = address,
        }
    }

    pub fn seek_physical(&mut self, address: i64) {
        let header = self.header_size();
        self.seek_virtual(address + header);
    }

    pub fn has_fixed_virtual_address(&self) -> bool {
        matches!(self, AssemblerFile::Memory(_))
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            AssemblerFile::Generic(f) => f.write_bytes(bytes),
            AssemblerFile::Memory(f) => {
                f.data.extend_from_slice(bytes);
                f.virtual_address += bytes.len() as i64;
                Ok(())
            }
        }
    }
}

/// An on-disk output, buffered in memory until [`GenericFile::close`].
pub struct GenericFile {
    path: PathBuf,
    path_display: String,
    mode: OpenMode,
    data: ByteArray,
    header_size: i64,
    virtual_address: i64,
    is_open: bool,
}

impl GenericFile {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, header_size: i64, copy_from: Option<&Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match mode {
            OpenMode::Open => {
                let bytes = fs::read(&path).map_err(|e| Error::ReadError { path: path.display().to_string(), reason: e.to_string() })?;
                ByteArray::from(bytes)
            }
            OpenMode::Create => ByteArray::new(),
            OpenMode::Copy => {
                let source = copy_from.ok_or_else(|| Error::Other("`.open` in copy mode requires a source path".to_string()))?;
                let bytes = fs::read(source).map_err(|e| Error::ReadError { path: source.display().to_string(), reason: e.to_string() })?;
                ByteArray::from(bytes)
            }
        };
        Ok(GenericFile {
            path_display: path.display().to_string(),
            path,
            mode,
            data,
            header_size,
            virtual_address: header_size,
            is_open: true,
        })
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let offset = self.physical_offset();
        self.data.write_at(offset, bytes);
        self.virtual_address += bytes.len() as i64;
        Ok(())
    }

    fn physical_offset(&self) -> usize {
        (self.virtual_address - self.header_size).max(0) as usize
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.data.save(&self.path).map_err(|e| Error::WriteError { path: self.path.display().to_string(), reason: e.to_string() })?;
        self.is_open = false;
        Ok(())
    }
}

/// Maps virtual addresses directly onto a plain byte buffer, for library
/// callers that want assembled output without going through the filesystem.
pub struct MemoryFile {
    data: Vec<u8>,
    header_size: i64,
    virtual_address: i64,
    is_open: bool,
}

impl MemoryFile {
    pub fn new(base_address: i64) -> Self {
        MemoryFile { data: Vec::new(), header_size: 0, virtual_address: base_address, is_open: true }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Holds the file stack and the one currently active entry; applies the
/// process-wide endianness toggle to every multi-byte write.
pub struct FileManager {
    stack: Vec<AssemblerFile>,
    endianness: Endianness,
}

impl FileManager {
    pub fn new() -> Self {
        FileManager { stack: Vec::new(), endianness: Endianness::Little }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    pub fn push(&mut self, file: AssemblerFile) {
        self.stack.push(file);
    }

    pub fn close_active(&mut self) -> Result<()> {
        if let Some(mut file) = self.stack.pop() {
            file.close()?;
        }
        Ok(())
    }

    pub fn active(&self) -> Option<&AssemblerFile> {
        self.stack.last()
    }

    pub fn active_mut(&mut self) -> Result<&mut AssemblerFile> {
        self.stack.last_mut().ok_or(Error::NoActiveFile)
    }

    pub fn has_active(&self) -> bool {
        self.stack.last().is_some()
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.active_mut()?.write_bytes(bytes)
    }

    fn write_multi_byte(&mut self, le_bytes: &[u8]) -> Result<()> {
        if self.endianness == Endianness::Big {
            let mut reversed = le_bytes.to_vec();
            reversed.reverse();
            self.write_bytes(&reversed)
        } else {
            self.write_bytes(le_bytes)
        }
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_multi_byte(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_multi_byte(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_multi_byte(&value.to_le_bytes())
    }

    pub fn virtual_address(&self) -> i64 {
        self.active().map(|f| f.virtual_address()).unwrap_or(0)
    }

    pub fn physical_address(&self) -> i64 {
        self.active().map(|f| f.physical_address()).unwrap_or(0)
    }

    pub fn header_size(&self) -> i64 {
        self.active().map(|f| f.header_size()).unwrap_or(0)
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_mode_starts_empty_and_tracks_virtual_address() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let file = GenericFile::open(&path, OpenMode::Create, 0x100, None).unwrap();
        assert_eq!(file.virtual_address(), 0x100);
        assert_eq!(file.physical_address(), 0);
    }

    #[test]
    fn header_size_change_preserves_physical_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut manager = FileManager::new();
        manager.push(AssemblerFile::Generic(GenericFile::open(&path, OpenMode::Create, 0x100, None).unwrap()));
        manager.write_bytes(&[0u8; 16]).unwrap();
        let physical_before = manager.physical_address();
        manager.active_mut().unwrap().set_header_size(0x200);
        assert_eq!(manager.physical_address(), physical_before);
    }

    #[test]
    fn big_endian_manager_byte_swaps_multi_byte_writes() {
        let mut memory = MemoryFile::new(0);
        let mut manager = FileManager::new();
        manager.set_endianness(Endianness::Big);
        manager.push(AssemblerFile::Memory(std::mem::replace(&mut memory, MemoryFile::new(0))));
        manager.write_u32(0x1122_3344).unwrap();
        if let AssemblerFile::Memory(f) = manager.stack.pop().unwrap() {
            assert_eq!(f.into_bytes(), vec![0x11, 0x22, 0x33, 0x44]);
        } else {
            panic!("expected memory file");
        }
    }
}
