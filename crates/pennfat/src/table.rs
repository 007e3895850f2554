use crate::error::{FsError, FsResult};
use crate::structures::dirent::FilePerm;

/// Capacity of the kernel-global open-file table.
pub const MAX_OPEN_FILES: usize = 1024;

pub const STDIN_FD: usize = 0;
pub const STDOUT_FD: usize = 1;
pub const STDERR_FD: usize = 2;

bitflags::bitflags! {
    /// Intent of an open handle. Exactly one bit is set per handle.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const APPEND = 0x04;
    }
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        self.contains(OpenMode::READ)
    }

    pub fn can_write(self) -> bool {
        self.intersects(OpenMode::WRITE | OpenMode::APPEND)
    }
}

/// A kernel-global open handle.
///
/// `size`, `perm` and `first_block` are cached from the directory entry at
/// open time and kept authoritative until close writes them back; reads and
/// writes must consult the handle, not the on-disk entry.
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub name: String,
    pub size: u32,
    pub perm: FilePerm,
    pub first_block: u16,
    /// Byte offset of the backing directory entry within the image. Handles
    /// referencing the same entry share this value; it identifies the file
    /// for the live-reference scan.
    pub dirent_offset: u64,
    /// Current position of this handle.
    pub offset: u64,
    pub mode: OpenMode,
}

/// The kernel-global open-file table: a flat slot array indexed by kernel fd.
///
/// Slots 0..=2 are pre-populated with the reserved standard streams, which
/// delegate to the host and are never promoted to FAT files.
pub struct OpenFileTable {
    slots: Vec<Option<OpenFile>>,
}

impl OpenFileTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_OPEN_FILES);
        slots.resize_with(MAX_OPEN_FILES, || None);
        slots[STDIN_FD] = Some(Self::std_stream("STDIN", OpenMode::READ));
        slots[STDOUT_FD] = Some(Self::std_stream("STDOUT", OpenMode::WRITE));
        slots[STDERR_FD] = Some(Self::std_stream("STDERR", OpenMode::WRITE));
        Self { slots }
    }

    fn std_stream(name: &str, mode: OpenMode) -> OpenFile {
        OpenFile {
            name: name.to_string(),
            size: 0,
            perm: FilePerm::empty(),
            first_block: 0,
            dirent_offset: 0,
            offset: 0,
            mode,
        }
    }

    pub fn get(&self, fd: usize) -> Option<&OpenFile> {
        self.slots.get(fd).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, fd: usize) -> Option<&mut OpenFile> {
        self.slots.get_mut(fd).and_then(Option::as_mut)
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots[3..].iter().any(Option::is_none)
    }

    /// Install a handle in the lowest free slot at or above 3.
    pub fn insert(&mut self, file: OpenFile) -> FsResult<usize> {
        let fd = self.slots[3..]
            .iter()
            .position(Option::is_none)
            .map(|i| i + 3)
            .ok_or(FsError::TableFull)?;
        self.slots[fd] = Some(file);
        Ok(fd)
    }

    pub fn remove(&mut self, fd: usize) -> Option<OpenFile> {
        self.slots.get_mut(fd).and_then(Option::take)
    }

    /// Single-writer check: is any handle with write or append intent open
    /// for this name? The reserved streams are exempt.
    pub fn write_opened(&self, name: &str) -> bool {
        self.slots[3..]
            .iter()
            .flatten()
            .any(|of| of.name == name && of.mode.can_write())
    }

    /// Live-reference check: is this directory entry still referenced by any
    /// handle? Callers remove their own handle first so they do not count
    /// themselves.
    pub fn references(&self, dirent_offset: u64) -> bool {
        self.slots[3..]
            .iter()
            .flatten()
            .any(|of| of.dirent_offset == dirent_offset)
    }
}

impl Default for OpenFileTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str, mode: OpenMode, dirent_offset: u64) -> OpenFile {
        OpenFile {
            name: name.to_string(),
            size: 0,
            perm: FilePerm::READ | FilePerm::WRITE,
            first_block: 0,
            dirent_offset,
            offset: 0,
            mode,
        }
    }

    #[test]
    fn reserves_standard_streams() {
        let table = OpenFileTable::new();
        assert_eq!(table.get(STDIN_FD).unwrap().mode, OpenMode::READ);
        assert_eq!(table.get(STDOUT_FD).unwrap().mode, OpenMode::WRITE);
        assert_eq!(table.get(STDERR_FD).unwrap().mode, OpenMode::WRITE);
        assert!(table.get(3).is_none());
    }

    #[test]
    fn allocates_lowest_free_slot() {
        let mut table = OpenFileTable::new();
        let a = table.insert(handle("a", OpenMode::READ, 256)).unwrap();
        let b = table.insert(handle("b", OpenMode::READ, 320)).unwrap();
        assert_eq!((a, b), (3, 4));
        table.remove(a);
        assert_eq!(table.insert(handle("c", OpenMode::READ, 384)).unwrap(), 3);
    }

    #[test]
    fn fills_up() {
        let mut table = OpenFileTable::new();
        for i in 3..MAX_OPEN_FILES {
            table
                .insert(handle(&format!("f{i}"), OpenMode::READ, i as u64))
                .unwrap();
        }
        assert!(!table.has_free_slot());
        assert!(matches!(
            table.insert(handle("overflow", OpenMode::READ, 0)),
            Err(FsError::TableFull)
        ));
    }

    #[test]
    fn single_writer_scan() {
        let mut table = OpenFileTable::new();
        table.insert(handle("f", OpenMode::READ, 256)).unwrap();
        assert!(!table.write_opened("f"));
        let wr = table.insert(handle("f", OpenMode::APPEND, 256)).unwrap();
        assert!(table.write_opened("f"));
        table.remove(wr);
        assert!(!table.write_opened("f"));
    }

    #[test]
    fn reference_scan_ignores_removed_handles() {
        let mut table = OpenFileTable::new();
        let fd = table.insert(handle("f", OpenMode::WRITE, 256)).unwrap();
        assert!(table.references(256));
        table.remove(fd);
        assert!(!table.references(256));
    }
}
