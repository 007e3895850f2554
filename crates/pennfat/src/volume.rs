use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{FsError, FsResult};
use crate::structures::dirent::{DIRENT_SIZE, DirEntry, ENTRY_DELETED, ENTRY_END, ENTRY_TOMBSTONE};
use crate::structures::fat::{Fat, Layout, constants};

/// Result of a root-directory lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirLookup {
    /// The entry exists at this image offset.
    Found(u64),
    /// Not found; this is the offset of the first reusable slot.
    Vacant(u64),
    /// Not found and every root-directory slot is taken.
    NoSpace,
}

/// A mounted PennFAT image: the backing file, its geometry, and the
/// in-memory allocation table.
///
/// FAT mutations go through [`Volume::fat_set`], which updates the in-memory
/// table and writes the entry through to the image, so the table on disk
/// always matches what other operations observe within a quantum.
pub struct Volume {
    file: File,
    layout: Layout,
    fat: Fat,
}

impl Volume {
    /// Create (or truncate) and initialize an image: packed geometry in FAT
    /// entry 0, block 1 reserved as the root directory, all other entries
    /// free. Truncating to the full size zero-fills the data region, so the
    /// root directory scan starts at an end-of-directory sentinel.
    pub fn format(path: &Path, blocks_in_fat: u8, block_size_code: u8) -> FsResult<()> {
        let layout = Layout::new(blocks_in_fat, block_size_code)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(layout.total_size())?;

        let fat = Fat::formatted(layout);
        let mut region = Vec::with_capacity(layout.fat_size());
        for entry in fat.entries() {
            region.extend_from_slice(&entry.to_le_bytes());
        }
        file.write_all_at(&region, 0)?;
        tracing::debug!(
            image = %path.display(),
            bytes = layout.total_size(),
            "formatted PennFAT image"
        );
        Ok(())
    }

    /// Open an existing image read-write, validate the geometry stored in
    /// entry 0, and load the FAT.
    pub fn open(path: &Path) -> FsResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; 2];
        file.read_exact_at(&mut header, 0)?;
        let layout = Layout::unpack(u16::from_le_bytes(header))?;

        let mut region = vec![0u8; layout.fat_size()];
        file.read_exact_at(&mut region, 0)?;
        let entries = region
            .chunks_exact(2)
            .take(layout.entry_count())
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Self {
            file,
            layout,
            fat: Fat::from_entries(entries),
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn fat(&self) -> &Fat {
        &self.fat
    }

    /// Store a FAT entry, writing it through to the image.
    pub fn fat_set(&mut self, block: u16, value: u16) -> FsResult<()> {
        self.fat.set(block, value);
        self.file
            .write_all_at(&value.to_le_bytes(), block as u64 * 2)?;
        Ok(())
    }

    pub fn find_free_block(&self) -> Option<u16> {
        self.fat.find_free()
    }

    /// Free every block of a chain starting at `first_block`. A chain head of
    /// 0 (file never allocated) is a no-op.
    pub fn free_chain(&mut self, first_block: u16) -> FsResult<()> {
        let mut block = first_block;
        while block != constants::FAT_FREE && block != constants::FAT_EOC {
            let next = self.fat.get(block);
            self.fat_set(block, constants::FAT_FREE)?;
            block = next;
        }
        Ok(())
    }

    pub fn block_offset(&self, block: u16) -> u64 {
        self.layout.block_offset(block)
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    pub fn write_at(&self, offset: u64, buf: &[u8]) -> FsResult<()> {
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    pub fn read_dirent(&self, offset: u64) -> FsResult<DirEntry> {
        let mut buf = [0u8; DIRENT_SIZE];
        self.file.read_exact_at(&mut buf, offset)?;
        // The stack buffer carries no alignment guarantee for the i64 field.
        Ok(bytemuck::pod_read_unaligned(&buf))
    }

    pub fn write_dirent(&self, offset: u64, entry: &DirEntry) -> FsResult<()> {
        self.file.write_all_at(bytemuck::bytes_of(entry), offset)?;
        Ok(())
    }

    /// Scan the root directory for `name`, walking its blocks in chain order.
    ///
    /// End-of-directory terminates the scan; deleted slots are remembered as
    /// the first reusable position; tombstoned slots occupy their position
    /// but are invisible to the lookup.
    pub fn lookup(&self, name: &str) -> FsResult<DirLookup> {
        let per_block = self.layout.block_size() / DIRENT_SIZE;
        let mut first_free = None;

        let mut block = constants::ROOT_BLOCK;
        while block != constants::FAT_EOC && block != constants::FAT_FREE {
            for slot in 0..per_block {
                let offset = self.block_offset(block) + (slot * DIRENT_SIZE) as u64;
                let entry = self.read_dirent(offset)?;
                match entry.state() {
                    ENTRY_END => {
                        return Ok(DirLookup::Vacant(first_free.unwrap_or(offset)));
                    }
                    ENTRY_DELETED => {
                        first_free.get_or_insert(offset);
                    }
                    ENTRY_TOMBSTONE => {}
                    _ => {
                        if entry.name_str() == name {
                            return Ok(DirLookup::Found(offset));
                        }
                    }
                }
            }
            block = self.fat.get(block);
        }

        Ok(match first_free {
            Some(offset) => DirLookup::Vacant(offset),
            None => DirLookup::NoSpace,
        })
    }

    /// Append one zeroed block to the root directory chain and return its
    /// image offset (the first free slot in it).
    pub fn extend_root(&mut self) -> FsResult<u64> {
        let mut tail = constants::ROOT_BLOCK;
        while self.fat.get(tail) != constants::FAT_EOC {
            tail = self.fat.get(tail);
        }

        let block = self.find_free_block().ok_or(FsError::NoSpace)?;
        self.fat_set(tail, block)?;
        self.fat_set(block, constants::FAT_EOC)?;

        // The block may hold stale data; the scan must see end-of-directory.
        let zeros = vec![0u8; self.layout.block_size()];
        let offset = self.block_offset(block);
        self.write_at(offset, &zeros)?;
        Ok(offset)
    }

    /// Every live entry of the root directory, in scan order.
    pub fn scan_root(&self) -> FsResult<Vec<DirEntry>> {
        let per_block = self.layout.block_size() / DIRENT_SIZE;
        let mut entries = Vec::new();

        let mut block = constants::ROOT_BLOCK;
        while block != constants::FAT_EOC && block != constants::FAT_FREE {
            for slot in 0..per_block {
                let offset = self.block_offset(block) + (slot * DIRENT_SIZE) as u64;
                let entry = self.read_dirent(offset)?;
                match entry.state() {
                    ENTRY_END => return Ok(entries),
                    ENTRY_DELETED | ENTRY_TOMBSTONE => {}
                    _ => entries.push(entry),
                }
            }
            block = self.fat.get(block);
        }
        Ok(entries)
    }
}
