use std::io::{Read, Write};
use std::path::Path;

use crate::error::{FsError, FsResult};
use crate::structures::dirent::{
    DirEntry, ENTRY_DELETED, ENTRY_TOMBSTONE, FilePerm, KIND_REGULAR, now,
};
use crate::structures::fat::constants::{FAT_EOC, FAT_FREE};
use crate::table::{OpenFile, OpenFileTable, OpenMode, STDERR_FD, STDIN_FD, STDOUT_FD};
use crate::volume::{DirLookup, Volume};

/// A kernel file descriptor: an index into the global open-file table.
pub type Fd = usize;

/// Origin for [`FatFs::lseek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// A mounted PennFAT filesystem: the volume plus the kernel-global open-file
/// table. All kernel file operations live here.
///
/// Descriptors 0/1/2 are reserved shortcuts for the host standard streams;
/// reads on 0 come from host stdin and writes on 1/2 go to host stdout and
/// stderr. They are never promoted to FAT files.
pub struct FatFs {
    vol: Volume,
    table: OpenFileTable,
}

impl FatFs {
    /// Format a fresh image. See [`Volume::format`].
    pub fn format(path: &Path, blocks_in_fat: u8, block_size_code: u8) -> FsResult<()> {
        Volume::format(path, blocks_in_fat, block_size_code)
    }

    /// Mount an image: open it read-write, validate and load the FAT, and
    /// initialize the open-file table with the reserved standard streams.
    pub fn mount(path: &Path) -> FsResult<Self> {
        let vol = Volume::open(path)?;
        tracing::debug!(image = %path.display(), "mounted PennFAT image");
        Ok(Self {
            vol,
            table: OpenFileTable::new(),
        })
    }

    /// Tear down the open-file table and release the image.
    pub fn unmount(self) -> FsResult<()> {
        drop(self.table);
        drop(self.vol);
        Ok(())
    }

    pub fn volume(&self) -> &Volume {
        &self.vol
    }

    pub fn table(&self) -> &OpenFileTable {
        &self.table
    }

    /// Open (or create) `name` and install a handle in the global table.
    pub fn open(&mut self, name: &str, mode: OpenMode) -> FsResult<Fd> {
        if mode != OpenMode::READ && mode != OpenMode::WRITE && mode != OpenMode::APPEND {
            return Err(FsError::InvalidArgument);
        }
        if !self.table.has_free_slot() {
            return Err(FsError::TableFull);
        }

        let (found, offset) = match self.vol.lookup(name)? {
            DirLookup::Found(offset) => (true, offset),
            DirLookup::Vacant(offset) => (false, offset),
            // Directory full: grow the root by one block and use its first slot.
            DirLookup::NoSpace => (false, self.vol.extend_root()?),
        };

        if found && mode.can_write() && self.table.write_opened(name) {
            return Err(FsError::Busy);
        }

        let file = if mode == OpenMode::READ {
            self.open_read(name, offset, found)?
        } else if mode == OpenMode::WRITE {
            self.open_write(name, offset, found)?
        } else {
            self.open_append(name, offset, found)?
        };
        self.table.insert(file)
    }

    fn open_read(&mut self, name: &str, offset: u64, found: bool) -> FsResult<OpenFile> {
        if !found {
            return Err(FsError::NotFound);
        }
        let entry = self.vol.read_dirent(offset)?;
        if !entry.is_regular() {
            return Err(FsError::NotARegularFile);
        }
        if !entry.perm().contains(FilePerm::READ) {
            return Err(FsError::PermissionDenied);
        }
        Ok(OpenFile {
            name: name.to_string(),
            size: entry.size,
            perm: entry.perm(),
            first_block: entry.first_block,
            dirent_offset: offset,
            offset: 0,
            mode: OpenMode::READ,
        })
    }

    fn open_write(&mut self, name: &str, offset: u64, found: bool) -> FsResult<OpenFile> {
        let entry = if !found {
            let entry = DirEntry::new_regular(name)?;
            self.vol.write_dirent(offset, &entry)?;
            entry
        } else {
            let mut entry = self.vol.read_dirent(offset)?;
            if !entry.is_regular() {
                return Err(FsError::NotARegularFile);
            }
            if !entry.perm().contains(FilePerm::WRITE) {
                return Err(FsError::PermissionDenied);
            }
            if entry.size > 0 {
                // Truncate: release the chain and reset the entry on disk.
                self.vol.free_chain(entry.first_block)?;
                entry.size = 0;
                entry.first_block = 0;
                entry.touch();
                self.vol.write_dirent(offset, &entry)?;
            }
            entry
        };

        Ok(OpenFile {
            name: name.to_string(),
            size: 0,
            perm: entry.perm(),
            first_block: entry.first_block,
            dirent_offset: offset,
            offset: 0,
            mode: OpenMode::WRITE,
        })
    }

    fn open_append(&mut self, name: &str, offset: u64, found: bool) -> FsResult<OpenFile> {
        let entry = if !found {
            let entry = DirEntry::new_regular(name)?;
            self.vol.write_dirent(offset, &entry)?;
            entry
        } else {
            let entry = self.vol.read_dirent(offset)?;
            if !entry.is_regular() {
                return Err(FsError::NotARegularFile);
            }
            if !entry.perm().contains(FilePerm::WRITE) {
                return Err(FsError::PermissionDenied);
            }
            entry
        };

        Ok(OpenFile {
            name: name.to_string(),
            size: entry.size,
            perm: entry.perm(),
            first_block: entry.first_block,
            dirent_offset: offset,
            // All appended writes start at the current end of the file.
            offset: entry.size as u64,
            mode: OpenMode::APPEND,
        })
    }

    /// Read up to `buf.len()` bytes at the handle's offset, advancing it by
    /// the number of bytes actually read. Descriptor 0 delegates to host
    /// stdin. Returns 0 at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> FsResult<usize> {
        if fd == STDIN_FD {
            return Ok(std::io::stdin().read(buf)?);
        }

        let file = self.table.get(fd).ok_or(FsError::BadDescriptor)?;
        if !file.mode.can_read() {
            return Err(FsError::PermissionDenied);
        }

        let start = file.offset;
        let size = file.size as u64;
        if start >= size || buf.is_empty() {
            return Ok(0);
        }
        let wanted = (buf.len() as u64).min(size - start) as usize;

        let block_size = self.vol.layout().block_size() as u64;
        let mut block = file.first_block;
        let mut in_block = start % block_size;

        // A never-written file extended only by lseek has no chain to read.
        if block == FAT_FREE {
            return Ok(0);
        }
        for _ in 0..start / block_size {
            block = self.vol.fat().get(block);
            if block == FAT_EOC || block == FAT_FREE {
                return Err(FsError::InvalidOffset);
            }
        }

        let mut total = 0;
        while total < wanted {
            if block == FAT_EOC || block == FAT_FREE {
                break;
            }
            let take = ((block_size - in_block) as usize).min(wanted - total);
            let disk = self.vol.block_offset(block) + in_block;
            self.vol.read_at(disk, &mut buf[total..total + take])?;
            total += take;
            if total < wanted {
                block = self.vol.fat().get(block);
                in_block = 0;
            }
        }

        if let Some(file) = self.table.get_mut(fd) {
            file.offset += total as u64;
        }
        Ok(total)
    }

    /// Write `buf` at the handle's offset, extending the chain (and the file
    /// size) as needed. Descriptors 1/2 delegate to host stdout/stderr. When
    /// the volume fills up mid-write the short count is returned.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> FsResult<usize> {
        if fd == STDOUT_FD || fd == STDERR_FD {
            let mut out: Box<dyn Write> = if fd == STDOUT_FD {
                Box::new(std::io::stdout())
            } else {
                Box::new(std::io::stderr())
            };
            out.write_all(buf)?;
            out.flush()?;
            return Ok(buf.len());
        }

        let file = self.table.get(fd).ok_or(FsError::BadDescriptor)?;
        if !file.mode.can_write() {
            return Err(FsError::PermissionDenied);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let start = file.offset;
        let old_size = file.size;
        let block_size = self.vol.layout().block_size() as u64;
        let mut block = file.first_block;
        let mut first_block = file.first_block;

        let block_index = start / block_size;
        let mut in_block = start % block_size;

        // When the offset sits exactly on a block boundary and the previous
        // block is the chain's tail, stay on the tail with its cursor at the
        // end so the loop below grows the chain instead of walking off it.
        let at_boundary = in_block == 0 && start > 0;
        if block != FAT_FREE {
            let mut step = 0;
            while step < block_index {
                if at_boundary && step == block_index - 1 && self.vol.fat().get(block) == FAT_EOC {
                    in_block = block_size;
                    break;
                }
                block = self.vol.fat().get(block);
                if block == FAT_EOC || block == FAT_FREE {
                    return Err(FsError::InvalidOffset);
                }
                step += 1;
            }
        }

        let mut total = 0;
        let mut disk_full = false;
        while total < buf.len() {
            if block == FAT_FREE || in_block == block_size {
                let Some(next) = self.vol.find_free_block() else {
                    disk_full = true;
                    break;
                };
                if block == FAT_FREE {
                    // First block of the file; the dirent sync below records it.
                    first_block = next;
                } else {
                    self.vol.fat_set(block, next)?;
                }
                block = next;
                self.vol.fat_set(block, FAT_EOC)?;
                in_block = 0;
            }

            let take = ((block_size - in_block) as usize).min(buf.len() - total);
            let disk = self.vol.block_offset(block) + in_block;
            self.vol.write_at(disk, &buf[total..total + take])?;
            total += take;
            in_block += take as u64;
        }

        let mut dirty = false;
        if let Some(file) = self.table.get_mut(fd) {
            if file.first_block != first_block {
                file.first_block = first_block;
                dirty = true;
            }
            file.offset += total as u64;
            if file.offset > old_size as u64 {
                file.size = file.offset as u32;
                dirty = true;
            }
        }
        if dirty {
            self.sync_dirent(fd)?;
        }
        if disk_full {
            tracing::warn!(fd, written = total, "disk full, short write");
        }
        Ok(total)
    }

    /// Write the handle's cached `first_block`/`size` back to its directory
    /// entry, refreshing the modification time.
    fn sync_dirent(&mut self, fd: Fd) -> FsResult<()> {
        let Some(file) = self.table.get(fd) else {
            return Ok(());
        };
        let mut entry = self.vol.read_dirent(file.dirent_offset)?;
        entry.first_block = file.first_block;
        entry.size = file.size;
        entry.mtime = now();
        self.vol.write_dirent(file.dirent_offset, &entry)
    }

    /// Compute a new handle position. Seeking past the cached size on a
    /// writable handle bumps the cached size; the disk allocation happens on
    /// the next write and the dirent sync on close.
    pub fn lseek(&mut self, fd: Fd, offset: i64, whence: Whence) -> FsResult<u64> {
        let file = self.table.get_mut(fd).ok_or(FsError::BadDescriptor)?;
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => file.offset as i64,
            Whence::End => file.size as i64,
        };
        let new_pos = base + offset;
        if new_pos < 0 {
            return Err(FsError::InvalidOffset);
        }
        let new_pos = new_pos as u64;
        if new_pos > file.size as u64 && file.mode.can_write() {
            file.size = new_pos as u32;
        }
        file.offset = new_pos;
        Ok(new_pos)
    }

    /// Close a descriptor. For regular files the handle leaves the table
    /// first, then writable metadata is synced; if the entry was unlinked
    /// while open and this was the last reference, the chain is freed and the
    /// entry becomes truly deleted.
    pub fn close(&mut self, fd: Fd) -> FsResult<()> {
        let file = self.table.remove(fd).ok_or(FsError::BadDescriptor)?;
        if fd <= STDERR_FD {
            return Ok(());
        }

        let mut entry = self.vol.read_dirent(file.dirent_offset)?;
        if file.mode.can_write() {
            entry.size = file.size;
            entry.mtime = now();
        }
        if entry.state() == ENTRY_TOMBSTONE && !self.table.references(file.dirent_offset) {
            self.vol.free_chain(entry.first_block)?;
            entry.name[0] = ENTRY_DELETED;
        }
        self.vol.write_dirent(file.dirent_offset, &entry)
    }

    /// Remove `name` from the namespace. With live handles the entry is only
    /// tombstoned; the blocks are released by the last close.
    pub fn unlink(&mut self, name: &str) -> FsResult<()> {
        let DirLookup::Found(offset) = self.vol.lookup(name)? else {
            return Err(FsError::NotFound);
        };
        let mut entry = self.vol.read_dirent(offset)?;
        if entry.is_directory() {
            return Err(FsError::NotARegularFile);
        }

        if self.table.references(offset) {
            entry.name[0] = ENTRY_TOMBSTONE;
        } else {
            self.vol.free_chain(entry.first_block)?;
            entry.name[0] = ENTRY_DELETED;
        }
        self.vol.write_dirent(offset, &entry)
    }

    /// Rename `src` to `dest` in place: no block movement, mtime refreshed.
    /// An existing `dest` is unlinked first (it must be writable).
    pub fn rename(&mut self, src: &str, dest: &str) -> FsResult<()> {
        let DirLookup::Found(src_offset) = self.vol.lookup(src)? else {
            return Err(FsError::NotFound);
        };
        let mut entry = self.vol.read_dirent(src_offset)?;
        if !entry.perm().contains(FilePerm::READ) {
            return Err(FsError::PermissionDenied);
        }
        entry.set_name(dest)?;
        entry.touch();

        if let DirLookup::Found(dest_offset) = self.vol.lookup(dest)? {
            let dest_entry = self.vol.read_dirent(dest_offset)?;
            if !dest_entry.perm().contains(FilePerm::WRITE) {
                return Err(FsError::PermissionDenied);
            }
            self.unlink(dest)?;
        }

        self.vol.write_dirent(src_offset, &entry)
    }

    /// Update permission bits via the packed chmod op-byte.
    pub fn chmod(&mut self, name: &str, op: u8) -> FsResult<()> {
        let DirLookup::Found(offset) = self.vol.lookup(name)? else {
            return Err(FsError::NotFound);
        };
        let mut entry = self.vol.read_dirent(offset)?;
        entry.apply_chmod(op);
        self.vol.write_dirent(offset, &entry)
    }

    /// Probe the execute bit, as the shell does before running a script.
    pub fn check_executable(&self, name: &str) -> FsResult<()> {
        let DirLookup::Found(offset) = self.vol.lookup(name)? else {
            return Err(FsError::NotFound);
        };
        let entry = self.vol.read_dirent(offset)?;
        if entry.kind != KIND_REGULAR {
            return Err(FsError::NotARegularFile);
        }
        if !entry.perm().contains(FilePerm::EXEC) {
            return Err(FsError::PermissionDenied);
        }
        Ok(())
    }

    /// Directory listing: with a name, just that entry; without, every live
    /// entry of the root directory.
    pub fn scan_dir(&mut self, name: Option<&str>) -> FsResult<Vec<DirEntry>> {
        match name {
            Some(name) => {
                let DirLookup::Found(offset) = self.vol.lookup(name)? else {
                    return Err(FsError::NotFound);
                };
                Ok(vec![self.vol.read_dirent(offset)?])
            }
            None => self.vol.scan_root(),
        }
    }
}
