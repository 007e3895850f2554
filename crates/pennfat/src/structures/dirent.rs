use chrono::TimeZone;

use crate::error::{FsError, FsResult};

/// Size of the name field, including the terminating NUL.
pub const NAME_LEN: usize = 32;

/// Size of a directory entry on disk.
pub const DIRENT_SIZE: usize = 64;

/// `name[0]` sentinel: this entry terminates the directory scan.
pub const ENTRY_END: u8 = 0;
/// `name[0]` sentinel: deleted, slot reusable.
pub const ENTRY_DELETED: u8 = 1;
/// `name[0]` sentinel: unlinked from the namespace but still referenced by at
/// least one open handle. Invisible to lookups, not reusable yet.
pub const ENTRY_TOMBSTONE: u8 = 2;

pub const KIND_REGULAR: u8 = 1;
pub const KIND_DIRECTORY: u8 = 2;

/// chmod op-byte: add the masked bits.
pub const CHMOD_ADD: u8 = 0x80;
/// chmod op-byte: remove the masked bits.
pub const CHMOD_REMOVE: u8 = 0x40;
/// chmod op-byte: assign the masked bits.
pub const CHMOD_ASSIGN: u8 = 0x20;
/// Valid permission bits within the op-byte.
pub const CHMOD_MASK: u8 = 0x07;

bitflags::bitflags! {
    /// Permission bits of a directory entry.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FilePerm: u8 {
        const READ = 0x04;
        const WRITE = 0x02;
        const EXEC = 0x01;
    }
}

/// A directory entry, bit-exact with the on-disk layout.
///
/// The name is NUL-terminated; `name[0]` doubles as the entry-state sentinel
/// (see [`ENTRY_END`], [`ENTRY_DELETED`], [`ENTRY_TOMBSTONE`]). `mtime` is
/// unix seconds. The trailing bytes are reserved.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DirEntry {
    pub name: [u8; NAME_LEN],
    pub size: u32,
    pub first_block: u16,
    pub kind: u8,
    pub perm: u8,
    pub mtime: i64,
    pub reserved: [u8; 16],
}

impl DirEntry {
    /// A new regular file entry: empty, read/write, no blocks allocated yet.
    pub fn new_regular(name: &str) -> FsResult<Self> {
        let mut entry = Self::zeroed();
        entry.set_name(name)?;
        entry.kind = KIND_REGULAR;
        entry.perm = (FilePerm::READ | FilePerm::WRITE).bits();
        entry.mtime = now();
        Ok(entry)
    }

    pub fn zeroed() -> Self {
        bytemuck::Zeroable::zeroed()
    }

    pub fn set_name(&mut self, name: &str) -> FsResult<()> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= NAME_LEN || bytes.contains(&0) {
            return Err(FsError::NameTooLong);
        }
        self.name = [0; NAME_LEN];
        self.name[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// The stored name, up to the first NUL. Meaningless for entries whose
    /// `name[0]` is a sentinel value.
    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn state(&self) -> u8 {
        self.name[0]
    }

    pub fn matches(&self, name: &str) -> bool {
        self.state() > ENTRY_TOMBSTONE && self.name_str() == name
    }

    pub fn is_regular(&self) -> bool {
        self.kind == KIND_REGULAR
    }

    pub fn is_directory(&self) -> bool {
        self.kind == KIND_DIRECTORY
    }

    pub fn perm(&self) -> FilePerm {
        FilePerm::from_bits_truncate(self.perm)
    }

    pub fn touch(&mut self) {
        self.mtime = now();
    }

    /// Apply a packed chmod op-byte: the high bits select add/remove/assign,
    /// the low three bits are the r/w/x mask. A bare numeric mode assigns.
    pub fn apply_chmod(&mut self, op: u8) {
        let mask = op & CHMOD_MASK;
        if op & CHMOD_ADD != 0 {
            self.perm |= mask;
        } else if op & CHMOD_REMOVE != 0 {
            self.perm &= !mask;
        } else {
            // CHMOD_ASSIGN and plain numeric modes both assign.
            self.perm = mask;
        }
        self.touch();
    }

    /// One `ls`-style line: first block (blank while unallocated), type and
    /// permission bits, size, mtime, name.
    pub fn format_line(&self) -> String {
        let block = if self.first_block == 0 {
            "      ".to_string()
        } else {
            format!("{:>5} ", self.first_block)
        };

        let mut mode = [b'-'; 4];
        if self.is_directory() {
            mode[0] = b'd';
        }
        let perm = self.perm();
        if perm.contains(FilePerm::READ) {
            mode[1] = b'r';
        }
        if perm.contains(FilePerm::WRITE) {
            mode[2] = b'w';
        }
        if perm.contains(FilePerm::EXEC) {
            mode[3] = b'x';
        }

        let time = match chrono::Local.timestamp_opt(self.mtime, 0).single() {
            Some(t) => t.format("%b %e %H:%M:%S %Y").to_string(),
            None => "???".to_string(),
        };

        format!(
            "{}{} {:>10} {} {}",
            block,
            str::from_utf8(&mode).unwrap_or("----"),
            self.size,
            time,
            self.name_str()
        )
    }
}

pub(crate) fn now() -> i64 {
    chrono::Local::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{align_of, offset_of};
    use pretty_assertions::assert_eq;
    use static_assertions::const_assert_eq;

    const_assert_eq!(size_of::<DirEntry>(), DIRENT_SIZE);
    const_assert_eq!(align_of::<DirEntry>(), 8);

    const_assert_eq!(offset_of!(DirEntry, name), 0);
    const_assert_eq!(offset_of!(DirEntry, size), 32);
    const_assert_eq!(offset_of!(DirEntry, first_block), 36);
    const_assert_eq!(offset_of!(DirEntry, kind), 38);
    const_assert_eq!(offset_of!(DirEntry, perm), 39);
    const_assert_eq!(offset_of!(DirEntry, mtime), 40);
    const_assert_eq!(offset_of!(DirEntry, reserved), 48);

    #[test]
    fn new_entry_defaults() {
        let entry = DirEntry::new_regular("hello.txt").unwrap();
        assert_eq!(entry.name_str(), "hello.txt");
        assert!(entry.is_regular());
        assert_eq!(entry.perm(), FilePerm::READ | FilePerm::WRITE);
        assert_eq!(entry.size, 0);
        assert_eq!(entry.first_block, 0);
    }

    #[test]
    fn name_must_fit_the_field() {
        assert!(DirEntry::new_regular(&"x".repeat(31)).is_ok());
        assert!(DirEntry::new_regular(&"x".repeat(32)).is_err());
        assert!(DirEntry::new_regular("").is_err());
    }

    #[test]
    fn chmod_add_remove_assign() {
        let mut entry = DirEntry::new_regular("f").unwrap();
        entry.apply_chmod(CHMOD_ADD | 0x01);
        assert_eq!(entry.perm(), FilePerm::READ | FilePerm::WRITE | FilePerm::EXEC);
        entry.apply_chmod(CHMOD_REMOVE | 0x03);
        assert_eq!(entry.perm(), FilePerm::READ);
        entry.apply_chmod(CHMOD_ASSIGN | 0x06);
        assert_eq!(entry.perm(), FilePerm::READ | FilePerm::WRITE);
        // Numeric modes (no flag bit) assign directly.
        entry.apply_chmod(0x05);
        assert_eq!(entry.perm(), FilePerm::READ | FilePerm::EXEC);
    }

    #[test]
    fn chmod_round_trip_restores_perm() {
        let mut entry = DirEntry::new_regular("f").unwrap();
        entry.apply_chmod(CHMOD_REMOVE | 0x02);
        let before = entry.perm;
        entry.apply_chmod(CHMOD_ADD | 0x02);
        entry.apply_chmod(CHMOD_REMOVE | 0x02);
        assert_eq!(entry.perm, before);
    }

    #[test]
    fn format_line_hides_unallocated_block() {
        let entry = DirEntry::new_regular("a").unwrap();
        let line = entry.format_line();
        assert!(line.starts_with("      -rw- "));
        assert!(line.ends_with(" a"));

        let mut allocated = entry;
        allocated.first_block = 7;
        assert!(allocated.format_line().starts_with("    7 -rw- "));
    }

    #[test]
    fn sentinel_states_are_not_names() {
        let mut entry = DirEntry::new_regular("gone").unwrap();
        entry.name[0] = ENTRY_TOMBSTONE;
        assert!(!entry.matches("gone"));
        entry.name[0] = ENTRY_DELETED;
        assert!(!entry.matches("gone"));
    }
}
