//! PennFAT: a FAT-style filesystem with a kernel-global open-file table.
//!
//! A volume is a single image file holding a 16-bit allocation table followed
//! by the data region; block 1 is the root directory and the only directory.
//! On top of the volume sit the open-file table (with its single-writer and
//! unlink-while-open bookkeeping) and the kernel file operations the OS
//! exposes as system calls: open, read, write, close, lseek, unlink, rename,
//! chmod, directory scans, and the `cat`/`cp` streaming helpers.
//!
//! The on-disk format is little-endian and bit-exact: FAT entry 0 packs the
//! volume geometry, directory entries are fixed 64-byte records whose first
//! name byte doubles as the entry-state sentinel.

// The FAT region and the directory entries are read by reinterpreting
// little-endian bytes in place.
#[cfg(not(target_endian = "little"))]
compile_error!("This crate only supports little endian systems");

mod copy;
mod error;
mod fs;
pub mod structures;
mod table;
mod volume;

pub use copy::{CatSink, COPY_BUFFER_SIZE};
pub use error::{FsError, FsResult};
pub use fs::{FatFs, Fd, Whence};
pub use structures::dirent::{
    CHMOD_ADD, CHMOD_ASSIGN, CHMOD_MASK, CHMOD_REMOVE, DirEntry, FilePerm,
};
pub use structures::fat::{BLOCK_SIZES, Layout, MAX_FAT_BLOCKS, MIN_FAT_BLOCKS};
pub use table::{
    MAX_OPEN_FILES, OpenFile, OpenFileTable, OpenMode, STDERR_FD, STDIN_FD, STDOUT_FD,
};
pub use volume::{DirLookup, Volume};
