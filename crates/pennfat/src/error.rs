use std::io;

/// Error enum with all errors that can be returned by PennFAT operations.
///
/// The display strings are the exact messages surfaced by the `perror`-style
/// helpers of the surrounding OS.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    /// No filesystem is mounted.
    #[error("filesystem not mounted")]
    NotMounted,
    /// A requested file has not been found in the root directory.
    #[error("no such file or directory")]
    NotFound,
    /// The file already has a writer; only one write/append handle may exist.
    #[error("file is in use")]
    Busy,
    /// The directory entry is a directory, not a regular file.
    #[error("not a regular file")]
    NotARegularFile,
    /// The directory entry's permission bits forbid the operation.
    #[error("permission denied")]
    PermissionDenied,
    /// A parameter was incorrect (open mode, mkfs geometry, whence, ...).
    #[error("invalid argument")]
    InvalidArgument,
    /// A position does not correspond to a valid FAT chain location.
    #[error("invalid offset")]
    InvalidOffset,
    /// The descriptor does not refer to an open file.
    #[error("bad file descriptor")]
    BadDescriptor,
    /// The FAT has no free block left.
    #[error("no space left on disk")]
    NoSpace,
    /// The kernel-global open-file table is full.
    #[error("open file table is full")]
    TableFull,
    /// The file name does not fit the 32-byte dirent field.
    #[error("file name too long")]
    NameTooLong,
    /// The backing image failed a host read or write.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;
