use pennfat::FsError;

/// The process-wide error registry.
///
/// Every failing system call returns one of these and records it as the
/// kernel's last error, which [`crate::syscall::Process::perror`] formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Errno {
    #[error("operation not permitted")]
    NotPermitted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("malloc failure")]
    OutOfMemory,

    #[error("no child processes")]
    NoChild,
    #[error("no such process")]
    NoSuchProcess,
    #[error("thread creation failed")]
    ThreadCreate,

    #[error("no such file or directory")]
    NotFound,
    #[error("file already exists")]
    Exists,
    #[error("not a regular file")]
    NotARegularFile,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("I/O error")]
    Io,
    #[error("no space left on disk")]
    NoSpace,
    #[error("file is read-only")]
    ReadOnly,
    #[error("filesystem not mounted")]
    NotMounted,
    #[error("open file table is full")]
    TableFull,
    #[error("file is in use")]
    Busy,
    #[error("permission denied")]
    PermissionDenied,
    #[error("too many open files")]
    TooManyOpen,

    #[error("file name too long")]
    NameTooLong,
    #[error("argument list too long")]
    ArgListTooLong,
}

impl From<FsError> for Errno {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotMounted => Errno::NotMounted,
            FsError::NotFound => Errno::NotFound,
            FsError::Busy => Errno::Busy,
            FsError::NotARegularFile => Errno::NotARegularFile,
            FsError::PermissionDenied => Errno::PermissionDenied,
            FsError::InvalidArgument | FsError::InvalidOffset => Errno::InvalidArgument,
            FsError::BadDescriptor => Errno::BadDescriptor,
            FsError::NoSpace => Errno::NoSpace,
            FsError::TableFull => Errno::TableFull,
            FsError::NameTooLong => Errno::NameTooLong,
            FsError::Io(_) => Errno::Io,
        }
    }
}

pub type SysResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_errors_map_into_the_registry() {
        assert_eq!(Errno::from(FsError::Busy), Errno::Busy);
        assert_eq!(Errno::from(FsError::InvalidOffset), Errno::InvalidArgument);
        assert_eq!(
            Errno::from(FsError::Io(std::io::Error::other("boom"))),
            Errno::Io
        );
    }

    #[test]
    fn messages_match_the_perror_table() {
        assert_eq!(Errno::NoChild.to_string(), "no child processes");
        assert_eq!(Errno::NotMounted.to_string(), "filesystem not mounted");
        assert_eq!(Errno::TooManyOpen.to_string(), "too many open files");
    }
}
