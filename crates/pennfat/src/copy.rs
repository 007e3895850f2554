use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{FsError, FsResult};
use crate::fs::{FatFs, Fd};
use crate::table::{OpenMode, STDIN_FD, STDOUT_FD};

/// Streaming buffer for `cat` and `cp`.
pub const COPY_BUFFER_SIZE: usize = 4096;

/// Where `cat` sends its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatSink<'a> {
    /// Descriptor 1 (host stdout unless redirected by the caller).
    Stdout,
    /// `-w OUT`: create or truncate.
    Truncate(&'a str),
    /// `-a OUT`: create or append.
    Append(&'a str),
}

impl FatFs {
    /// Pump `input` into `output` until end of file.
    pub fn copy_stream(&mut self, input: Fd, output: Fd) -> FsResult<()> {
        let mut buf = [0u8; COPY_BUFFER_SIZE];
        loop {
            let n = self.read(input, &mut buf)?;
            if n == 0 {
                return Ok(());
            }
            if self.write(output, &buf[..n])? != n {
                return Err(FsError::NoSpace);
            }
        }
    }

    /// `cat`: stream each input (stdin when none are given) into the sink.
    ///
    /// The sink is opened before anything streams, so a bad `-w`/`-a` target
    /// fails up front. A missing input is not fatal: remaining inputs still
    /// stream and the first error is reported afterwards.
    pub fn cat(&mut self, inputs: &[&str], sink: CatSink<'_>) -> FsResult<()> {
        let output = match sink {
            CatSink::Stdout => STDOUT_FD,
            CatSink::Truncate(name) => self.open(name, OpenMode::WRITE)?,
            CatSink::Append(name) => self.open(name, OpenMode::APPEND)?,
        };

        let mut result = Ok(());
        if inputs.is_empty() {
            result = self.copy_stream(STDIN_FD, output);
        } else {
            for name in inputs {
                let input = match self.open(name, OpenMode::READ) {
                    Ok(fd) => fd,
                    Err(err) => {
                        if result.is_ok() {
                            result = Err(err);
                        }
                        continue;
                    }
                };
                let copied = self.copy_stream(input, output);
                let closed = self.close(input);
                if result.is_ok() {
                    result = copied.and(closed);
                }
            }
        }

        if output != STDOUT_FD {
            let closed = self.close(output);
            if result.is_ok() {
                result = closed;
            }
        }
        result
    }

    /// `cp SRC DST`: both names live on the mounted volume.
    pub fn copy_fat_to_fat(&mut self, src: &str, dest: &str) -> FsResult<()> {
        let input = self.open(src, OpenMode::READ)?;
        let output = match self.open(dest, OpenMode::WRITE) {
            Ok(fd) => fd,
            Err(err) => {
                self.close(input)?;
                return Err(err);
            }
        };
        let copied = self.copy_stream(input, output);
        let closed = self.close(input).and(self.close(output));
        copied.and(closed)
    }

    /// `cp -h SRC DST`: host file into the mounted volume.
    pub fn copy_host_to_fat(&mut self, src: &Path, dest: &str) -> FsResult<()> {
        let output = self.open(dest, OpenMode::WRITE)?;
        let copied = (|| {
            let mut host = File::open(src)?;
            let mut buf = [0u8; COPY_BUFFER_SIZE];
            loop {
                let n = host.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                if self.write(output, &buf[..n])? != n {
                    return Err(FsError::NoSpace);
                }
            }
        })();
        let closed = self.close(output);
        copied.and(closed)
    }

    /// `cp SRC -h DST`: file on the mounted volume out to the host.
    pub fn copy_fat_to_host(&mut self, src: &str, dest: &Path) -> FsResult<()> {
        let input = self.open(src, OpenMode::READ)?;
        let copied = (|| {
            let mut host = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(dest)?;
            let mut buf = [0u8; COPY_BUFFER_SIZE];
            loop {
                let n = self.read(input, &mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                host.write_all(&buf[..n])?;
            }
        })();
        let closed = self.close(input);
        copied.and(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fresh_fs() -> (TempDir, FatFs) {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("disk.img");
        FatFs::format(&image, 1, 0).unwrap();
        (dir, FatFs::mount(&image).unwrap())
    }

    fn write_file(fs: &mut FatFs, name: &str, data: &[u8]) {
        let fd = fs.open(name, OpenMode::WRITE).unwrap();
        assert_eq!(fs.write(fd, data).unwrap(), data.len());
        fs.close(fd).unwrap();
    }

    fn read_file(fs: &mut FatFs, name: &str) -> Vec<u8> {
        let fd = fs.open(name, OpenMode::READ).unwrap();
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = fs.read(fd, &mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        fs.close(fd).unwrap();
        out
    }

    #[test]
    fn cat_concatenates_into_a_file() {
        let (_dir, mut fs) = fresh_fs();
        write_file(&mut fs, "one", b"first ");
        write_file(&mut fs, "two", b"second");

        fs.cat(&["one", "two"], CatSink::Truncate("out")).unwrap();
        assert_eq!(read_file(&mut fs, "out"), b"first second");

        fs.cat(&["one"], CatSink::Append("out")).unwrap();
        assert_eq!(read_file(&mut fs, "out"), b"first secondfirst ");
    }

    #[test]
    fn cat_reports_missing_input_but_keeps_going() {
        let (_dir, mut fs) = fresh_fs();
        write_file(&mut fs, "real", b"data");

        let err = fs
            .cat(&["ghost", "real"], CatSink::Truncate("out"))
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound));
        // The existing input still streamed.
        assert_eq!(read_file(&mut fs, "out"), b"data");
    }

    #[test]
    fn cp_within_the_volume() {
        let (_dir, mut fs) = fresh_fs();
        let payload: Vec<u8> = (0..600).map(|i| (i % 251) as u8).collect();
        write_file(&mut fs, "src", &payload);

        fs.copy_fat_to_fat("src", "dst").unwrap();
        assert_eq!(read_file(&mut fs, "dst"), payload);
    }

    #[test]
    fn cp_to_and_from_the_host() {
        let (dir, mut fs) = fresh_fs();
        let host_in = dir.path().join("host_in.bin");
        let host_out = dir.path().join("host_out.bin");
        let payload: Vec<u8> = (0..5000).map(|i| (i % 253) as u8).collect();
        std::fs::write(&host_in, &payload).unwrap();

        fs.copy_host_to_fat(&host_in, "incoming").unwrap();
        assert_eq!(read_file(&mut fs, "incoming"), payload);

        fs.copy_fat_to_host("incoming", &host_out).unwrap();
        assert_eq!(std::fs::read(&host_out).unwrap(), payload);
    }
}
