//! End-to-end scenarios over a real image file.

use pennfat::{FatFs, OpenMode};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// mkfs + mount + touch + ls: one entry, unallocated, rw, size 0.
#[test]
fn format_mount_create_list() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("disk");
    FatFs::format(&image, 1, 0).unwrap();

    let mut fs = FatFs::mount(&image).unwrap();
    let fd = fs.open("a", OpenMode::APPEND).unwrap();
    fs.close(fd).unwrap();

    let entries = fs.scan_dir(None).unwrap();
    assert_eq!(entries.len(), 1);
    let line = entries[0].format_line();
    assert!(line.starts_with("      -rw- "), "unexpected line: {line}");
    assert!(line.contains("          0 "), "unexpected line: {line}");
    assert!(line.ends_with(" a"), "unexpected line: {line}");
}

/// A listing survives unmount/remount unchanged.
#[test]
fn listing_is_stable_across_remount() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("disk");
    FatFs::format(&image, 1, 0).unwrap();

    let mut fs = FatFs::mount(&image).unwrap();
    for name in ["alpha", "beta", "gamma"] {
        let fd = fs.open(name, OpenMode::WRITE).unwrap();
        fs.write(fd, name.as_bytes()).unwrap();
        fs.close(fd).unwrap();
    }
    let before: Vec<String> = fs
        .scan_dir(None)
        .unwrap()
        .iter()
        .map(|e| e.format_line())
        .collect();
    fs.unmount().unwrap();

    let mut fs = FatFs::mount(&image).unwrap();
    let after: Vec<String> = fs
        .scan_dir(None)
        .unwrap()
        .iter()
        .map(|e| e.format_line())
        .collect();
    assert_eq!(before, after);
}

/// Exact byte round trip through close and re-open, across block sizes.
#[test]
fn write_close_read_back() {
    for (blocks_in_fat, code) in [(1u8, 0u8), (2, 1), (1, 4)] {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("disk");
        FatFs::format(&image, blocks_in_fat, code).unwrap();
        let mut fs = FatFs::mount(&image).unwrap();

        let payload: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
        let fd = fs.open("blob", OpenMode::WRITE).unwrap();
        assert_eq!(fs.write(fd, &payload).unwrap(), payload.len());
        fs.close(fd).unwrap();

        let fd = fs.open("blob", OpenMode::READ).unwrap();
        let mut got = vec![0u8; payload.len()];
        let mut total = 0;
        while total < got.len() {
            let n = fs.read(fd, &mut got[total..]).unwrap();
            assert!(n > 0);
            total += n;
        }
        assert_eq!(got, payload);
        fs.close(fd).unwrap();
    }
}

/// Filling the volume produces a short write, not an error.
#[test]
fn disk_full_short_write() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("disk");
    // 128 FAT entries at 256-byte blocks: 126 data blocks after the root.
    FatFs::format(&image, 1, 0).unwrap();
    let mut fs = FatFs::mount(&image).unwrap();

    let fd = fs.open("big", OpenMode::WRITE).unwrap();
    let huge = vec![0xAB; 256 * 200];
    let written = fs.write(fd, &huge).unwrap();
    assert_eq!(written, 256 * 126);
    fs.close(fd).unwrap();
}
