//! Test fixtures for common test scenarios.
//!
//! Box directories and archives on disk, and machine index entries.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::index::Entry;

/// Create `<parent>/<name>/` holding a minimal box for `provider`.
pub fn box_dir(parent: &Path, name: &str, provider: &str) -> PathBuf {
    let dir = parent.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("metadata.json"),
        format!(r#"{{"provider":"{}"}}"#, provider),
    )
    .unwrap();
    std::fs::write(dir.join("box.img"), b"disk image").unwrap();
    dir
}

/// Tar bytes (without the end-of-archive marker) for `files`.
fn tar_entries(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    let mut bytes = builder.into_inner().unwrap();
    // into_inner appends two zero blocks
    bytes.truncate(bytes.len() - 1024);
    bytes
}

/// Write a box archive at `path`, gzip-compressed when `gzip` is set.
pub fn write_box_tarball(path: &Path, files: &[(&str, &str)], gzip: bool) {
    let mut bytes = tar_entries(files);
    bytes.extend_from_slice(&[0u8; 1024]);

    let file = File::create(path).unwrap();
    if gzip {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&bytes).unwrap();
        encoder.finish().unwrap();
    } else {
        let mut file = file;
        file.write_all(&bytes).unwrap();
    }
}

/// An archive whose first entry is valid and whose second header is garbage,
/// so unpacking fails part way through.
pub fn write_corrupt_tarball(path: &Path) {
    let mut bytes = tar_entries(&[("metadata.json", r#"{"provider":"libvirt"}"#)]);
    bytes.extend_from_slice(&[0xAB; 512]);
    std::fs::write(path, bytes).unwrap();
}

/// An archive holding symlink `link -> target` followed by a regular file
/// at `file`, which may sit underneath the link.
pub fn write_tarball_with_symlink(path: &Path, link: &str, target: &Path, file: &str) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());

    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    // Written raw so the target lands verbatim, absolute or not.
    let raw = target.to_str().unwrap().as_bytes();
    header.as_old_mut().linkname[..raw.len()].copy_from_slice(raw);
    builder.append_data(&mut header, link, std::io::empty()).unwrap();

    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    builder.append_data(&mut header, file, &b"owned"[..]).unwrap();
    builder.finish().unwrap();
}

/// A machine entry whose local data directory is `data_dir`.
pub fn machine(name: &str, provider: &str, data_dir: &Path) -> Entry {
    let mut entry = Entry::new(name, provider);
    entry.vagrantfile_path = Some(PathBuf::from("/projects").join(name));
    entry.local_data_path = Some(data_dir.to_path_buf());
    entry
}
