// src/fetch/zips.rs

use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};
use zip::ZipArchive;

fn open(zip_path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(zip_path)
        .with_context(|| format!("Failed to open ZIP file: {:?}", zip_path))?;
    ZipArchive::new(file).with_context(|| format!("Failed to read ZIP archive: {:?}", zip_path))
}

/// Paths the archive's file members have (or would have) under `dest`, in
/// archive order. Nothing is written.
pub fn list_members(zip_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = open(zip_path)?;
    let mut out = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i).with_context(|| {
            format!("Failed to access ZIP entry #{} in {:?}", i, zip_path)
        })?;
        if entry.is_dir() {
            continue;
        }
        match entry.enclosed_name() {
            Some(name) => out.push(dest.join(name)),
            None => warn!(entry = entry.name(), "skipping ZIP entry with unsafe path"),
        }
    }
    Ok(out)
}

/// Extract every file member of `zip_path` into `dest`, overwriting what is
/// there, and return their paths in archive order.
pub fn extract_all(zip_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest).with_context(|| format!("creating {:?}", dest))?;
    let mut archive = open(zip_path)?;
    let mut out = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).with_context(|| {
            format!("Failed to access ZIP entry #{} in {:?}", i, zip_path)
        })?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "skipping ZIP entry with unsafe path");
            continue;
        };

        let target = dest.join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
        }
        let mut file =
            File::create(&target).with_context(|| format!("creating {:?}", target))?;
        io::copy(&mut entry, &mut file)
            .with_context(|| format!("extracting {} from {:?}", entry.name(), zip_path))?;
        debug!(member = %target.display(), "extracted");
        out.push(target);
    }

    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;

    /// In-memory ZIP with the given `(name, content)` members.
    pub(crate) fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in members {
                zip.start_file(*name, options).unwrap();
                zip.write_all(content).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn extract_then_list_agree() -> Result<()> {
        let tmp = tempdir()?;
        let zip_path = tmp.path().join("a.zip");
        fs::write(&zip_path, zip_bytes(&[("a.csv", b"x\n1\n"), ("sub/b.csv", b"x\n2\n")]))?;
        let dest = tmp.path().join("out");

        let listed_before = list_members(&zip_path, &dest)?;
        assert!(!dest.exists());

        let extracted = extract_all(&zip_path, &dest)?;
        assert_eq!(extracted, listed_before);
        assert_eq!(extracted, vec![dest.join("a.csv"), dest.join("sub/b.csv")]);
        assert_eq!(fs::read_to_string(dest.join("sub/b.csv"))?, "x\n2\n");
        Ok(())
    }
}
