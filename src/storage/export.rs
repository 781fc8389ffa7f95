use std::{
    fs::File,
    io::{self, BufWriter},
    path::Path,
};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Writes every file under `sources` into a zip at `destination`, with entry
/// names relative to `base_dir`. The archive is assembled under a temporary
/// name and renamed into place, so a failed export leaves nothing behind.
pub fn write_archive(base_dir: &Path, sources: &[&Path], destination: &Path) -> Result<usize> {
    let existing: Vec<&Path> = sources.iter().copied().filter(|p| p.is_dir()).collect();
    if existing.is_empty() {
        bail!("nothing to export");
    }

    let partial = destination.with_extension("zip.partial");
    let result = write_entries(base_dir, &existing, &partial);
    match result {
        Ok(count) => {
            std::fs::rename(&partial, destination).with_context(|| {
                format!("failed to move export into {}", destination.display())
            })?;
            Ok(count)
        }
        Err(err) => {
            let _ = std::fs::remove_file(&partial);
            Err(err)
        }
    }
}

fn write_entries(base_dir: &Path, sources: &[&Path], partial: &Path) -> Result<usize> {
    let file = File::create(partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    // Videos are already compressed.
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut count = 0;
    for source in sources {
        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(base_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");

            writer
                .start_file(relative.clone(), options)
                .with_context(|| format!("failed to add {relative} to archive"))?;
            let mut input = File::open(entry.path())
                .with_context(|| format!("failed to open {}", entry.path().display()))?;
            io::copy(&mut input, &mut writer)
                .with_context(|| format!("failed to write {relative} to archive"))?;
            count += 1;
        }
    }

    writer.finish().context("failed to finalize archive")?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn archive_contains_relative_entries() {
        let dir = TempDir::new().unwrap();
        let recordings = dir.path().join("recordings/2026-03-02/chunks");
        std::fs::create_dir_all(&recordings).unwrap();
        std::fs::write(recordings.join("chunk_20260302_090000.mp4"), b"video").unwrap();

        let destination = dir.path().join("export.zip");
        let count = write_archive(
            dir.path(),
            &[
                dir.path().join("recordings/2026-03-02").as_path(),
                dir.path().join("timelapses/2026-03-02").as_path(),
            ],
            &destination,
        )
        .unwrap();
        assert_eq!(count, 1);

        let mut archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        let mut entry = archive
            .by_name("recordings/2026-03-02/chunks/chunk_20260302_090000.mp4")
            .unwrap();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "video");
    }

    #[test]
    fn empty_export_fails_without_output() {
        let dir = TempDir::new().unwrap();
        let destination = dir.path().join("export.zip");
        assert!(write_archive(dir.path(), &[dir.path().join("missing").as_path()], &destination).is_err());
        assert!(!destination.exists());
    }
}
