//! gzip-compressed tarballs of workspace directories.
//!
//! Archives hold the directory's contents relative to its root, so a
//! workspace can be restored under any name (starter archives included).

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::Path;
use tar::{Archive, Builder, EntryType};

/// Writes `dir` as a `.tgz` file at `archive_path`. Returns the archive size.
pub fn pack_dir(dir: &Path, archive_path: &Path) -> Result<u64> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create archive {}", archive_path.display()))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", dir)
        .with_context(|| format!("Failed to archive {}", dir.display()))?;

    let encoder = builder.into_inner().context("Failed to finish archive")?;
    let file = encoder.finish().context("Failed to finish compression")?;
    Ok(file.metadata()?.len())
}

/// Extracts a `.tgz` file into `dest`. Entries that would land outside
/// `dest` are rejected.
pub fn unpack_into(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    let mut count = 0;
    for entry in archive.entries().context("Failed to read archive")? {
        let mut entry = entry.context("Corrupt archive entry")?;
        let path = entry.path()?.into_owned();

        if matches!(entry.header().entry_type(), EntryType::Link) {
            bail!("Hard link {} is not allowed in a workspace archive", path.display());
        }

        let unpacked = entry
            .unpack_in(dest)
            .with_context(|| format!("Failed to extract {}", path.display()))?;
        if !unpacked {
            bail!("Archive entry {} escapes the workspace", path.display());
        }
        count += 1;
    }

    Ok(count)
}
