//! Artifact archives
//!
//! Remote artifacts are zip files. Directory bundles (`.app`) are first
//! packed into `app.tar.gz` inside the zip, because zip extraction loses the
//! executable bit on many tools. Extraction unwraps that tarball again.
//!
//! Everything here is blocking; async callers go through `spawn_blocking`.

use crate::error::{RockError, RockResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the tarball wrapping directory bundles
pub const BUNDLE_ARCHIVE_NAME: &str = "app.tar.gz";

/// Extract a zip archive into `dest`
pub fn extract_zip(archive: &Path, dest: &Path) -> RockResult<()> {
    let file = File::open(archive)
        .map_err(|e| RockError::io(format!("opening {}", archive.display()), e))?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| RockError::archive(archive, e))?;
    fs::create_dir_all(dest)
        .map_err(|e| RockError::io(format!("creating {}", dest.display()), e))?;
    zip.extract(dest).map_err(|e| RockError::archive(archive, e))?;
    debug!("Extracted {} entries from {}", zip.len(), archive.display());
    Ok(())
}

/// Extract a gzipped tarball into `dest`, keeping permissions and symlinks
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> RockResult<()> {
    let file = File::open(archive)
        .map_err(|e| RockError::io(format!("opening {}", archive.display()), e))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);
    tar.set_overwrite(true);
    tar.unpack(dest).map_err(|e| RockError::archive(archive, e))?;
    Ok(())
}

/// Replace every `app.tar.gz` below `dir` with its extracted contents.
///
/// Returns the number of bundles unwrapped.
pub fn unwrap_bundle_archives(dir: &Path) -> RockResult<usize> {
    let mut wrappers = Vec::new();
    collect_named(dir, BUNDLE_ARCHIVE_NAME, &mut wrappers)
        .map_err(|e| RockError::io(format!("scanning {}", dir.display()), e))?;

    for wrapper in &wrappers {
        let parent = wrapper.parent().unwrap_or(dir);
        extract_tar_gz(wrapper, parent)?;
        fs::remove_file(wrapper)
            .map_err(|e| RockError::io(format!("removing {}", wrapper.display()), e))?;
        debug!("Unwrapped bundle archive {}", wrapper.display());
    }
    Ok(wrappers.len())
}

fn collect_named(dir: &Path, name: &str, found: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_named(&entry.path(), name, found)?;
        } else if file_type.is_file() && entry.file_name() == name {
            found.push(entry.path());
        }
    }
    Ok(())
}

/// Pack a build output into a zip at `out`.
///
/// Files are stored under their basename. Directories are wrapped in
/// `app.tar.gz` first.
pub fn pack_artifact(binary: &Path, out: &Path) -> RockResult<()> {
    let meta = fs::metadata(binary).map_err(|_| RockError::PathNotFound(binary.to_path_buf()))?;
    let file_name = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| RockError::archive(binary, "binary path has no file name"))?;

    let out_file = File::create(out)
        .map_err(|e| RockError::io(format!("creating {}", out.display()), e))?;
    let mut zip = ZipWriter::new(BufWriter::new(out_file));

    if meta.is_dir() {
        let staging = tempfile::Builder::new()
            .prefix(".rock-pack-")
            .tempdir_in(out.parent().unwrap_or_else(|| Path::new(".")))
            .map_err(|e| RockError::io("creating packing directory", e))?;
        let tarball = staging.path().join(BUNDLE_ARCHIVE_NAME);
        write_tar_gz(binary, &file_name, &tarball)?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        zip.start_file(BUNDLE_ARCHIVE_NAME, options)
            .map_err(|e| RockError::archive(out, e))?;
        let mut src = File::open(&tarball)
            .map_err(|e| RockError::io(format!("opening {}", tarball.display()), e))?;
        io::copy(&mut src, &mut zip).map_err(|e| RockError::io("writing zip entry", e))?;
    } else {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);
        zip.start_file(file_name.as_str(), options)
            .map_err(|e| RockError::archive(out, e))?;
        let mut src = File::open(binary)
            .map_err(|e| RockError::io(format!("opening {}", binary.display()), e))?;
        io::copy(&mut src, &mut zip).map_err(|e| RockError::io("writing zip entry", e))?;
    }

    zip.finish().map_err(|e| RockError::archive(out, e))?;
    debug!("Packed {} into {}", binary.display(), out.display());
    Ok(())
}

fn write_tar_gz(dir: &Path, name: &str, out: &Path) -> RockResult<()> {
    let file = File::create(out)
        .map_err(|e| RockError::io(format!("creating {}", out.display()), e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(BufWriter::new(file), Compression::default()));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(name, dir)
        .map_err(|e| RockError::archive(dir, e))?;
    builder
        .into_inner()
        .and_then(|gz| gz.finish())
        .map_err(|e| RockError::archive(out, e))?;
    Ok(())
}
