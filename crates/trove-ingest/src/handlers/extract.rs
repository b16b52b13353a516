//! Archive extraction
//!
//! Members are unpacked into a staging directory created next to the archive
//! (so moving them into place is a rename on the same filesystem). Paths that
//! would escape the staging directory are skipped.
//!
//! # Supported Formats
//!
//! - **Zip** (including self-extracting executables): zip crate
//! - **Gzip**: flate2; a tar payload is unpacked, anything else becomes a
//!   single member named after the archive without its `.gz` suffix
//! - **Tar**: tar crate

use crate::error::{IngestError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::debug;

const STAGING_PREFIX: &str = ".trove-extract-";
const PAYLOAD_NAME: &str = ".trove-payload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Gzip,
    Tar,
}

impl ArchiveKind {
    pub fn name(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Gzip => "gzip",
            ArchiveKind::Tar => "tar",
        }
    }
}

/// Result of a successful extraction; dropping it removes whatever is still
/// in the staging directory
#[derive(Debug)]
pub struct Extraction {
    pub staging: TempDir,
    /// `zip`, `tgz`, `gzip` or `tar`
    pub format: &'static str,
    /// Member paths relative to the staging directory
    pub members: Vec<PathBuf>,
}

impl Extraction {
    pub fn staged(&self, member: &Path) -> PathBuf {
        self.staging.path().join(member)
    }
}

/// Extract `archive` on the blocking pool, giving up after `timeout`
///
/// The blocking task owns the staging directory. On timeout it is told to
/// stop, and the directory is removed when the task returns.
pub async fn extract(kind: ArchiveKind, archive: &Path, timeout: Duration) -> Result<Extraction> {
    let parent = archive
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let staging = tempfile::Builder::new().prefix(STAGING_PREFIX).tempdir_in(parent)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let source = archive.to_path_buf();
    let task = tokio::task::spawn_blocking(move || -> Result<Extraction> {
        let (format, members) = extract_blocking(kind, &source, staging.path(), &flag)?;
        Ok(Extraction {
            staging,
            format,
            members,
        })
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(joined) => {
            let extraction = joined??;
            debug!(
                archive = %archive.display(),
                format = extraction.format,
                members = extraction.members.len(),
                "Extracted archive"
            );
            Ok(extraction)
        },
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            Err(IngestError::Timeout {
                operation: format!("extracting {}", archive.display()),
                secs: timeout.as_secs(),
            })
        },
    }
}

/// Extract synchronously into `dest`, stopping once `cancel` is set
pub fn extract_blocking(
    kind: ArchiveKind,
    archive: &Path,
    dest: &Path,
    cancel: &AtomicBool,
) -> Result<(&'static str, Vec<PathBuf>)> {
    match kind {
        ArchiveKind::Zip => Ok(("zip", extract_zip(archive, dest, cancel)?)),
        ArchiveKind::Tar => Ok(("tar", extract_tar(File::open(archive)?, dest, cancel)?)),
        ArchiveKind::Gzip => extract_gzip(archive, dest, cancel),
    }
}

/// Reader that fails once the extraction is cancelled
struct Cancellable<'a, R> {
    inner: R,
    cancel: &'a AtomicBool,
}

impl<'a, R: Read> Cancellable<'a, R> {
    fn new(inner: R, cancel: &'a AtomicBool) -> Self {
        Self { inner, cancel }
    }
}

impl<R: Read> Read for Cancellable<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(std::io::Error::other("extraction cancelled"));
        }
        self.inner.read(buf)
    }
}

fn ensure_running(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(IngestError::extraction("extraction cancelled"));
    }
    Ok(())
}

/// Extract every file of a zip archive
pub fn extract_zip(archive: &Path, dest: &Path, cancel: &AtomicBool) -> Result<Vec<PathBuf>> {
    let reader = BufReader::new(File::open(archive)?);
    let mut zip = zip::ZipArchive::new(reader)?;
    let mut members = Vec::new();

    for i in 0..zip.len() {
        ensure_running(cancel)?;
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }

        let Some(relative) = entry.enclosed_name() else {
            debug!(name = entry.name(), "Skipping zip entry with unsafe path");
            continue;
        };

        let target = dest.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        let bytes = std::io::copy(&mut Cancellable::new(&mut entry, cancel), &mut out)?;
        debug!("Extracted {} ({} bytes)", relative.display(), bytes);
        members.push(relative);
    }

    Ok(members)
}

/// Extract every regular file of an uncompressed tar stream
pub fn extract_tar<R: Read>(reader: R, dest: &Path, cancel: &AtomicBool) -> Result<Vec<PathBuf>> {
    let mut archive = tar::Archive::new(Cancellable::new(reader, cancel));
    let mut members = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| IngestError::extraction(format!("Failed to read tar entries: {}", e)))?
    {
        let mut entry =
            entry.map_err(|e| IngestError::extraction(format!("Failed to read tar entry: {}", e)))?;
        ensure_running(cancel)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let relative = entry.path()?.into_owned();
        if entry.unpack_in(dest)? {
            debug!("Extracted {} ({} bytes)", relative.display(), entry.size());
            members.push(relative);
        } else {
            debug!(name = %relative.display(), "Skipping tar entry with unsafe path");
        }
    }

    Ok(members)
}

/// Decompress a gzip stream; unpack it if it holds a tar archive
pub fn extract_gzip(
    archive: &Path,
    dest: &Path,
    cancel: &AtomicBool,
) -> Result<(&'static str, Vec<PathBuf>)> {
    let payload_path = dest.join(PAYLOAD_NAME);
    {
        let decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
        let mut decoder = Cancellable::new(decoder, cancel);
        let mut payload = File::create(&payload_path)?;
        let bytes = std::io::copy(&mut decoder, &mut payload)
            .map_err(|e| IngestError::extraction(format!("Failed to decompress gzip data: {}", e)))?;
        debug!("Decompressed {} -> {} bytes", archive.display(), bytes);
    }

    let mut payload = File::open(&payload_path)?;
    if is_tar(&mut payload)? {
        let members = extract_tar(BufReader::new(payload), dest, cancel)?;
        std::fs::remove_file(&payload_path)?;
        return Ok(("tgz", members));
    }
    drop(payload);

    let member = PathBuf::from(decompressed_name(archive));
    std::fs::rename(&payload_path, dest.join(&member))?;
    Ok(("gzip", vec![member]))
}

fn is_tar(file: &mut File) -> Result<bool> {
    let mut header = [0u8; 512];
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(filled == header.len() && header[257..262] == *b"ustar")
}

/// Member name for a single-stream gzip file
pub fn decompressed_name(archive: &Path) -> String {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = name.to_lowercase();

    if lower.ends_with(".tgz") {
        format!("{}.tar", &name[..name.len() - 4])
    } else if lower.ends_with(".gz") && name.len() > 3 {
        name[..name.len() - 3].to_string()
    } else {
        format!("{}.decompressed", name)
    }
}
